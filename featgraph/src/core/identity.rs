//! Structural identity of processors and graph nodes.
//!
//! A [`ProcessorIdentity`] is a tag plus an ordered parameter map. Its
//! [`IdentityKey`] is a SHA-256 digest of a canonical encoding, so the same
//! configuration yields the same key in every process run.
//!
//! A parameter may also be declared as a hyperparameter: a named slot left
//! empty until the extractor supplies its value. An unset slot takes part in
//! the identity under its hyperparameter name.

use super::value::{write_bytes, ParamValue};
use crate::errors::PipelineBuildError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A 128-bit structural hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey([u8; 16]);

impl IdentityKey {
    fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let result = hasher.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&result[..16]);
        Self(key)
    }

    /// Combines this key with the ancestor keys of a node's parents, in order.
    #[must_use]
    pub fn with_ancestors(&self, parents: &[Self]) -> Self {
        let mut buf = Vec::with_capacity(16 * (parents.len() + 1) + 8);
        buf.extend_from_slice(&self.0);
        buf.extend_from_slice(&(parents.len() as u64).to_le_bytes());
        for parent in parents {
            buf.extend_from_slice(&parent.0);
        }
        Self::digest(&buf)
    }

    /// Hex representation of the key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", self.to_hex())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Immutable identity of a processing step: a tag and its parameters.
///
/// Two identities are equal iff tag and parameters match. The display label
/// is not part of the identity.
#[derive(Debug, Clone)]
pub struct ProcessorIdentity {
    tag: String,
    params: BTreeMap<String, ParamValue>,
    /// Unset parameter slots, parameter name to hyperparameter name.
    hparams: BTreeMap<String, String>,
    label: Option<String>,
}

impl ProcessorIdentity {
    /// Creates an identity with no parameters.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: BTreeMap::new(),
            hparams: BTreeMap::new(),
            label: None,
        }
    }

    /// Adds a typed parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let name = name.into();
        self.hparams.remove(&name);
        self.params.insert(name, value.into());
        self
    }

    /// Declares parameter `name` as the hyperparameter `hparam`, to be set
    /// before extraction.
    #[must_use]
    pub fn with_hparam(mut self, name: impl Into<String>, hparam: impl Into<String>) -> Self {
        let name = name.into();
        self.params.remove(&name);
        self.hparams.insert(name, hparam.into());
        self
    }

    /// Unset slots, parameter name to hyperparameter name.
    #[must_use]
    pub fn hparam_slots(&self) -> &BTreeMap<String, String> {
        &self.hparams
    }

    /// Names of the hyperparameters still unset, sorted and deduplicated.
    #[must_use]
    pub fn unset_hparams(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hparams.values().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Fills every slot whose hyperparameter has a value in `values`.
    /// Returns the number of slots filled.
    pub fn set_hparams(&mut self, values: &BTreeMap<String, ParamValue>) -> usize {
        let filled: Vec<(String, ParamValue)> = self
            .hparams
            .iter()
            .filter_map(|(param, hparam)| {
                values.get(hparam).map(|value| (param.clone(), value.clone()))
            })
            .collect();
        for (param, value) in &filled {
            self.hparams.remove(param);
            self.params.insert(param.clone(), value.clone());
        }
        filled.len()
    }

    /// Adds a parameter given as JSON.
    ///
    /// # Errors
    ///
    /// Returns a build error if the value is a list or a map.
    pub fn try_with_json_param(
        self,
        name: impl Into<String>,
        value: &serde_json::Value,
    ) -> Result<Self, PipelineBuildError> {
        let name = name.into();
        match ParamValue::from_json(value) {
            Some(param) => Ok(self.with_param(name, param)),
            None => Err(PipelineBuildError::non_hashable(self.tag, name)),
        }
    }

    /// Sets a human-readable label used in logs and errors.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the parameters, ordered by name.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Returns one parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Returns the display label, e.g. `TimesX(factor=2)`.
    #[must_use]
    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let mut args: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        args.extend(self.hparams.iter().map(|(k, h)| format!("{k}=?{h}")));
        format!("{}({})", self.tag, args.join(","))
    }

    /// Computes the stable structural key.
    #[must_use]
    pub fn key(&self) -> IdentityKey {
        let mut buf = Vec::new();
        write_bytes(&mut buf, self.tag.as_bytes());
        buf.extend_from_slice(&(self.params.len() as u64).to_le_bytes());
        for (name, value) in &self.params {
            write_bytes(&mut buf, name.as_bytes());
            value.write_canonical(&mut buf);
        }
        buf.extend_from_slice(&(self.hparams.len() as u64).to_le_bytes());
        for (name, hparam) in &self.hparams {
            write_bytes(&mut buf, name.as_bytes());
            write_bytes(&mut buf, hparam.as_bytes());
        }
        IdentityKey::digest(&buf)
    }
}

impl PartialEq for ProcessorIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.params == other.params && self.hparams == other.hparams
    }
}

impl Eq for ProcessorIdentity {}

impl Hash for ProcessorIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
        self.params.hash(state);
        self.hparams.hash(state);
    }
}

impl fmt::Display for ProcessorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
