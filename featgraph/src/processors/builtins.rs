//! Input and feature boundary steps.

use super::Processor;
use crate::core::ProcessorIdentity;
use serde::{Deserialize, Serialize};

/// Whether a value exists per sample or once for the whole dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One value per sample.
    #[default]
    Sample,
    /// One value for the whole dataset.
    Dataset,
}

/// A named input read from the sample (or the dataset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    /// The data name.
    pub name: String,
    /// Where the data is read from.
    pub scope: Scope,
    /// Set when the input stands for a feature declared elsewhere; an
    /// unresolved input of this kind is a dependency error.
    pub required_feature: bool,
}

impl InputSpec {
    /// Creates a per-sample input.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::Sample,
            required_feature: false,
        }
    }

    /// Returns the structural identity of the input.
    ///
    /// The `required_feature` flag is not part of the identity, so a plain
    /// input and a feature reference with the same name share one node.
    #[must_use]
    pub fn identity(&self) -> ProcessorIdentity {
        let tag = match self.scope {
            Scope::Sample => "Input",
            Scope::Dataset => "DSInput",
        };
        ProcessorIdentity::new(tag)
            .with_param("data_name", self.name.as_str())
            .with_label(format!("{tag}({})", self.name))
    }
}

/// A named feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    /// The feature name.
    pub name: String,
    /// Whether the feature is per sample or dataset-wide.
    pub scope: Scope,
}

impl FeatureSpec {
    /// Creates a per-sample feature.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::Sample,
        }
    }

    /// Returns the structural identity of the feature.
    #[must_use]
    pub fn identity(&self) -> ProcessorIdentity {
        let tag = match self.scope {
            Scope::Sample => "Feat",
            Scope::Dataset => "DSFeat",
        };
        ProcessorIdentity::new(tag)
            .with_param("feat_name", self.name.as_str())
            .with_label(format!("{tag}({})", self.name))
    }

    /// Converts a feature used in input position into a feature reference.
    #[must_use]
    pub fn as_input(&self) -> InputSpec {
        InputSpec {
            name: self.name.clone(),
            scope: self.scope,
            required_feature: true,
        }
    }
}

/// A per-sample input named `name`.
#[must_use]
pub fn input(name: impl Into<String>) -> Processor {
    Processor::Input(InputSpec::new(name))
}

/// A dataset-wide input named `name`.
#[must_use]
pub fn ds_input(name: impl Into<String>) -> Processor {
    Processor::Input(InputSpec {
        scope: Scope::Dataset,
        ..InputSpec::new(name)
    })
}

/// A per-sample feature named `name`.
#[must_use]
pub fn feat(name: impl Into<String>) -> Processor {
    Processor::Feature(FeatureSpec::new(name))
}

/// A dataset-wide feature named `name`.
#[must_use]
pub fn ds_feat(name: impl Into<String>) -> Processor {
    Processor::Feature(FeatureSpec {
        name: name.into(),
        scope: Scope::Dataset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_identity_ignores_feature_flag() {
        let plain = InputSpec::new("a");
        let reference = FeatureSpec::new("a").as_input();

        assert!(reference.required_feature);
        assert_eq!(plain.identity(), reference.identity());
    }

    #[test]
    fn test_scope_changes_identity() {
        let sample = InputSpec::new("a").identity();
        let dataset = InputSpec {
            scope: Scope::Dataset,
            ..InputSpec::new("a")
        }
        .identity();

        assert_ne!(sample.key(), dataset.key());
    }

    #[test]
    fn test_labels() {
        assert_eq!(InputSpec::new("a").identity().label(), "Input(a)");
        assert_eq!(FeatureSpec::new("x").identity().label(), "Feat(x)");
        assert_eq!(ds_feat("s").identity().label(), "DSFeat(s)");
    }
}
