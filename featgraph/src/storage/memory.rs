//! In-memory storage.

use super::{StorageIndexing, StorageSink};
use crate::core::{FeatureName, SampleData, SampleId};
use crate::errors::FeatgraphError;
use crate::graph::DATASET_SCOPE_ID;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keeps every extracted value in nested maps.
///
/// With [`StorageIndexing::Sample`] the outer key is the sample id and the
/// inner key the feature name; [`StorageIndexing::Feature`] swaps them.
/// Dataset-wide features are kept apart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictStorage {
    indexing: StorageIndexing,
    data: BTreeMap<String, BTreeMap<String, SampleData>>,
    dataset: BTreeMap<FeatureName, SampleData>,
}

impl DictStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new(indexing: StorageIndexing) -> Self {
        Self {
            indexing,
            ..Self::default()
        }
    }

    /// How values are indexed.
    #[must_use]
    pub fn indexing(&self) -> StorageIndexing {
        self.indexing
    }

    /// Looks up one value.
    #[must_use]
    pub fn get(&self, sample_id: &str, feature: &str) -> Option<&SampleData> {
        let (outer, inner) = self.keys(sample_id, feature);
        self.data.get(outer).and_then(|values| values.get(inner))
    }

    /// The indexed values.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, BTreeMap<String, SampleData>> {
        &self.data
    }

    /// Values of dataset-wide features.
    #[must_use]
    pub fn dataset_features(&self) -> &BTreeMap<FeatureName, SampleData> {
        &self.dataset
    }

    /// Number of stored per-sample values.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.data.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.dataset.is_empty()
    }

    /// Renders the storage as one JSON object. Dataset-wide features, if
    /// any, sit under the `"<dataset>"` key.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut root: Map<String, Value> = self
            .data
            .iter()
            .map(|(outer, values)| {
                let inner: Map<String, Value> = values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (outer.clone(), Value::Object(inner))
            })
            .collect();
        if !self.dataset.is_empty() {
            let dataset: Map<String, Value> = self
                .dataset
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            root.insert(DATASET_SCOPE_ID.to_string(), Value::Object(dataset));
        }
        Value::Object(root)
    }

    fn keys<'a>(&self, sample_id: &'a str, feature: &'a str) -> (&'a str, &'a str) {
        match self.indexing {
            StorageIndexing::Sample => (sample_id, feature),
            StorageIndexing::Feature => (feature, sample_id),
        }
    }

    fn insert(&mut self, sample_id: &str, feature: &str, value: SampleData) {
        let (outer, inner) = self.keys(sample_id, feature);
        self.data
            .entry(outer.to_string())
            .or_default()
            .insert(inner.to_string(), value);
    }
}

impl StorageSink for DictStorage {
    fn store_feature(
        &mut self,
        name: &str,
        values: BTreeMap<SampleId, SampleData>,
    ) -> Result<(), FeatgraphError> {
        for (sample_id, value) in values {
            self.insert(&sample_id, name, value);
        }
        Ok(())
    }

    fn store_sample(
        &mut self,
        sample_id: &str,
        values: BTreeMap<FeatureName, SampleData>,
    ) -> Result<(), FeatgraphError> {
        for (feature, value) in values {
            self.insert(sample_id, &feature, value);
        }
        Ok(())
    }

    fn store_dataset_feature(&mut self, name: &str, value: SampleData) -> Result<(), FeatgraphError> {
        self.dataset.insert(name.to_string(), value);
        Ok(())
    }
}
