//! Storage sinks for extracted features.
//!
//! The extraction driver hands values to a [`StorageSink`] either one
//! feature at a time (feature-wise extraction) or one sample at a time
//! (sample-wise extraction). How the values end up encoded is up to the
//! sink; the DAG never sees it.

mod json;
mod memory;

pub use crate::config::StorageIndexing;
pub use json::JsonStorage;
pub use memory::DictStorage;

use crate::core::{FeatureName, SampleData, SampleId};
use crate::errors::FeatgraphError;
use std::collections::BTreeMap;

/// Receives extracted values.
#[cfg_attr(test, mockall::automock)]
pub trait StorageSink: Send {
    /// Stores every value of one feature, keyed by sample id.
    ///
    /// # Errors
    ///
    /// Returns [`FeatgraphError::Storage`] if the values cannot be stored.
    fn store_feature(
        &mut self,
        name: &str,
        values: BTreeMap<SampleId, SampleData>,
    ) -> Result<(), FeatgraphError>;

    /// Stores every feature value of one sample, keyed by feature name.
    ///
    /// # Errors
    ///
    /// Returns [`FeatgraphError::Storage`] if the values cannot be stored.
    fn store_sample(
        &mut self,
        sample_id: &str,
        values: BTreeMap<FeatureName, SampleData>,
    ) -> Result<(), FeatgraphError>;

    /// Stores the value of a dataset-wide feature. Ignored by default.
    ///
    /// # Errors
    ///
    /// Returns [`FeatgraphError::Storage`] if the value cannot be stored.
    fn store_dataset_feature(&mut self, name: &str, value: SampleData) -> Result<(), FeatgraphError> {
        let _ = (name, value);
        Ok(())
    }

    /// Called once after a successful extraction.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered values cannot be flushed.
    fn finalize(&mut self) -> Result<(), FeatgraphError> {
        Ok(())
    }
}
