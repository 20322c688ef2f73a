//! Sample and dataset collaborators.
//!
//! The engine only needs two things from the data layer: a sample that can
//! be looked up by name and carries a stable id, and a dataset that can be
//! iterated. Everything else about how data is loaded lives outside.

mod dict;

pub use dict::{DictSample, ListDataset};

use crate::core::{SampleData, SampleId};
use crate::errors::SampleError;
use std::fmt::Debug;
use std::sync::Arc;

/// A single sample of a dataset.
pub trait Sample: Send + Sync + Debug {
    /// Returns the stable identifier of the sample.
    fn id(&self) -> SampleId;

    /// Looks up a named piece of data.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::NotFound`] if the sample has no such data.
    fn lookup(&self, name: &str) -> Result<SampleData, SampleError>;
}

/// An iterable collection of samples.
pub trait Dataset: Send + Sync + Debug {
    /// Iterates over the samples, in a deterministic order.
    fn samples(&self) -> Box<dyn Iterator<Item = Arc<dyn Sample>> + '_>;

    /// Number of samples, when known up front.
    fn sample_count(&self) -> Option<usize> {
        None
    }

    /// Looks up dataset-wide data (not attached to any sample).
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::DatasetNotFound`] by default.
    fn lookup(&self, name: &str) -> Result<SampleData, SampleError> {
        Err(SampleError::DatasetNotFound {
            name: name.to_string(),
        })
    }
}
