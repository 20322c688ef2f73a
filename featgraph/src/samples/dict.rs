//! In-memory samples backed by JSON maps.

use super::{Dataset, Sample};
use crate::core::{SampleData, SampleId};
use crate::errors::SampleError;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A sample whose data is a JSON object.
#[derive(Debug, Clone)]
pub struct DictSample {
    id: SampleId,
    data: Map<String, Value>,
}

impl DictSample {
    /// Creates a sample with an explicit id.
    #[must_use]
    pub fn new(id: impl Into<SampleId>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Builds a sample from a JSON record.
    ///
    /// The id is taken from the record's `"id"` field when present, and
    /// falls back to the record's position otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::Invalid`] if the record is not an object.
    pub fn from_record(index: usize, record: Value) -> Result<Self, SampleError> {
        let Value::Object(data) = record else {
            return Err(SampleError::Invalid {
                index,
                reason: "record is not a JSON object".to_string(),
            });
        };
        let id = match data.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => {
                return Err(SampleError::Invalid {
                    index,
                    reason: "'id' must be a string or a number".to_string(),
                })
            }
            None => index.to_string(),
        };
        Ok(Self { id, data })
    }

    /// Returns the underlying data.
    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

impl Sample for DictSample {
    fn id(&self) -> SampleId {
        self.id.clone()
    }

    fn lookup(&self, name: &str) -> Result<SampleData, SampleError> {
        self.data
            .get(name)
            .cloned()
            .ok_or_else(|| SampleError::not_found(&self.id, name))
    }
}

/// A dataset held in memory as a list of samples.
#[derive(Debug, Clone, Default)]
pub struct ListDataset {
    samples: Vec<Arc<dyn Sample>>,
    dataset_data: Map<String, Value>,
}

impl ListDataset {
    /// Creates a dataset from samples.
    #[must_use]
    pub fn new(samples: Vec<Arc<dyn Sample>>) -> Self {
        Self {
            samples,
            dataset_data: Map::new(),
        }
    }

    /// Creates a dataset from JSON records, wrapping each in a [`DictSample`].
    ///
    /// # Errors
    ///
    /// Returns an error if a record is not a JSON object.
    pub fn from_records(records: Vec<Value>) -> Result<Self, SampleError> {
        let samples = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                DictSample::from_record(i, record).map(|s| Arc::new(s) as Arc<dyn Sample>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(samples))
    }

    /// Attaches a dataset-wide value.
    #[must_use]
    pub fn with_dataset_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.dataset_data.insert(name.into(), value);
        self
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Dataset for ListDataset {
    fn samples(&self) -> Box<dyn Iterator<Item = Arc<dyn Sample>> + '_> {
        Box::new(self.samples.iter().cloned())
    }

    fn sample_count(&self) -> Option<usize> {
        Some(self.samples.len())
    }

    fn lookup(&self, name: &str) -> Result<SampleData, SampleError> {
        self.dataset_data
            .get(name)
            .cloned()
            .ok_or_else(|| SampleError::DatasetNotFound {
                name: name.to_string(),
            })
    }
}
