//! Failure bookkeeping for skip-errors runs.

use crate::core::SampleId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One processing failure that was turned into a skipped sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Label of the node where the failure originated.
    pub node: String,
    /// The failing sample.
    pub sample_id: SampleId,
    /// Error message.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        sample_id: impl Into<SampleId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            sample_id: sample_id.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Thread-safe collector of failure origins.
///
/// Only the node where a failure originates is recorded; descendants that
/// fail because a parent failed are not.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Mutex<Vec<FailureRecord>>,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure.
    pub fn record(&self, record: FailureRecord) {
        self.failures.lock().push(record);
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    /// Returns a copy of the recorded failures.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.failures.lock().clone()
    }

    /// Removes and returns the recorded failures.
    pub fn drain(&self) -> Vec<FailureRecord> {
        std::mem::take(&mut *self.failures.lock())
    }
}
