//! Extraction run reports.

use crate::config::ExtractionOrder;
use crate::core::{FeatureName, SampleId};
use crate::dag::FailureRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Summary of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Unique id of the run, also attached to its tracing span.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: Option<DateTime<Utc>>,
    /// Traversal order used.
    pub extraction_order: ExtractionOrder,
    /// Features handed to storage.
    pub features: Vec<FeatureName>,
    /// Samples traversed.
    pub sample_count: usize,
    /// Sample/feature cells left out because the sample was bad.
    pub skipped_cells: usize,
    /// Samples abandoned after exceeding the per-sample timeout.
    pub timed_out: Vec<SampleId>,
    /// Failure origins recorded under a skip-errors policy.
    pub failures: Vec<FailureRecord>,
}

impl ExtractionReport {
    pub(crate) fn start(extraction_order: ExtractionOrder, features: Vec<FeatureName>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            extraction_order,
            features,
            sample_count: 0,
            skipped_cells: 0,
            timed_out: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn complete(&mut self, failures: Vec<FailureRecord>) {
        self.failures.extend(failures);
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration of the run, once finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Returns true if nothing was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped_cells == 0 && self.failures.is_empty() && self.timed_out.is_empty()
    }

    /// Ids of every sample that failed somewhere, sorted.
    #[must_use]
    pub fn failed_samples(&self) -> BTreeSet<SampleId> {
        self.failures
            .iter()
            .map(|f| f.sample_id.clone())
            .chain(self.timed_out.iter().cloned())
            .collect()
    }
}
