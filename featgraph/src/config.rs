//! Extraction configuration.

use crate::errors::FeatgraphError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy read by every node while an extraction is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractionPolicy {
    /// Turn processing errors into recorded per-sample failures instead of
    /// aborting the run.
    #[serde(default)]
    pub skip_errors: bool,
    /// Disable per-sample caching, trading memory for recomputation.
    #[serde(default)]
    pub no_cache: bool,
}

impl ExtractionPolicy {
    /// Creates the default (strict, cached) policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `skip_errors`.
    #[must_use]
    pub fn with_skip_errors(mut self, skip_errors: bool) -> Self {
        self.skip_errors = skip_errors;
        self
    }

    /// Sets `no_cache`.
    #[must_use]
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }
}

/// Order in which the dataset is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionOrder {
    /// One pass over the dataset per feature.
    Feature,
    /// One pass over the dataset, extracting every feature per sample.
    #[default]
    Sample,
}

/// How results are keyed when handed to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageIndexing {
    /// `feature -> sample -> value`.
    Feature,
    /// `sample -> feature -> value`.
    #[default]
    Sample,
}

/// Configuration of an [`Extractor`](crate::extractor::Extractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Error and cache policy.
    #[serde(flatten)]
    pub policy: ExtractionPolicy,
    /// Traversal order.
    #[serde(default)]
    pub extraction_order: ExtractionOrder,
    /// Result indexing for in-memory storage.
    #[serde(default)]
    pub storage_indexing: StorageIndexing,
    /// Worker count used by the concurrent driver.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Optional per-sample timeout for the concurrent driver.
    #[serde(default)]
    pub sample_timeout_seconds: Option<f64>,
}

fn default_concurrency() -> usize {
    4
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            policy: ExtractionPolicy::default(),
            extraction_order: ExtractionOrder::default(),
            storage_indexing: StorageIndexing::default(),
            concurrency: default_concurrency(),
            sample_timeout_seconds: None,
        }
    }
}

impl ExtractorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, FeatgraphError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values are usable.
    pub fn validate(&self) -> Result<(), FeatgraphError> {
        if self.concurrency == 0 {
            return Err(FeatgraphError::Internal(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.sample_timeout_seconds {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(FeatgraphError::Internal(format!(
                    "sample_timeout_seconds must be positive, got {secs}"
                )));
            }
        }
        Ok(())
    }

    /// Sets the whole policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets `skip_errors`.
    #[must_use]
    pub fn with_skip_errors(mut self, skip_errors: bool) -> Self {
        self.policy.skip_errors = skip_errors;
        self
    }

    /// Sets `no_cache`.
    #[must_use]
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.policy.no_cache = no_cache;
        self
    }

    /// Sets the traversal order.
    #[must_use]
    pub fn with_extraction_order(mut self, order: ExtractionOrder) -> Self {
        self.extraction_order = order;
        self
    }

    /// Sets the storage indexing.
    #[must_use]
    pub fn with_storage_indexing(mut self, indexing: StorageIndexing) -> Self {
        self.storage_indexing = indexing;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the per-sample timeout.
    #[must_use]
    pub fn with_sample_timeout(mut self, seconds: f64) -> Self {
        self.sample_timeout_seconds = Some(seconds);
        self
    }

    /// Gets the per-sample timeout as a Duration.
    #[must_use]
    pub fn sample_timeout(&self) -> Option<Duration> {
        self.sample_timeout_seconds.map(Duration::from_secs_f64)
    }
}
