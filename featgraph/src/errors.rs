//! Error types for the featgraph engine.
//!
//! Build errors are raised while fragments and the extraction DAG are being
//! assembled, before any data is touched. Per-sample failures are handled by
//! the pull protocol and only surface here when the run is strict.

use crate::core::SampleId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for featgraph operations.
#[derive(Debug, Error)]
pub enum FeatgraphError {
    /// A fragment or DAG could not be built.
    #[error("{0}")]
    Build(#[from] PipelineBuildError),

    /// A feature dependency could not be resolved.
    #[error("{0}")]
    Dependency(#[from] DependencyError),

    /// Dependency resolution would introduce a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// The same sample id was seen twice during one traversal.
    #[error("{0}")]
    DuplicateSample(#[from] DuplicateSampleError),

    /// A processor failed while the run was strict.
    #[error("{0}")]
    Processing(#[from] ProcessingError),

    /// A sample or dataset lookup failed.
    #[error("{0}")]
    Sample(#[from] SampleError),

    /// The named feature is not registered in the DAG.
    #[error("Unknown feature: '{0}'")]
    UnknownFeature(String),

    /// The DAG was used in the wrong lifecycle state.
    #[error("Invalid DAG state: expected {expected}, found {actual}")]
    InvalidState {
        /// The state the operation requires.
        expected: String,
        /// The state the DAG was in.
        actual: String,
    },

    /// A storage sink rejected or failed to write results.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeatgraphError {
    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<serde_json::Error> for FeatgraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Diagnostic metadata attached to build errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "BUILD-001-ARITY").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        let fix_hint = BuildSuggestions::get(&code).map(ToString::to_string);
        Self {
            code,
            summary: summary.into(),
            fix_hint,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Build error codes.
pub mod codes {
    /// A merge point or fan-in does not match the processor's arity.
    pub const ARITY: &str = "BUILD-001-ARITY";
    /// A feature name was registered twice.
    pub const DUPLICATE_FEATURE: &str = "BUILD-002-DUPLICATE_FEATURE";
    /// A processor parameter value cannot be hashed.
    pub const NON_HASHABLE: &str = "BUILD-003-NON_HASHABLE";
    /// Inputs, features or inner steps are in an illegal position.
    pub const MALFORMED: &str = "BUILD-004-MALFORMED";
    /// A dataset-wide value is merged with a per-sample branch.
    pub const SCOPE_MIX: &str = "BUILD-005-SCOPE_MIX";
    /// Hyperparameters are unset, or set with the wrong names.
    pub const HYPERPARAMETER: &str = "BUILD-006-HYPERPARAMETER";
}

/// Error raised while building a fragment or absorbing it into the DAG.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineBuildError {
    /// The error message.
    pub message: String,
    /// Labels of the nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl PipelineBuildError {
    /// Creates a new build error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Arity mismatch at a merge point.
    #[must_use]
    pub fn arity(node: impl Into<String>, expected: impl Into<String>, got: usize) -> Self {
        let node = node.into();
        let expected = expected.into();
        Self::new(format!(
            "Processor {node} accepts {expected} input(s) but is connected to {got}"
        ))
        .with_nodes(vec![node.clone()])
        .with_error_info(
            ErrorInfo::new(codes::ARITY, "Arity mismatch")
                .with_context_entry("node", node)
                .with_context_entry("got", got.to_string()),
        )
    }

    /// A feature name registered twice.
    #[must_use]
    pub fn duplicate_feature(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(format!("Feature '{name}' is already declared"))
            .with_nodes(vec![name.clone()])
            .with_error_info(
                ErrorInfo::new(codes::DUPLICATE_FEATURE, "Duplicate feature name")
                    .with_context_entry("feature", name),
            )
    }

    /// A non-hashable processor parameter.
    #[must_use]
    pub fn non_hashable(tag: impl Into<String>, param: impl Into<String>) -> Self {
        let tag = tag.into();
        let param = param.into();
        Self::new(format!(
            "Value for parameter '{param}' of processor {tag} isn't hashable"
        ))
        .with_nodes(vec![tag.clone()])
        .with_error_info(
            ErrorInfo::new(codes::NON_HASHABLE, "Non-hashable parameter")
                .with_context_entry("param", param),
        )
    }

    /// A node in an illegal position in a fragment.
    #[must_use]
    pub fn malformed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(format!("Malformed pipeline at {node}: {}", reason.into()))
            .with_nodes(vec![node])
            .with_error_info(ErrorInfo::new(codes::MALFORMED, "Malformed pipeline"))
    }

    /// A merge between a dataset-wide and a per-sample branch.
    #[must_use]
    pub fn scope_mix(node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(format!(
            "Processor {node} merges a dataset-wide value with a per-sample branch"
        ))
        .with_nodes(vec![node])
        .with_error_info(ErrorInfo::new(codes::SCOPE_MIX, "Mixed dataset/sample scopes"))
    }

    /// Extraction attempted while hyperparameters are unset.
    #[must_use]
    pub fn unset_hparams(names: &[String]) -> Self {
        Self::new(format!(
            "Hyperparameters {} still need to be set",
            names.join(", ")
        ))
        .with_error_info(
            ErrorInfo::new(codes::HYPERPARAMETER, "Unset hyperparameters")
                .with_context_entry("hparams", names.join(",")),
        )
    }

    /// Hyperparameter values that do not match the declared names.
    #[must_use]
    pub fn hparam_mismatch(expected: &[String], given: &[String]) -> Self {
        Self::new(format!(
            "Expected values for hyperparameters [{}], got [{}]",
            expected.join(", "),
            given.join(", ")
        ))
        .with_error_info(
            ErrorInfo::new(codes::HYPERPARAMETER, "Hyperparameter mismatch")
                .with_context_entry("expected", expected.join(","))
                .with_context_entry("given", given.join(",")),
        )
    }
}

/// Error raised when an input declared as a feature has no matching feature.
#[derive(Debug, Clone, Error)]
#[error("Cannot resolve feature dependency '{feature}': {reason}")]
pub struct DependencyError {
    /// The feature that was expected.
    pub feature: String,
    /// Why resolution failed.
    pub reason: String,
}

impl DependencyError {
    /// Creates a new dependency error.
    #[must_use]
    pub fn new(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when resolving a dependency would create a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in extraction graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The labels of the nodes forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Error raised when a sample id appears twice in one traversal.
#[derive(Debug, Clone, Error)]
#[error("Duplicate sample id '{sample_id}' in dataset")]
pub struct DuplicateSampleError {
    /// The duplicated id.
    pub sample_id: SampleId,
}

impl DuplicateSampleError {
    /// Creates a new duplicate sample error.
    #[must_use]
    pub fn new(sample_id: impl Into<SampleId>) -> Self {
        Self {
            sample_id: sample_id.into(),
        }
    }
}

/// A processor failure, annotated with the processor and the sample.
#[derive(Debug, Error)]
#[error("Processor {processor} failed on sample '{sample_id}': {source}")]
pub struct ProcessingError {
    /// Label of the failing processor.
    pub processor: String,
    /// The sample being processed.
    pub sample_id: SampleId,
    /// The original error.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl ProcessingError {
    /// Wraps a processor error.
    #[must_use]
    pub fn new(
        processor: impl Into<String>,
        sample_id: impl Into<SampleId>,
        source: anyhow::Error,
    ) -> Self {
        Self {
            processor: processor.into(),
            sample_id: sample_id.into(),
            source: source.into(),
        }
    }
}

/// Errors raised by sample and dataset lookups.
#[derive(Debug, Clone, Error)]
pub enum SampleError {
    /// The sample has no data under that name.
    #[error("Sample '{sample_id}' has no data named '{name}'")]
    NotFound {
        /// The sample id.
        sample_id: SampleId,
        /// The missing name.
        name: String,
    },

    /// The dataset has no dataset-wide data under that name.
    #[error("Dataset has no data named '{name}'")]
    DatasetNotFound {
        /// The missing name.
        name: String,
    },

    /// No dataset is bound to the DAG.
    #[error("No dataset bound to the extraction graph")]
    NoDataset,

    /// A raw record could not be turned into a sample.
    #[error("Invalid sample at index {index}: {reason}")]
    Invalid {
        /// Position of the record in the source list.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },
}

impl SampleError {
    /// Creates a sample lookup error.
    #[must_use]
    pub fn not_found(sample_id: impl Into<SampleId>, name: impl Into<String>) -> Self {
        Self::NotFound {
            sample_id: sample_id.into(),
            name: name.into(),
        }
    }
}

/// Default fix hints for build error codes.
pub struct BuildSuggestions;

impl BuildSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            codes::ARITY => Some(
                "Make the number of branches feeding a merge match the number of \
                 arguments the merging processor accepts.",
            ),
            codes::DUPLICATE_FEATURE => Some(
                "Feature names are global to an extraction graph. Rename one of the features.",
            ),
            codes::NON_HASHABLE => Some(
                "Processor parameters take scalars or tuples. Lists and maps cannot be \
                 used to identify a computation.",
            ),
            codes::MALFORMED => Some(
                "A pipeline starts with inputs (or features used as inputs) and ends with \
                 features; inputs and features cannot appear in between.",
            ),
            codes::SCOPE_MIX => Some(
                "Dataset-wide values can only be combined with per-sample values inside \
                 an aggregator.",
            ),
            codes::HYPERPARAMETER => Some(
                "Call set_hparams with exactly one value per name listed by hparams() \
                 before extracting.",
            ),
            _ => None,
        }
    }
}
