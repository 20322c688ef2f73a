//! # Featgraph
//!
//! A feature-extraction engine built on a shared, cached computation graph.
//!
//! Pipelines are declared as chains of processors running from named inputs
//! to named features. Every pipeline is merged into one extraction DAG in
//! which identical sub-computations are shared, so each is computed once
//! per sample and its value cached only until every reader has consumed it.
//!
//! - **Structural sharing**: nodes are identified by their processor
//!   identity and full lineage
//! - **Feature dependencies**: a pipeline may start from another pipeline's
//!   feature
//! - **Dataset-wide steps**: batch processors see the whole dataset first,
//!   aggregators reduce it to one value
//! - **Error policy**: per-sample failures are skipped and recorded, or
//!   abort the run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featgraph::prelude::*;
//!
//! let mut extractor = Extractor::default();
//! extractor.add_extraction(
//!     input("a").then(FnProcessor::unary("double", double))?.then(feat("double"))?,
//!     false,
//! )?;
//!
//! let dataset = ListDataset::from_records(vec![json!({"a": 1}), json!({"a": 2})])?;
//! let (storage, report) = extractor.extract_to_dict(Arc::new(dataset))?;
//! assert_eq!(storage.to_json(), json!({"0": {"double": 2}, "1": {"double": 4}}));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod core;
pub mod dag;
pub mod errors;
pub mod extractor;
pub mod graph;
pub mod observability;
pub mod pipeline;
pub mod processors;
pub mod samples;
pub mod storage;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ExtractionOrder, ExtractionPolicy, ExtractorConfig, StorageIndexing};
    pub use crate::core::{FeatureName, ParamValue, ProcessorIdentity, SampleData, SampleId};
    pub use crate::dag::{DagState, ExtractionDag, FailureRecord, FeatureSelection};
    pub use crate::errors::{
        CycleDetectedError, DependencyError, DuplicateSampleError, FeatgraphError,
        PipelineBuildError, ProcessingError, SampleError,
    };
    pub use crate::extractor::{ExtractionReport, Extractor};
    pub use crate::graph::{NodeId, DATASET_SCOPE_ID};
    pub use crate::pipeline::Fragment;
    pub use crate::processors::{
        ds_feat, ds_input, feat, input, Arity, BatchProcessor, DatasetAggregator, FnAggregator,
        FnProcessor, ListMap, NodeKind, ProcessContext, Processor, SampleProcessor, Scope,
    };
    pub use crate::samples::{Dataset, DictSample, ListDataset, Sample};
    pub use crate::storage::{DictStorage, JsonStorage, StorageSink};
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
