//! Testing utilities for featgraph pipelines.
//!
//! This module provides:
//! - Mock processors (counting, failing, slow, batch centering)
//! - A recording storage sink
//! - Dataset fixtures and small arithmetic processors
//! - Assertions over stored results and failure records

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_failed_at, assert_missing, assert_stored};
pub use fixtures::{add, field_dataset, numbers_dataset, plus_one, shared, times_two};
pub use mocks::{
    CountingProcessor, FailingProcessor, MeanCenter, RecordingSink, SinkCall, SlowProcessor,
};
