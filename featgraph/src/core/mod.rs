//! Core domain model types for featgraph.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Sample values and identifiers
//! - Hashable processor parameters
//! - Processor identity and structural keys

mod identity;
mod value;

pub use identity::{IdentityKey, ProcessorIdentity};
pub use value::{FeatureName, ParamValue, SampleData, SampleId};
