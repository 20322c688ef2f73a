//! Observability utilities.

mod tracing;

pub use self::tracing::{extraction_span, init_tracing, SpanTimer};
