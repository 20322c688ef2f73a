//! Tracing setup and span helpers for extraction runs.

use crate::errors::FeatgraphError;
use std::time::Instant;
use tracing::Span;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"featgraph=info"`).
///
/// # Errors
///
/// Returns [`FeatgraphError::Internal`] if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), FeatgraphError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|err| FeatgraphError::Internal(format!("invalid log filter: {err}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| FeatgraphError::Internal(format!("tracing already initialized: {err}")))
}

/// The span wrapping one extraction run.
#[must_use]
pub fn extraction_span(run_id: &Uuid, order: &str) -> Span {
    tracing::info_span!("extraction", run_id = %run_id, order)
}

/// Simple wall-clock timer for log fields.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("double");
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(timer.elapsed_ms() >= 5.0);
        assert_eq!(timer.name(), "double");
    }

    #[test]
    fn test_init_tracing_twice_fails_softly() {
        // The first call may race with other tests; the second never panics.
        let _ = init_tracing("featgraph=debug");
        assert!(init_tracing("featgraph=debug").is_err());
    }

    #[test]
    fn test_extraction_span_builds() {
        let span = extraction_span(&Uuid::new_v4(), "sample");
        let _entered = span.enter();
    }
}
