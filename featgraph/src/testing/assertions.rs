//! Test assertions for extraction results.

use crate::dag::FailureRecord;
use crate::storage::DictStorage;
use serde_json::Value;

/// Asserts that a stored value equals `expected`.
pub fn assert_stored(storage: &DictStorage, sample_id: &str, feature: &str, expected: &Value) {
    let actual = storage.get(sample_id, feature);
    assert_eq!(
        actual,
        Some(expected),
        "Expected {feature} of sample {sample_id} to be {expected}, got {actual:?}"
    );
}

/// Asserts that no value was stored for a sample/feature cell.
pub fn assert_missing(storage: &DictStorage, sample_id: &str, feature: &str) {
    let actual = storage.get(sample_id, feature);
    assert!(
        actual.is_none(),
        "Expected no {feature} for sample {sample_id}, got {actual:?}"
    );
}

/// Asserts that a failure originating at `node` was recorded for
/// `sample_id`.
pub fn assert_failed_at(failures: &[FailureRecord], node: &str, sample_id: &str) {
    assert!(
        failures
            .iter()
            .any(|f| f.node == node && f.sample_id == sample_id),
        "Expected a failure at {node} for sample {sample_id}, got {failures:?}"
    );
}
