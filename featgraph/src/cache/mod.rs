//! Per-node result caches.
//!
//! Every graph node owns one cache. Per-sample nodes use a [`SampleCache`]
//! whose entries are evicted once every reader has consumed them; nodes that
//! hold a single dataset-wide value use a [`SingleValueCache`].

mod sample_cache;
mod single_value;

pub use sample_cache::SampleCache;
pub use single_value::SingleValueCache;

use crate::core::SampleData;
use parking_lot::MutexGuard;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A stored value.
    Hit(SampleData),
    /// The sample already failed at this node.
    Failed,
    /// Nothing stored.
    Miss,
}

/// The cache attached to a graph node.
#[derive(Debug)]
pub enum NodeCache {
    /// Reference-counted cache keyed by sample id.
    Sample(SampleCache),
    /// One value for the whole dataset.
    Single(SingleValueCache),
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::Sample(SampleCache::new())
    }
}

impl NodeCache {
    /// Creates a single-value cache.
    #[must_use]
    pub fn single() -> Self {
        Self::Single(SingleValueCache::new())
    }

    /// Returns true for a single-value cache.
    #[must_use]
    pub fn is_single_value(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// Looks up (and, for per-sample caches, consumes one read of) a value.
    pub fn get(&self, sample_id: &str) -> CacheLookup {
        match self {
            Self::Sample(cache) => cache.get(sample_id),
            Self::Single(cache) => cache.get(),
        }
    }

    /// Stores a freshly computed value. `readers` is the total number of
    /// reads expected for it, the storing pull included.
    pub fn put(&self, sample_id: &str, value: SampleData, readers: usize) {
        match self {
            Self::Sample(cache) => cache.put(sample_id, value, readers),
            Self::Single(cache) => cache.put(value),
        }
    }

    /// Returns true if the sample already failed at this node.
    #[must_use]
    pub fn is_failed(&self, sample_id: &str) -> bool {
        match self {
            Self::Sample(cache) => cache.is_failed(sample_id),
            Self::Single(cache) => cache.is_failed(),
        }
    }

    /// Records a failure for the sample.
    pub fn mark_failed(&self, sample_id: &str) {
        match self {
            Self::Sample(cache) => cache.mark_failed(sample_id),
            Self::Single(cache) => cache.mark_failed(),
        }
    }

    /// Clears all stored values and failures.
    pub fn reset(&self) {
        match self {
            Self::Sample(cache) => cache.reset(),
            Self::Single(cache) => cache.reset(),
        }
    }

    /// Number of values currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Sample(cache) => cache.len(),
            Self::Single(cache) => usize::from(cache.has_value()),
        }
    }

    /// Returns true if no value is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes computation of a single value. Per-sample caches have no
    /// gate.
    pub(crate) fn compute_gate(&self) -> Option<MutexGuard<'_, ()>> {
        match self {
            Self::Sample(_) => None,
            Self::Single(cache) => Some(cache.gate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_per_sample() {
        let cache = NodeCache::default();
        assert!(!cache.is_single_value());
        assert!(cache.compute_gate().is_none());
    }

    #[test]
    fn test_single_ignores_sample_id() {
        let cache = NodeCache::single();
        cache.put("0", json!(5), 1);

        assert_eq!(cache.get("1"), CacheLookup::Hit(json!(5)));
        assert_eq!(cache.get("2"), CacheLookup::Hit(json!(5)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reset_clears_failures() {
        let cache = NodeCache::default();
        cache.mark_failed("3");
        assert_eq!(cache.get("3"), CacheLookup::Failed);

        cache.reset();
        assert_eq!(cache.get("3"), CacheLookup::Miss);
        assert!(cache.is_empty());
    }
}
