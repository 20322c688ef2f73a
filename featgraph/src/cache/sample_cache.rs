//! Reference-counted per-sample cache.

use super::CacheLookup;
use crate::core::{SampleData, SampleId};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::debug;

#[derive(Debug)]
struct CacheEntry {
    value: SampleData,
    remaining: usize,
}

/// Cache keyed by sample id whose entries are evicted after a fixed number
/// of reads.
///
/// Reads and writes on the same sample id are atomic, so concurrent pulls
/// for different samples (or racing pulls for the same one) never leave a
/// stale entry behind.
#[derive(Debug, Default)]
pub struct SampleCache {
    entries: DashMap<SampleId, CacheEntry>,
    failed: DashSet<SampleId>,
}

impl SampleCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `sample_id`, consuming one read.
    pub fn get(&self, sample_id: &str) -> CacheLookup {
        if self.failed.contains(sample_id) {
            return CacheLookup::Failed;
        }
        match self.entries.entry(sample_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let cached = entry.get_mut();
                let value = cached.value.clone();
                cached.remaining = cached.remaining.saturating_sub(1);
                if cached.remaining == 0 {
                    entry.remove();
                    debug!(sample_id, "evicted cache entry");
                }
                CacheLookup::Hit(value)
            }
            Entry::Vacant(_) => CacheLookup::Miss,
        }
    }

    /// Stores a value expected to be read `readers` times in total.
    ///
    /// The storing pull is the first read, so only `readers - 1` reads are
    /// kept. If an entry already exists (two pulls raced on a miss), the
    /// store counts as a read of the existing entry.
    pub fn put(&self, sample_id: &str, value: SampleData, readers: usize) {
        let remaining = readers.saturating_sub(1);
        match self.entries.entry(sample_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let cached = entry.get_mut();
                cached.remaining = cached.remaining.saturating_sub(1);
                if cached.remaining == 0 {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                if remaining > 0 {
                    entry.insert(CacheEntry { value, remaining });
                }
            }
        }
    }

    /// Returns true if the sample failed at this node.
    #[must_use]
    pub fn is_failed(&self, sample_id: &str) -> bool {
        self.failed.contains(sample_id)
    }

    /// Records a failure; any stored value is dropped.
    pub fn mark_failed(&self, sample_id: &str) {
        self.entries.remove(sample_id);
        self.failed.insert(sample_id.to_string());
    }

    /// Remaining reads for a stored value, if any.
    #[must_use]
    pub fn remaining(&self, sample_id: &str) -> Option<usize> {
        self.entries.get(sample_id).map(|entry| entry.remaining)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears values and failures.
    pub fn reset(&self) {
        self.entries.clear();
        self.failed.clear();
    }
}
