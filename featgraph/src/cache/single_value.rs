//! Single dataset-wide value cache.

use super::CacheLookup;
use crate::core::SampleData;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds at most one value for the whole dataset.
///
/// The value is kept until [`reset`](Self::reset); it is never evicted by
/// reads. The gate lets exactly one caller compute the value while others
/// wait for it.
#[derive(Debug, Default)]
pub struct SingleValueCache {
    value: RwLock<Option<SampleData>>,
    failed: AtomicBool,
    gate: Mutex<()>,
}

impl SingleValueCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value.
    pub fn get(&self) -> CacheLookup {
        if self.is_failed() {
            return CacheLookup::Failed;
        }
        match self.value.read().as_ref() {
            Some(value) => CacheLookup::Hit(value.clone()),
            None => CacheLookup::Miss,
        }
    }

    /// Stores the value.
    pub fn put(&self, value: SampleData) {
        *self.value.write() = Some(value);
    }

    /// Returns true if computing the value failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Records that computing the value failed.
    pub fn mark_failed(&self) {
        *self.value.write() = None;
        self.failed.store(true, Ordering::Release);
    }

    /// Returns true if a value is stored.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.read().is_some()
    }

    /// Clears the value and the failure flag.
    pub fn reset(&self) {
        *self.value.write() = None;
        self.failed.store(false, Ordering::Release);
    }

    pub(crate) fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }
}
