//! Last-known-position cache
//!
//! Holds the most recently accepted position per courier. Entries are
//! overwritten on every update and never expire; the last known
//! position stays visible to viewers for the process lifetime, even
//! after the courier disconnects.

use crate::domain::types::{CourierId, CourierPosition, PackageId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct CacheEntry {
    position: CourierPosition,
    /// Monotonic insertion sequence; recency tie-break for find_by_package
    seq: u64,
}

#[derive(Default)]
pub struct LocationCache {
    inner: RwLock<FxHashMap<CourierId, CacheEntry>>,
    next_seq: AtomicU64,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the cached position for a courier
    pub fn put(&self, courier_id: CourierId, position: CourierPosition) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.write().insert(courier_id, CacheEntry { position, seq });
    }

    pub fn get(&self, courier_id: CourierId) -> Option<CourierPosition> {
        self.inner.read().get(&courier_id).map(|entry| entry.position.clone())
    }

    /// Snapshot of every cached position, for newly joined office viewers.
    /// Order carries no meaning.
    pub fn list_all(&self) -> Vec<CourierPosition> {
        self.inner.read().values().map(|entry| entry.position.clone()).collect()
    }

    /// The cached position carrying this package, if any.
    ///
    /// At most one courier is expected per package; should several
    /// match, the most recently cached entry wins.
    pub fn find_by_package(&self, package_id: PackageId) -> Option<CourierPosition> {
        self.inner
            .read()
            .values()
            .filter(|entry| entry.position.package_id == Some(package_id))
            .max_by_key(|entry| entry.seq)
            .map(|entry| entry.position.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
