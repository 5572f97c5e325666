//! Pool of pre-allocated, reference-counted objects (§4.3).
//!
//! An object is "available" exactly when its `Arc` strong count has decayed
//! back to 1, meaning only the pool itself still holds a handle. Handing one
//! out is just cloning that `Arc`; there is no explicit "return to pool"
//! call — reclamation happens purely from the caller dropping its clone.
//! Grounded on the teacher's `src/core/engine/garbage.rs` sweep-for-refcount
//! pattern and on Dropseed's `SharedAudioBuffer` (plain `Arc<T>`, no custom
//! refcount type).

use std::sync::Arc;

/// A pool of `Arc<T>` handles, reused once their outstanding clones are
/// dropped. `T::default()` is used to mint new entries; callers must
/// overwrite stale content themselves after acquiring one (§4.3 invariant).
pub struct RefCountedPool<T> {
    entries: Vec<Arc<T>>,
}

impl<T: Default> RefCountedPool<T> {
    pub fn new() -> Self {
        RefCountedPool {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(initial: usize) -> Self {
        let mut entries = Vec::with_capacity(initial);
        for _ in 0..initial {
            entries.push(Arc::new(T::default()));
        }
        RefCountedPool { entries }
    }

    /// Number of entries currently held by the pool (in use or not).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Linear scan for an entry whose only owner is the pool. Pool sizes in
    /// this domain are small (tens of entries), so a scan beats the
    /// bookkeeping of a free-list (§9).
    fn find_available(&self) -> Option<usize> {
        self.entries.iter().position(|e| Arc::strong_count(e) == 1)
    }

    /// Non-realtime path (control thread): reuse an available entry, or
    /// allocate and append a new one if none is free.
    pub fn allocate(&mut self) -> Arc<T> {
        if let Some(i) = self.find_available() {
            return self.entries[i].clone();
        }
        let entry = Arc::new(T::default());
        self.entries.push(entry.clone());
        entry
    }

    /// Realtime-safe path (audio thread): never allocates. Returns `None`
    /// if nothing is available, leaving the caller to fall back to a
    /// caller-supplied default rather than block or allocate.
    pub fn try_allocate(&self) -> Option<Arc<T>> {
        self.find_available().map(|i| self.entries[i].clone())
    }

    /// Count of entries currently available (strong count == 1).
    pub fn available_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| Arc::strong_count(e) == 1)
            .count()
    }
}

impl<T: Default> Default for RefCountedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_entry_once_strong_count_drops_to_one() {
        let mut pool: RefCountedPool<Vec<f32>> = RefCountedPool::new();
        let a = pool.allocate();
        assert_eq!(pool.len(), 1);
        drop(a);
        let b = pool.allocate();
        assert_eq!(pool.len(), 1, "should reuse rather than grow");
        drop(b);
    }

    #[test]
    fn grows_when_nothing_is_available() {
        let mut pool: RefCountedPool<Vec<f32>> = RefCountedPool::new();
        let a = pool.allocate();
        let b = pool.allocate();
        assert_eq!(pool.len(), 2);
        drop(a);
        drop(b);
    }

    #[test]
    fn try_allocate_never_grows() {
        let pool: RefCountedPool<Vec<f32>> = RefCountedPool::new();
        assert!(pool.try_allocate().is_none());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn freshly_dealt_entries_may_contain_stale_content() {
        let mut pool: RefCountedPool<Vec<f32>> = RefCountedPool::new();
        let a = pool.allocate();
        drop(a);
        let mut b = pool.allocate();
        Arc::get_mut(&mut b).unwrap().push(1.0);
        drop(b);
        let c = pool.allocate();
        assert_eq!(*c, vec![1.0], "pool does not clear entries on reuse");
    }
}
