//! The published "current index" handle.
//!
//! Readers clone the `Arc` under a short read lock and keep using that snapshot
//! for as long as they need it; a rebuild publishes a fully built index by
//! replacing the `Arc` under the write lock. Nobody mutates an index in place.
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::index::CorpusIndex;

#[derive(Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<CorpusIndex>>>,
    generation: AtomicU64,
}

impl IndexHandle {
    pub fn new() -> Self { Self::default() }

    /// Current snapshot, or `None` before the first publish.
    pub fn load(&self) -> Option<Arc<CorpusIndex>> {
        self.current.read().clone()
    }

    /// Replace the published snapshot; returns the new generation (1 for the
    /// first publish). In-flight readers keep their old `Arc`.
    pub fn publish(&self, index: CorpusIndex) -> u64 {
        let next = Arc::new(index);
        let previous = {
            let mut guard = self.current.write();
            let previous = guard.replace(next);
            self.generation.fetch_add(1, Ordering::AcqRel);
            previous
        };
        // Release the old snapshot outside the lock.
        drop(previous);
        self.generation()
    }

    pub fn generation(&self) -> u64 { self.generation.load(Ordering::Acquire) }

    pub fn is_ready(&self) -> bool { self.current.read().is_some() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CorpusIndexBuilder;
    use vdr_core::types::MultiVector;

    fn index_of(names: &[&str]) -> CorpusIndex {
        let mut b = CorpusIndexBuilder::new(1, "test");
        for n in names { b.push(n, &MultiVector::from_flat(1, vec![1.0]).unwrap()).unwrap(); }
        b.finish().unwrap()
    }

    #[test]
    fn readers_keep_their_snapshot_across_publish() {
        let handle = IndexHandle::new();
        assert!(!handle.is_ready());
        assert!(handle.load().is_none());

        assert_eq!(handle.publish(index_of(&["a.jpg"])), 1);
        let old = handle.load().unwrap();
        assert_eq!(handle.publish(index_of(&["b.jpg", "c.jpg"])), 2);

        assert_eq!(old.filename(0), Some("a.jpg"));
        assert_eq!(old.len(), 1);
        let new = handle.load().unwrap();
        assert_eq!(new.len(), 2);
        assert_eq!(handle.generation(), 2);
    }
}
