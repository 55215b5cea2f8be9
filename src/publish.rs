//! Atomic publication of immutable, shared state.
//!
//! A [`Published`] slot holds the current `Arc<T>`. Writers build a new
//! value off to the side and swap it in under a short write lock; readers
//! clone the `Arc` once and keep using their snapshot even if the slot is
//! replaced or cleared meanwhile.
//!
//! # Thread Safety
//! The lock is held only for the `Arc` clone or swap, never during
//! evaluation, so reconfiguration never blocks evaluators for longer than a
//! pointer copy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub struct Published<T> {
    slot: RwLock<Option<Arc<T>>>,
    generation: AtomicU64,
}

impl<T> Default for Published<T> {
    fn default() -> Self {
        Self {
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T> Published<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current value.
    pub fn load(&self) -> Option<Arc<T>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current value, returning the previous one.
    pub fn store(&self, value: Arc<T>) -> Option<Arc<T>> {
        let previous = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value);
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous
    }

    /// Empty the slot. Outstanding snapshots stay valid until dropped.
    pub fn clear(&self) -> Option<Arc<T>> {
        let previous = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Number of stores and clears so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_survives_clear() {
        let published = Published::new();
        assert!(published.load().is_none());

        published.store(Arc::new(vec![1, 2, 3]));
        let snapshot = published.load().unwrap();
        published.clear();

        assert!(published.is_empty());
        assert_eq!(*snapshot, vec![1, 2, 3]);
        assert_eq!(published.generation(), 2);
    }

    #[test]
    fn test_store_returns_previous() {
        let published = Published::new();
        assert!(published.store(Arc::new("a")).is_none());
        assert_eq!(published.store(Arc::new("b")).as_deref(), Some(&"a"));
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let published = Arc::new(Published::new());
        published.store(Arc::new((0u64, 0u64)));

        let writer = {
            let published = Arc::clone(&published);
            thread::spawn(move || {
                for i in 1..=1000u64 {
                    published.store(Arc::new((i, i)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let published = Arc::clone(&published);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let value = published.load().unwrap();
                        assert_eq!(value.0, value.1);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(published.generation(), 1001);
    }
}
