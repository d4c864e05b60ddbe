//! Reference-counted snapshots for state that is rebuilt wholesale and read per request.
//!
//! Readers clone the inner `Arc` once and keep a consistent view for the rest of the
//! request; writers swap in a complete replacement.

use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot; readers holding the old one are unaffected
    pub fn store(&self, value: T) {
        *self.current.write() = Arc::new(value);
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
