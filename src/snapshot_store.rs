use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::snapshot::Snapshot;

/// `SnapshotStore` publishes the current [`Snapshot`] to concurrent readers.
///
/// Reads take no lock: a reader gets an `Arc` to a complete snapshot and keeps it for as long as
/// it needs, while the poller publishes replacements with a single pointer swap.
pub struct SnapshotStore {
    snapshot: ArcSwap<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::empty())
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Publish `snapshot`, returning the previous one.
    pub fn store(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let new_value = Arc::new(snapshot);
        self.snapshot.swap(new_value)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
