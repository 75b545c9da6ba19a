//! Shared scan progress: a snapshot readable from any thread while workers
//! update it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::core::types::ScanProgress;

/// Thread-safe progress cell shared between workers and observers.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<ScanProgress>>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total_roots: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScanProgress {
                total_roots,
                started_at: Some(Utc::now()),
                ..ScanProgress::default()
            })),
        }
    }

    /// Current snapshot by value.
    #[must_use]
    pub fn snapshot(&self) -> ScanProgress {
        self.inner.lock().clone()
    }

    pub fn set_current_path(&self, path: PathBuf) {
        self.inner.lock().current_path = Some(path);
    }

    pub fn record_item(&self, bytes: u64) {
        let mut p = self.inner.lock();
        p.items_found += 1;
        p.bytes_seen = p.bytes_seen.saturating_add(bytes);
    }

    pub fn root_completed(&self) {
        self.inner.lock().completed_roots += 1;
    }

    pub fn mark_cancelled(&self) {
        self.inner.lock().cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_counts_and_bytes() {
        let tracker = ProgressTracker::new(3);
        tracker.record_item(100);
        tracker.record_item(50);
        tracker.root_completed();

        let snap = tracker.snapshot();
        assert_eq!(snap.total_roots, 3);
        assert_eq!(snap.completed_roots, 1);
        assert_eq!(snap.items_found, 2);
        assert_eq!(snap.bytes_seen, 150);
        assert!(!snap.cancelled);
    }

    #[test]
    fn cancel_is_visible_in_snapshot() {
        let tracker = ProgressTracker::new(1);
        tracker.mark_cancelled();
        assert!(tracker.snapshot().cancelled);
    }
}
