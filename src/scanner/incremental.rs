//! Incremental scan index: per-root last-scan timestamps persisted as one
//! JSON document. Updates are write-then-rename so a crash never leaves a
//! torn file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{CmError, Result};
use crate::core::paths::canonical_scan_path;

/// Per-root scan record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    pub last_scan_at: DateTime<Utc>,
    pub scan_count: u64,
    pub file_count: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexDoc {
    roots: BTreeMap<String, RootRecord>,
}

/// Keyed store `normalize(root) → last_scan_at` with an optional
/// minimum-interval guard.
///
/// Keys are OS-native normalized absolute paths: no lowercasing, so roots on
/// case-sensitive filesystems never collide.
#[derive(Debug)]
pub struct IncrementalIndex {
    path: PathBuf,
    min_interval_secs: u64,
    doc: Mutex<IndexDoc>,
}

impl IncrementalIndex {
    /// Open (or initialize) the index document at `path`.
    pub fn open(path: &Path, min_interval_secs: u64) -> Result<Self> {
        let doc = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|e| CmError::io(path, e))?;
            serde_json::from_str(&raw)?
        } else {
            IndexDoc::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            min_interval_secs,
            doc: Mutex::new(doc),
        })
    }

    fn key(root: &Path) -> String {
        canonical_scan_path(root).to_string_lossy().into_owned()
    }

    /// Last successful scan time for a root, if any.
    #[must_use]
    pub fn last_scan_at(&self, root: &Path) -> Option<DateTime<Utc>> {
        self.doc
            .lock()
            .roots
            .get(&Self::key(root))
            .map(|r| r.last_scan_at)
    }

    /// Minimum-interval guard: false when the root was scanned more recently
    /// than the configured interval (the scan should be a no-op).
    #[must_use]
    pub fn should_scan(&self, root: &Path, now: DateTime<Utc>) -> bool {
        self.last_scan_at(root).is_none_or(|at| {
            (now - at).num_seconds() >= i64::try_from(self.min_interval_secs).unwrap_or(i64::MAX)
        })
    }

    /// Record a successful scan of `root` and persist atomically.
    pub fn mark_scanned(
        &self,
        root: &Path,
        scanned_at: DateTime<Utc>,
        file_count: u64,
        total_size: u64,
    ) -> Result<()> {
        let mut doc = self.doc.lock();
        let entry = doc
            .roots
            .entry(Self::key(root))
            .or_insert_with(|| RootRecord {
                last_scan_at: scanned_at,
                scan_count: 0,
                file_count: 0,
                total_size: 0,
            });
        entry.last_scan_at = scanned_at;
        entry.scan_count += 1;
        entry.file_count = file_count;
        entry.total_size = total_size;
        Self::persist(&self.path, &doc)
    }

    /// Drop one root's record, or the whole index when `root` is `None`.
    pub fn clear(&self, root: Option<&Path>) -> Result<()> {
        let mut doc = self.doc.lock();
        match root {
            Some(r) => {
                doc.roots.remove(&Self::key(r));
            }
            None => doc.roots.clear(),
        }
        Self::persist(&self.path, &doc)
    }

    /// All per-root stats (for speedup estimation in front-ends).
    #[must_use]
    pub fn all_records(&self) -> BTreeMap<String, RootRecord> {
        self.doc.lock().roots.clone()
    }

    fn persist(path: &Path, doc: &IndexDoc) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CmError::io(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(doc)?;
        fs::write(&tmp, raw).map_err(|e| CmError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| CmError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir, min_interval: u64) -> IncrementalIndex {
        IncrementalIndex::open(&dir.path().join("incremental_history.json"), min_interval)
            .unwrap()
    }

    #[test]
    fn unknown_root_has_no_timestamp_and_should_scan() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 60);
        assert!(idx.last_scan_at(Path::new("/data/x")).is_none());
        assert!(idx.should_scan(Path::new("/data/x"), Utc::now()));
    }

    #[test]
    fn mark_scanned_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("incremental_history.json");
        let when = Utc::now();
        {
            let idx = IncrementalIndex::open(&file, 60).unwrap();
            idx.mark_scanned(Path::new("/data/x"), when, 42, 4096).unwrap();
        }
        let reopened = IncrementalIndex::open(&file, 60).unwrap();
        let at = reopened.last_scan_at(Path::new("/data/x")).unwrap();
        assert_eq!(at.timestamp_millis(), when.timestamp_millis());
        let records = reopened.all_records();
        let rec = records.values().next().unwrap();
        assert_eq!(rec.file_count, 42);
        assert_eq!(rec.total_size, 4096);
        assert_eq!(rec.scan_count, 1);
    }

    #[test]
    fn min_interval_guard_suppresses_fast_rescan() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 60);
        let now = Utc::now();
        idx.mark_scanned(Path::new("/data/x"), now, 0, 0).unwrap();

        assert!(!idx.should_scan(Path::new("/data/x"), now + chrono::Duration::seconds(5)));
        assert!(idx.should_scan(Path::new("/data/x"), now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn zero_interval_never_suppresses() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 0);
        let now = Utc::now();
        idx.mark_scanned(Path::new("/data/x"), now, 0, 0).unwrap();
        assert!(idx.should_scan(Path::new("/data/x"), now));
    }

    #[test]
    fn clear_single_root_keeps_others() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 60);
        let now = Utc::now();
        idx.mark_scanned(Path::new("/a"), now, 0, 0).unwrap();
        idx.mark_scanned(Path::new("/b"), now, 0, 0).unwrap();

        idx.clear(Some(Path::new("/a"))).unwrap();
        assert!(idx.last_scan_at(Path::new("/a")).is_none());
        assert!(idx.last_scan_at(Path::new("/b")).is_some());

        idx.clear(None).unwrap();
        assert!(idx.all_records().is_empty());
    }

    #[test]
    fn keys_preserve_case() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 60);
        let now = Utc::now();
        idx.mark_scanned(Path::new("/data/Mixed"), now, 0, 0).unwrap();
        // On a case-sensitive filesystem these are distinct roots.
        #[cfg(not(windows))]
        assert!(idx.last_scan_at(Path::new("/data/mixed")).is_none());
        assert!(idx.last_scan_at(Path::new("/data/Mixed")).is_some());
    }

    #[test]
    fn scan_count_accumulates() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 0);
        for _ in 0..3 {
            idx.mark_scanned(Path::new("/r"), Utc::now(), 1, 1).unwrap();
        }
        assert_eq!(idx.all_records().values().next().unwrap().scan_count, 3);
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let idx = index_in(&tmp, 60);
        idx.mark_scanned(Path::new("/r"), Utc::now(), 0, 0).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
