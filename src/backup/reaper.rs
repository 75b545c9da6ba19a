//! Retention reaper: deletes expired backups while the audit trail lives on.
//!
//! Manifests are reaped by age and, optionally, by keeping only the newest N
//! versions per profile. Legacy single-item backups under `hardlinks/` and
//! `full/` are reaped by file mtime. The reaper only touches the filesystem;
//! the recovery manager nulls `backup_path` on the affected rows afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

use crate::backup::manifest::BackupManifest;
use crate::backup::store::BackupStore;
use crate::core::errors::{CmError, Result};

/// What the reaper removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub manifests_deleted: usize,
    pub legacy_deleted: usize,
    pub bytes_reclaimed: u64,
    /// Backup file paths that no longer exist; the persistence layer nulls
    /// the matching `backup_path` columns.
    pub removed_paths: Vec<PathBuf>,
}

/// Delete manifests (and their ZIPs) past `retention_days`, or beyond the
/// newest `max_versions` per profile, plus legacy single-item backups by
/// mtime.
pub fn cleanup_old_backups(
    store: &BackupStore,
    retention_days: u32,
    max_versions: Option<usize>,
    now: DateTime<Utc>,
) -> Result<ReapReport> {
    let cutoff = now - Duration::days(i64::from(retention_days));
    let mut report = ReapReport::default();

    reap_manifests(store, cutoff, max_versions, &mut report)?;
    reap_legacy(store, cutoff, &mut report)?;

    Ok(report)
}

fn reap_manifests(
    store: &BackupStore,
    cutoff: DateTime<Utc>,
    max_versions: Option<usize>,
    report: &mut ReapReport,
) -> Result<()> {
    let dir = store.manifests_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CmError::io(&dir, e)),
    };

    // Group loadable manifests by profile; unreadable files are left alone.
    let mut by_profile: BTreeMap<String, Vec<(PathBuf, BackupManifest)>> = BTreeMap::new();
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        if path.extension().is_none_or(|e| e != "json") {
            continue;
        }
        if let Ok(manifest) = BackupManifest::load(&path) {
            let key = manifest
                .profile_id
                .clone()
                .unwrap_or_else(|| format!("__unprofiled__{}", manifest.manifest_id));
            by_profile.entry(key).or_default().push((path, manifest));
        }
    }

    for (_, mut group) in by_profile {
        // Newest first, for the max_versions window.
        group.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        for (index, (json_path, manifest)) in group.into_iter().enumerate() {
            let expired = manifest.created_at < cutoff;
            let beyond_window = max_versions.is_some_and(|keep| index >= keep);
            if !(expired || beyond_window) {
                continue;
            }

            if manifest.zip_path.exists() {
                let size = fs::metadata(&manifest.zip_path).map_or(0, |m| m.len());
                fs::remove_file(&manifest.zip_path)
                    .map_err(|e| CmError::io(&manifest.zip_path, e))?;
                report.bytes_reclaimed += size;
            }
            fs::remove_file(&json_path).map_err(|e| CmError::io(&json_path, e))?;
            report.removed_paths.push(manifest.zip_path.clone());
            report.manifests_deleted += 1;
        }
    }
    Ok(())
}

fn reap_legacy(
    store: &BackupStore,
    cutoff: DateTime<Utc>,
    report: &mut ReapReport,
) -> Result<()> {
    for dir in [store.hardlinks_dir(), store.full_dir()] {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(CmError::io(&dir, e)),
        };
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            let Ok(meta) = fs::symlink_metadata(&path) else {
                continue;
            };
            let mtime = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(cutoff);
            if mtime >= cutoff {
                continue;
            }

            let size = if meta.is_dir() {
                0
            } else {
                meta.len()
            };
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| CmError::io(&path, e))?;
            report.bytes_reclaimed += size;
            report.legacy_deleted += 1;
            report.removed_paths.push(path);
        }
    }
    Ok(())
}
