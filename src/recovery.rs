//! Recovery manager: query the recovery log, restore single items or
//! batches, extract manifest backups, and reap expired backups.
//!
//! Usable without the rest of the pipeline: it needs only the database and
//! the backup area.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use filetime::FileTime;

use crate::backup::manifest::{BackupManifest, extract_archive};
use crate::backup::reaper::{ReapReport, cleanup_old_backups};
use crate::backup::store::BackupStore;
use crate::core::errors::{CmError, Result};
use crate::store::db::{Database, RecoveryFilter, RecoveryRow};

/// Result of a batch restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRestoreReport {
    pub restored: Vec<PathBuf>,
    /// Rows skipped because they were already restored (idempotence).
    pub already_restored: usize,
    /// Rows with no backup to restore from.
    pub unrestorable: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Queries manifests and the recovery log; copies backups back into place.
pub struct RecoveryManager {
    db: Arc<Database>,
    backups: BackupStore,
}

impl RecoveryManager {
    pub fn new(db: Arc<Database>, backups: BackupStore) -> Self {
        Self { db, backups }
    }

    /// Paginated recovery history, newest first.
    pub fn history(
        &self,
        filter: &RecoveryFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<RecoveryRow>> {
        let page_size = page_size.max(1);
        self.db
            .query_recovery(filter, page_size, page.saturating_mul(page_size))
    }

    /// Case-insensitive substring search over original and backup paths.
    pub fn search(&self, keyword: &str) -> Result<Vec<RecoveryRow>> {
        self.db.search_recovery(keyword)
    }

    /// Restore one backup to its original path (or `destination`).
    ///
    /// Recreates parent directories, copies the file or directory back, and
    /// marks the row restored.
    pub fn restore(&self, recovery_id: i64, destination: Option<&Path>) -> Result<PathBuf> {
        let row = self
            .db
            .get_recovery_row(recovery_id)?
            .ok_or_else(|| CmError::Runtime {
                details: format!("no recovery row with id {recovery_id}"),
            })?;

        let backup_path = row.backup_path.as_ref().ok_or_else(|| CmError::FileNotFound {
            path: row.original_path.clone(),
        })?;
        if !backup_path.exists() {
            return Err(CmError::FileNotFound {
                path: backup_path.clone(),
            });
        }

        let target = destination.map_or_else(|| row.original_path.clone(), Path::to_path_buf);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| CmError::io(parent, e))?;
        }

        if backup_path.is_dir() {
            copy_dir(backup_path, &target)?;
        } else {
            fs::copy(backup_path, &target).map_err(|e| CmError::io(backup_path, e))?;
            if let Ok(meta) = fs::metadata(backup_path) {
                let _ = filetime::set_file_mtime(
                    &target,
                    FileTime::from_last_modification_time(&meta),
                );
            }
        }

        self.db.mark_restored(recovery_id)?;
        Ok(target)
    }

    /// Restore every row whose plan item ended `Failed`. Idempotent: rows
    /// already restored are counted and skipped. One bad row never aborts
    /// the batch.
    pub fn restore_failed_items(&self, plan_id: Option<&str>) -> Result<BatchRestoreReport> {
        let rows = self.db.failed_item_recovery_rows(plan_id)?;
        let mut report = BatchRestoreReport::default();

        for row in rows {
            if row.restored {
                report.already_restored += 1;
                continue;
            }
            if row.backup_path.is_none() {
                report.unrestorable += 1;
                continue;
            }
            match self.restore(row.id, None) {
                Ok(path) => report.restored.push(path),
                Err(err) => report
                    .failures
                    .push((row.original_path.clone(), err.to_string())),
            }
        }
        Ok(report)
    }

    /// Restore entries from a manifest backup. Extracts the ZIP into a temp
    /// directory, copies the listed entries (or all of them), and restores
    /// permissions best-effort. Returns success per original path.
    pub fn restore_from_manifest(
        &self,
        manifest: &BackupManifest,
        paths: Option<&[PathBuf]>,
    ) -> Result<BTreeMap<PathBuf, bool>> {
        let staging = tempfile::tempdir().map_err(|e| CmError::io(Path::new("."), e))?;
        extract_archive(manifest, staging.path())?;

        let mut outcome = BTreeMap::new();
        for entry in manifest.files.iter().filter(|e| !e.is_dir) {
            let original = PathBuf::from(&entry.original_path);
            if let Some(wanted) = paths
                && !wanted.contains(&original)
            {
                continue;
            }

            let staged = staging.path().join(&entry.relative_backup_path);
            let ok = restore_one(&staged, &original, entry.permissions, entry.mtime);
            outcome.insert(original, ok);
        }
        Ok(outcome)
    }

    /// Reap expired backups, then null the `backup_path` of affected rows.
    /// The audit rows themselves outlive recoverability.
    pub fn cleanup_expired(
        &self,
        retention_days: u32,
        max_versions: Option<usize>,
    ) -> Result<ReapReport> {
        let report = cleanup_old_backups(&self.backups, retention_days, max_versions, Utc::now())?;
        self.db.null_backup_paths(&report.removed_paths)?;
        Ok(report)
    }
}

fn restore_one(staged: &Path, original: &Path, permissions: u32, mtime: i64) -> bool {
    if !staged.exists() {
        return false;
    }
    if let Some(parent) = original.parent()
        && fs::create_dir_all(parent).is_err()
    {
        return false;
    }
    if fs::copy(staged, original).is_err() {
        return false;
    }

    // Best-effort metadata restore; failure does not fail the entry.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(original, fs::Permissions::from_mode(permissions));
    }
    #[cfg(not(unix))]
    let _ = permissions;
    let _ = filetime::set_file_mtime(original, FileTime::from_unix_time(mtime, 0));
    true
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| CmError::io(dest, e))?;
    for entry in fs::read_dir(src).map_err(|e| CmError::io(src, e))? {
        let entry = entry.map_err(|e| CmError::io(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| CmError::io(&from, e))?;
        }
    }
    Ok(())
}
