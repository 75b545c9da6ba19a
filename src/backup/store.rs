//! Backup store: `hardlinks/`, `full/`, and `manifests/` subtrees under one
//! root, with the strategy keyed on the item's final risk label.
//!
//! Safe items get no backup. Suspicious items get a hardlink (free until the
//! original is unlinked). Dangerous items get a full copy preserving mtime
//! and permissions. A failed hardlink degrades to a full copy.

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use md5::{Digest, Md5};

use crate::core::errors::{CmError, Result};
use crate::core::types::{BackupKind, RiskLabel};

/// Result of backing up one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemBackup {
    pub kind: BackupKind,
    pub backup_path: Option<PathBuf>,
    /// True when a hardlink was requested but a full copy was made instead.
    pub degraded: bool,
}

/// Aggregate numbers over the backup area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub hardlink_backups: usize,
    pub full_backups: usize,
    pub manifest_backups: usize,
    pub total_bytes: u64,
}

/// Filesystem backup area with a fixed layout.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Open (or create) the backup area at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        for sub in ["hardlinks", "full", "manifests"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|e| CmError::io(&dir, e))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hardlinks_dir(&self) -> PathBuf {
        self.root.join("hardlinks")
    }

    pub fn full_dir(&self) -> PathBuf {
        self.root.join("full")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// Back up one item according to its final label.
    pub fn backup_item(&self, path: &Path, label: RiskLabel) -> Result<ItemBackup> {
        match BackupKind::for_label(label) {
            BackupKind::None => Ok(ItemBackup {
                kind: BackupKind::None,
                backup_path: None,
                degraded: false,
            }),
            BackupKind::Hardlink => self.hardlink_backup(path),
            BackupKind::Full => {
                let dest = self.full_backup(path)?;
                Ok(ItemBackup {
                    kind: BackupKind::Full,
                    backup_path: Some(dest),
                    degraded: false,
                })
            }
        }
    }

    fn hardlink_backup(&self, path: &Path) -> Result<ItemBackup> {
        // Directories cannot be hardlinked; degrade straight to a full copy.
        if path.is_dir() {
            let dest = self.full_backup(path)?;
            return Ok(ItemBackup {
                kind: BackupKind::Full,
                backup_path: Some(dest),
                degraded: true,
            });
        }

        let dest = fresh_backup_path(&self.hardlinks_dir(), path)?;
        match fs::hard_link(path, &dest) {
            Ok(()) => Ok(ItemBackup {
                kind: BackupKind::Hardlink,
                backup_path: Some(dest),
                degraded: false,
            }),
            // Cross-device or unsupported filesystem: degrade to full.
            Err(_) => {
                let dest = self.full_backup(path)?;
                Ok(ItemBackup {
                    kind: BackupKind::Full,
                    backup_path: Some(dest),
                    degraded: true,
                })
            }
        }
    }

    fn full_backup(&self, path: &Path) -> Result<PathBuf> {
        let dest = fresh_backup_path(&self.full_dir(), path)?;
        if path.is_dir() {
            copy_dir_preserving(path, &dest)?;
        } else {
            copy_file_preserving(path, &dest)?;
        }
        Ok(dest)
    }

    /// Counts and bytes over the current backup area.
    pub fn stats(&self) -> Result<BackupStats> {
        let mut stats = BackupStats::default();
        for entry in read_dir_entries(&self.hardlinks_dir())? {
            stats.hardlink_backups += 1;
            stats.total_bytes += entry_size(&entry);
        }
        for entry in read_dir_entries(&self.full_dir())? {
            stats.full_backups += 1;
            stats.total_bytes += entry_size(&entry);
        }
        for entry in read_dir_entries(&self.manifests_dir())? {
            if entry.extension().is_some_and(|e| e == "json") {
                stats.manifest_backups += 1;
            } else {
                stats.total_bytes += entry_size(&entry);
            }
        }
        Ok(stats)
    }
}

/// `stem + '_' + md5(path)[:8] + ext`; an existing file at that name is a
/// collision and the caller must retry with a fresh suffix.
pub fn backup_file_name(original: &Path) -> String {
    let stem = original
        .file_stem()
        .map_or_else(|| "item".to_string(), |s| s.to_string_lossy().into_owned());
    let digest = {
        let mut hasher = Md5::new();
        hasher.update(original.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())
    };
    let short = &digest[..8];
    original.extension().map_or_else(
        || format!("{stem}_{short}"),
        |ext| format!("{stem}_{short}.{}", ext.to_string_lossy()),
    )
}

fn fresh_backup_path(dir: &Path, original: &Path) -> Result<PathBuf> {
    let dest = dir.join(backup_file_name(original));
    if dest.exists() {
        return Err(CmError::BackupFailed {
            path: original.to_path_buf(),
            details: format!("backup name collision at {}", dest.display()),
        });
    }
    Ok(dest)
}

fn copy_file_preserving(src: &Path, dest: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| backup_err(src, &e))?;
    fs::copy(src, dest).map_err(|e| backup_err(src, &e))?;
    fs::set_permissions(dest, meta.permissions()).map_err(|e| backup_err(dest, &e))?;
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dest, mtime).map_err(|e| backup_err(dest, &e))?;
    Ok(())
}

fn copy_dir_preserving(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| backup_err(dest, &e))?;
    let entries = fs::read_dir(src).map_err(|e| backup_err(src, &e))?;
    for entry in entries {
        let entry = entry.map_err(|e| backup_err(src, &e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let meta = fs::symlink_metadata(&from).map_err(|e| backup_err(&from, &e))?;
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.is_dir() {
            copy_dir_preserving(&from, &to)?;
        } else {
            copy_file_preserving(&from, &to)?;
        }
    }
    Ok(())
}

fn backup_err(path: &Path, err: &std::io::Error) -> CmError {
    if err.kind() == std::io::ErrorKind::StorageFull {
        CmError::DiskFull {
            path: path.to_path_buf(),
        }
    } else {
        CmError::BackupFailed {
            path: path.to_path_buf(),
            details: err.to_string(),
        }
    }
}

fn read_dir_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CmError::io(dir, e)),
    }
}

fn entry_size(path: &Path) -> u64 {
    fs::metadata(path).map_or(0, |m| m.len())
}
