//! Manifest backups: multi-file profiles staged into a temp dir, zipped with
//! DEFLATE, described by a JSON manifest sibling to the ZIP.
//!
//! The SHA-256 of every file is computed on the source, before staging, so a
//! later restore can prove byte identity. Manifest JSON is written atomically.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::backup::store::BackupStore;
use crate::core::errors::{CmError, Result};

/// One archived file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub original_path: String,
    pub relative_backup_path: String,
    pub size: u64,
    pub compressed_size: u64,
    pub sha256: String,
    pub permissions: u32,
    /// Seconds since the epoch.
    pub mtime: i64,
    pub is_dir: bool,
}

/// JSON sidecar describing the contents of one backup ZIP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub manifest_id: String,
    pub zip_path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub profile_id: Option<String>,
    pub files: Vec<FileEntry>,
    pub total_size: u64,
    pub compressed_size: u64,
}

impl BackupManifest {
    /// Load and validate a manifest document.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| CmError::io(path, e))?;
        let manifest: Self = serde_json::from_str(&raw)?;
        Ok(manifest)
    }

    /// Write atomically next to the ZIP (same basename, `.json`).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, raw).map_err(|e| CmError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| CmError::io(path, e))?;
        Ok(())
    }

    /// A manifest without its ZIP cannot be restored.
    #[must_use]
    pub fn is_restorable(&self) -> bool {
        self.zip_path.exists()
    }

    /// Manifest JSON location for a given id within a store.
    #[must_use]
    pub fn json_path(store: &BackupStore, manifest_id: &str) -> PathBuf {
        store.manifests_dir().join(format!("{manifest_id}.json"))
    }
}

/// Relative path used inside the archive: root and drive components dropped.
#[must_use]
pub fn archive_relative_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::Prefix(..) | Component::RootDir | Component::CurDir
            | Component::ParentDir => {}
        }
    }
    parts.join("/")
}

/// SHA-256 of a file's bytes, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| CmError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|e| CmError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Create a manifest backup of `paths` (files or directories, recursed).
///
/// The staging directory lives inside the backup root and is removed on every
/// exit path; the ZIP and manifest land under `manifests/`.
pub fn backup_profile(
    store: &BackupStore,
    profile_id: Option<&str>,
    paths: &[PathBuf],
    compression_level: u32,
) -> Result<BackupManifest> {
    let manifest_id = uuid::Uuid::now_v7().to_string();
    let zip_path = store.manifests_dir().join(format!("{manifest_id}.zip"));

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(store.root())
        .map_err(|e| CmError::io(store.root(), e))?;

    let mut entries = Vec::new();
    for path in paths {
        stage_path(path, staging.path(), &mut entries)?;
    }

    write_zip(&zip_path, staging.path(), compression_level)?;
    fill_compressed_sizes(&zip_path, &mut entries)?;

    let manifest = BackupManifest {
        manifest_id: manifest_id.clone(),
        zip_path,
        created_at: Utc::now(),
        profile_id: profile_id.map(ToString::to_string),
        total_size: entries.iter().map(|e| e.size).sum(),
        compressed_size: entries.iter().map(|e| e.compressed_size).sum(),
        files: entries,
    };
    manifest.save(&BackupManifest::json_path(store, &manifest_id))?;
    Ok(manifest)
}

fn stage_path(path: &Path, staging_root: &Path, entries: &mut Vec<FileEntry>) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| CmError::BackupFailed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    let relative = archive_relative_path(path);
    let staged = staging_root.join(&relative);

    if meta.is_dir() {
        fs::create_dir_all(&staged).map_err(|e| CmError::io(&staged, e))?;
        entries.push(dir_entry(path, &relative, &meta));
        let children = fs::read_dir(path).map_err(|e| CmError::io(path, e))?;
        for child in children {
            let child = child.map_err(|e| CmError::io(path, e))?;
            stage_path(&child.path(), staging_root, entries)?;
        }
    } else {
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).map_err(|e| CmError::io(parent, e))?;
        }
        let sha256 = sha256_file(path)?;
        fs::copy(path, &staged).map_err(|e| CmError::io(path, e))?;
        entries.push(FileEntry {
            original_path: path.to_string_lossy().into_owned(),
            relative_backup_path: relative,
            size: meta.len(),
            compressed_size: 0,
            sha256,
            permissions: permissions_bits(&meta),
            mtime: mtime_secs(&meta),
            is_dir: false,
        });
    }
    Ok(())
}

fn dir_entry(path: &Path, relative: &str, meta: &fs::Metadata) -> FileEntry {
    FileEntry {
        original_path: path.to_string_lossy().into_owned(),
        relative_backup_path: relative.to_string(),
        size: 0,
        compressed_size: 0,
        sha256: String::new(),
        permissions: permissions_bits(meta),
        mtime: mtime_secs(meta),
        is_dir: true,
    }
}

fn mtime_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .map_or(0, |t| DateTime::<Utc>::from(t).timestamp())
}

#[cfg(unix)]
fn permissions_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn permissions_bits(meta: &fs::Metadata) -> u32 {
    u32::from(meta.permissions().readonly())
}

fn write_zip(zip_path: &Path, staging_root: &Path, compression_level: u32) -> Result<()> {
    let file = File::create(zip_path).map_err(|e| CmError::io(zip_path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(compression_level)));

    add_tree(&mut writer, staging_root, staging_root, options)
        .map_err(|e| CmError::BackupFailed {
            path: zip_path.to_path_buf(),
            details: e.to_string(),
        })?;
    writer.finish().map_err(|e| CmError::BackupFailed {
        path: zip_path.to_path_buf(),
        details: e.to_string(),
    })?;
    Ok(())
}

fn add_tree(
    writer: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = path
            .strip_prefix(root)?
            .to_string_lossy()
            .replace('\\', "/");
        if path.is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
            add_tree(writer, root, &path, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut src = File::open(&path)?;
            io::copy(&mut src, writer)?;
            writer.flush()?;
        }
    }
    Ok(())
}

fn fill_compressed_sizes(zip_path: &Path, entries: &mut [FileEntry]) -> Result<()> {
    let file = File::open(zip_path).map_err(|e| CmError::io(zip_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| CmError::BackupFailed {
        path: zip_path.to_path_buf(),
        details: e.to_string(),
    })?;
    for i in 0..archive.len() {
        let zipped = archive.by_index(i).map_err(|e| CmError::BackupFailed {
            path: zip_path.to_path_buf(),
            details: e.to_string(),
        })?;
        let name = zipped.name().trim_end_matches('/').to_string();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.relative_backup_path == name && !e.is_dir)
        {
            entry.compressed_size = zipped.compressed_size();
        }
    }
    Ok(())
}

/// All loadable manifests in the store, newest first. Unreadable documents
/// are skipped.
pub fn list_manifests(store: &BackupStore) -> Result<Vec<BackupManifest>> {
    let dir = store.manifests_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CmError::io(&dir, e)),
    };
    let mut manifests: Vec<BackupManifest> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|x| x == "json"))
        .filter_map(|p| BackupManifest::load(&p).ok())
        .collect();
    manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(manifests)
}

/// Extract the whole archive into `dest`.
pub fn extract_archive(manifest: &BackupManifest, dest: &Path) -> Result<()> {
    if !manifest.is_restorable() {
        return Err(CmError::FileNotFound {
            path: manifest.zip_path.clone(),
        });
    }
    let file = File::open(&manifest.zip_path).map_err(|e| CmError::io(&manifest.zip_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| CmError::BackupFailed {
        path: manifest.zip_path.clone(),
        details: e.to_string(),
    })?;
    archive.extract(dest).map_err(|e| CmError::BackupFailed {
        path: manifest.zip_path.clone(),
        details: e.to_string(),
    })?;
    Ok(())
}
