//! Path-prefix protection set: paths that must never be deleted.
//!
//! The active set is a snapshot behind a swap pointer. Readers clone the
//! current `Arc` and match against a consistent set; `replace` installs a new
//! snapshot atomically. Mutation happens only at process start and through an
//! explicit admin call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::paths::canonical_scan_path;

/// Immutable set of protected prefixes.
#[derive(Debug, Default)]
pub struct WhitelistSnapshot {
    entries: Vec<PathBuf>,
}

impl WhitelistSnapshot {
    fn new(entries: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut normalized: Vec<PathBuf> = entries
            .into_iter()
            .map(|p| normalize_entry(&p))
            .collect();
        normalized.sort();
        normalized.dedup();
        Self {
            entries: normalized,
        }
    }

    /// True iff some entry is a component-boundary prefix of `path`.
    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        let candidate = normalize_entry(path);
        self.entries.iter().any(|entry| candidate.starts_with(entry))
    }

    /// True iff some protected entry lies at or beneath `dir`. A directory
    /// with a protected descendant must never be offered for deletion as a
    /// single unit.
    #[must_use]
    pub fn protects_within(&self, dir: &Path) -> bool {
        let candidate = normalize_entry(dir);
        self.entries.iter().any(|entry| entry.starts_with(&candidate))
    }

    /// The protected prefixes, sorted.
    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }
}

#[cfg(windows)]
fn normalize_entry(path: &Path) -> PathBuf {
    // Windows path matching is case-insensitive.
    PathBuf::from(
        canonical_scan_path(path)
            .to_string_lossy()
            .to_lowercase(),
    )
}

#[cfg(not(windows))]
fn normalize_entry(path: &Path) -> PathBuf {
    canonical_scan_path(path)
}

/// Prefix-matching protection set with snapshot-atomic updates.
#[derive(Debug)]
pub struct Whitelist {
    snapshot: RwLock<Arc<WhitelistSnapshot>>,
}

impl Whitelist {
    /// Build a whitelist from explicit entries only.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(WhitelistSnapshot::new(entries))),
        }
    }

    /// Build a whitelist seeded with the built-in protected roots plus
    /// `extra` entries from configuration.
    #[must_use]
    pub fn with_builtins(extra: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut entries = builtin_protected_roots();
        entries.extend(extra);
        Self::new(entries)
    }

    /// Check a path against the current snapshot.
    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        self.current().is_protected(path)
    }

    /// Clone the current snapshot (stable for the lifetime of a scan).
    #[must_use]
    pub fn current(&self) -> Arc<WhitelistSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Admin call: atomically install a new set of entries.
    pub fn replace(&self, entries: impl IntoIterator<Item = PathBuf>) {
        let next = Arc::new(WhitelistSnapshot::new(entries));
        *self.snapshot.write() = next;
    }
}

/// Roots that are protected regardless of configuration: the user's personal
/// document areas and the operating system itself.
fn builtin_protected_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(p) = dirs::document_dir() {
        roots.push(p);
    }
    if let Some(p) = dirs::desktop_dir() {
        roots.push(p);
    }
    if let Some(p) = dirs::download_dir() {
        roots.push(p);
    }
    if let Some(p) = dirs::picture_dir() {
        roots.push(p);
    }

    #[cfg(windows)]
    {
        roots.push(PathBuf::from(r"C:\Windows"));
        roots.push(PathBuf::from(r"C:\Program Files"));
        roots.push(PathBuf::from(r"C:\Program Files (x86)"));
    }
    #[cfg(not(windows))]
    {
        roots.push(PathBuf::from("/bin"));
        roots.push(PathBuf::from("/sbin"));
        roots.push(PathBuf::from("/usr"));
        roots.push(PathBuf::from("/etc"));
    }

    roots
}
