//! Directory size by recursive summation, bounded by wall-clock and
//! file-count caps so a packed cache cannot wedge a scan.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Hard caps for one directory-size computation.
#[derive(Debug, Clone, Copy)]
pub struct DirSizeCaps {
    /// Wall-clock budget for the whole summation.
    pub wall_clock: Duration,
    /// Maximum number of files visited.
    pub max_files: usize,
}

impl Default for DirSizeCaps {
    fn default() -> Self {
        Self {
            wall_clock: Duration::from_secs(30),
            max_files: 10_000,
        }
    }
}

/// Result of a (possibly capped) summation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirSizeOutcome {
    /// Total bytes seen; a partial sum when `capped`.
    pub bytes: u64,
    /// Files visited.
    pub files_seen: usize,
    /// True when either cap was hit or the scan was cancelled mid-summation.
    pub capped: bool,
}

/// Sum file sizes under `dir`. Symlinks are not followed. Unreadable entries
/// are skipped. Returns the partial sum with `capped = true` past either cap.
pub fn compute_dir_size(dir: &Path, caps: DirSizeCaps, cancel: &AtomicBool) -> DirSizeOutcome {
    let started = Instant::now();
    let mut bytes = 0u64;
    let mut files_seen = 0usize;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        if started.elapsed() >= caps.wall_clock || cancel.load(Ordering::Relaxed) {
            return DirSizeOutcome {
                bytes,
                files_seen,
                capped: true,
            };
        }

        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };

        for entry in entries.flatten() {
            if files_seen >= caps.max_files {
                return DirSizeOutcome {
                    bytes,
                    files_seen,
                    capped: true,
                };
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                bytes = bytes.saturating_add(meta.len());
                files_seen += 1;
            }
        }
    }

    DirSizeOutcome {
        bytes,
        files_seen,
        capped: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn never_cancelled() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn sums_nested_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("x.bin"), vec![0u8; 100]).unwrap();
        fs::write(tmp.path().join("a/y.bin"), vec![0u8; 200]).unwrap();
        fs::write(tmp.path().join("a/b/z.bin"), vec![0u8; 300]).unwrap();

        let out = compute_dir_size(tmp.path(), DirSizeCaps::default(), &never_cancelled());
        assert_eq!(out.bytes, 600);
        assert_eq!(out.files_seen, 3);
        assert!(!out.capped);
    }

    #[test]
    fn file_count_cap_returns_partial_sum() {
        let tmp = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(tmp.path().join(format!("f{i}")), vec![0u8; 10]).unwrap();
        }

        let caps = DirSizeCaps {
            wall_clock: Duration::from_secs(30),
            max_files: 5,
        };
        let out = compute_dir_size(tmp.path(), caps, &never_cancelled());
        assert!(out.capped);
        assert_eq!(out.files_seen, 5);
        assert_eq!(out.bytes, 50);
    }

    #[test]
    fn zero_wall_clock_caps_immediately() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), b"data").unwrap();

        let caps = DirSizeCaps {
            wall_clock: Duration::ZERO,
            max_files: 1000,
        };
        let out = compute_dir_size(tmp.path(), caps, &never_cancelled());
        assert!(out.capped);
        assert_eq!(out.bytes, 0);
    }

    #[test]
    fn cancellation_stops_summation() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), b"data").unwrap();

        let cancelled = AtomicBool::new(true);
        let out = compute_dir_size(tmp.path(), DirSizeCaps::default(), &cancelled);
        assert!(out.capped);
    }

    #[test]
    fn unreadable_directory_yields_zero_uncapped() {
        let out = compute_dir_size(
            Path::new("/definitely/not/here"),
            DirSizeCaps::default(),
            &never_cancelled(),
        );
        assert_eq!(out.bytes, 0);
        assert!(!out.capped);
    }
}
