//! Path canonicalization and platform data locations.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Canonical form shared by the whitelist, the incremental index, and scan
/// roots: a leading `~` expands to the user's home, relative paths are
/// anchored at the current directory, symlinks resolve when the path exists
/// on disk, and `.`/`..` fold lexically when it does not (plans and recovery
/// rows routinely name paths that are already gone).
pub fn canonical_scan_path(path: &Path) -> PathBuf {
    let anchored = match expand_home(path) {
        expanded if expanded.is_absolute() => expanded,
        relative => match env::current_dir() {
            Ok(cwd) => cwd.join(relative),
            Err(_) => relative,
        },
    };

    std::fs::canonicalize(&anchored).unwrap_or_else(|_| fold_dots(&anchored))
}

/// Replace a leading `~` component with the user's home directory. A `~`
/// anywhere else in the path is an ordinary file name.
fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    if let Some(Component::Normal(first)) = components.next()
        && first.to_str() == Some("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(components.as_path());
    }
    path.to_path_buf()
}

/// Lexical `.`/`..` folding for paths that do not exist. `..` consumes the
/// preceding name and never climbs above the filesystem root (or drive
/// prefix on Windows).
fn fold_dots(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            keep => out.push(keep.as_os_str()),
        }
    }
    out
}

/// True iff `prefix` is a component-boundary prefix of `path`.
///
/// `/tmp/app` prefixes `/tmp/app/cache` but not `/tmp/app-cache`.
pub fn is_path_prefix(prefix: &Path, path: &Path) -> bool {
    path.starts_with(prefix)
}

/// Application data directory (database, incremental index, scheduler config).
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("CleanMaster")
}

/// Local application data directory (backup area).
pub fn local_app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("CleanMaster")
}

/// Default database file location.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("cleanmaster.db")
}

/// Default backup root.
pub fn default_backup_root() -> PathBuf {
    local_app_data_dir().join("Backups")
}

/// Default incremental index document.
pub fn default_incremental_index_path() -> PathBuf {
    app_data_dir().join("incremental_history.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_path_resolves_through_the_filesystem() {
        let cwd = env::current_dir().unwrap();
        let resolved = canonical_scan_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn missing_path_folds_dot_components_lexically() {
        #[cfg(unix)]
        let root = Path::new("/");
        #[cfg(windows)]
        let root = Path::new("C:");

        let input = root.join("nonexistent").join("foo").join("..").join("bar");
        let expected = root.join("nonexistent").join("bar");

        assert!(std::fs::canonicalize(&input).is_err());
        assert_eq!(canonical_scan_path(&input), expected);
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        #[cfg(unix)]
        {
            assert_eq!(fold_dots(Path::new("/../foo")), Path::new("/foo"));
            assert_eq!(fold_dots(Path::new("/a/../../b")), Path::new("/b"));
        }
    }

    #[test]
    fn current_dir_components_disappear() {
        #[cfg(unix)]
        assert_eq!(
            fold_dots(Path::new("/a/./b/./c")),
            Path::new("/a/b/c")
        );
    }

    #[test]
    fn leading_tilde_expands_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let resolved = canonical_scan_path(Path::new("~/cm-path-that-does-not-exist"));
        assert_eq!(resolved, home.join("cm-path-that-does-not-exist"));
    }

    #[test]
    fn tilde_mid_path_is_an_ordinary_name() {
        #[cfg(unix)]
        {
            let resolved = canonical_scan_path(Path::new("/nonexistent/~/cache"));
            assert_eq!(resolved, Path::new("/nonexistent/~/cache"));
        }
    }

    #[test]
    fn prefix_respects_component_boundaries() {
        assert!(is_path_prefix(
            Path::new("/tmp/app"),
            Path::new("/tmp/app/cache/x")
        ));
        assert!(!is_path_prefix(
            Path::new("/tmp/app"),
            Path::new("/tmp/app-cache")
        ));
    }

    #[test]
    fn default_locations_are_rooted_under_app_dirs() {
        assert!(default_db_path().ends_with("CleanMaster/cleanmaster.db"));
        assert!(
            default_incremental_index_path().ends_with("CleanMaster/incremental_history.json")
        );
        assert!(default_backup_root().ends_with("CleanMaster/Backups"));
    }
}
