//! Input path expansion
//!
//! Directories expand to the files directly inside them. Inputs are ordered
//! so rotated logs sharing a stem sort by their numeric suffix
//! (`app.log.2` before `app.log.10`), ahead of any non-numeric suffix.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Expand directories, drop duplicates and order the result
pub fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let metadata =
            fs::metadata(path).with_context(|| format!("cannot access {}", path.display()))?;
        if !metadata.is_dir() {
            files.push(path.clone());
            continue;
        }

        let entries =
            fs::read_dir(path).with_context(|| format!("cannot list {}", path.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("cannot list {}", path.display()))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
    }

    files.sort_by(|a, b| compare_log_paths(a, b));
    files.dedup();
    Ok(files)
}

/// Order two paths by directory, then file stem, then extension, where
/// numeric extensions come first in numeric order
pub fn compare_log_paths(a: &Path, b: &Path) -> Ordering {
    sort_key(a).cmp(&sort_key(b))
}

fn sort_key(path: &Path) -> (Option<&Path>, Option<&OsStr>, bool, u64, Option<&OsStr>) {
    let index = rotation_index(path);
    (
        path.parent(),
        path.file_stem(),
        index.is_none(),
        index.unwrap_or(0),
        path.extension(),
    )
}

fn rotation_index(path: &Path) -> Option<u64> {
    path.extension()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut paths: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
        paths.sort_by(|a, b| compare_log_paths(a, b));
        paths.iter().map(|p| p.display().to_string()).collect()
    }

    #[test]
    fn test_rotated_logs_sort_numerically() {
        assert_eq!(
            sorted(&["logs/app.log.10", "logs/app.log.2", "logs/app.log.1"]),
            vec!["logs/app.log.1", "logs/app.log.2", "logs/app.log.10"]
        );
    }

    #[test]
    fn test_base_file_sorts_before_rotations() {
        assert_eq!(
            sorted(&["logs/app.log.1", "logs/app.log"]),
            vec!["logs/app.log", "logs/app.log.1"]
        );
    }

    #[test]
    fn test_different_stems_use_path_order() {
        assert_eq!(
            sorted(&["b.log.1", "a.log.2"]),
            vec!["a.log.2", "b.log.1"]
        );
        // Same stem but different directories is plain path order too
        assert_eq!(
            sorted(&["y/app.log.1", "x/app.log.9"]),
            vec!["x/app.log.9", "y/app.log.1"]
        );
    }

    #[test]
    fn test_mixed_suffixes_sort_consistently() {
        let names = ["logs/app.log.1a", "logs/app.log.10", "logs/app.log.2"];
        assert_eq!(
            sorted(&names),
            vec!["logs/app.log.2", "logs/app.log.10", "logs/app.log.1a"]
        );

        let paths: Vec<&Path> = names.iter().map(Path::new).collect();
        for a in &paths {
            for b in &paths {
                assert_eq!(compare_log_paths(a, b), compare_log_paths(b, a).reverse());
                for c in &paths {
                    if compare_log_paths(a, b).is_lt() && compare_log_paths(b, c).is_lt() {
                        assert!(compare_log_paths(a, c).is_lt(), "{:?} {:?} {:?}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_expand_directory_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["svc.log.10", "svc.log.2", "svc.log"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();

        let explicit = dir.path().join("svc.log");
        let files = expand_inputs(&[dir.path().to_path_buf(), explicit]).unwrap();
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["svc.log", "svc.log.2", "svc.log.10"]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let err = expand_inputs(&[PathBuf::from("/no/such/dir")]).unwrap_err();
        assert!(format!("{:#}", err).contains("/no/such/dir"));
    }
}
