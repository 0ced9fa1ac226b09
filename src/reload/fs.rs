//! Source-tree queries used by the reload supervisor.

use std::env;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

/// Nearest directory at or above the working directory holding a `Cargo.toml`.
///
/// Falls back to the filesystem root when no manifest is found.
pub fn project_root() -> io::Result<PathBuf> {
    let cwd = env::current_dir()?;
    let root = cwd
        .ancestors()
        .find(|dir| dir.join("Cargo.toml").is_file())
        .or_else(|| cwd.ancestors().last())
        .unwrap_or(&cwd)
        .to_path_buf();
    Ok(root)
}

/// First file literally named `name` in a depth-first walk of `root`.
///
/// Entries are visited in file-name order; unreadable entries are skipped.
pub fn find_entry_point(root: &Path, name: &str, ignore: &[String]) -> Option<PathBuf> {
    walk(root, ignore)
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == OsStr::new(name))
        .map(DirEntry::into_path)
}

/// First file with extension `ext` modified strictly after `since`.
///
/// Stops at the first match, so one call reports at most one file. Any walk
/// or metadata error aborts the scan.
pub fn first_modified_since(
    root: &Path,
    ext: &str,
    since: SystemTime,
    ignore: &[String],
) -> io::Result<Option<PathBuf>> {
    for entry in walk(root, ignore) {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path().extension() != Some(OsStr::new(ext)) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified > since {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

fn walk<'a>(
    root: &'a Path,
    ignore: &'a [String],
) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            let ignored = entry.file_type().is_dir()
                && ignore.iter().any(|skip| entry.file_name() == OsStr::new(skip));
            entry.depth() == 0 || !ignored
        })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn ignore() -> Vec<String> {
        vec!["target".to_owned()]
    }

    #[test]
    fn entry_point_is_found_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/deep")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/deep/main.rs"), "").unwrap();
        fs::write(dir.path().join("b/main.rs"), "").unwrap();

        let found = find_entry_point(dir.path(), "main.rs", &ignore()).unwrap();
        assert_eq!(found, dir.path().join("a/deep/main.rs"));
    }

    #[test]
    fn ignored_directories_are_not_searched() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("target/debug/main.rs"), "").unwrap();

        assert_eq!(find_entry_point(dir.path(), "main.rs", &ignore()), None);
    }

    #[test]
    fn only_matching_extension_and_newer_files_count() {
        let dir = tempfile::tempdir().unwrap();
        let since = SystemTime::now() - Duration::from_secs(60);
        let old = since - Duration::from_secs(60);
        let new = since + Duration::from_secs(30);

        for (name, mtime) in [("old.rs", old), ("notes.txt", new), ("fresh.rs", new)] {
            let path = dir.path().join(name);
            fs::write(&path, "").unwrap();
            fs::File::options().write(true).open(&path).unwrap().set_modified(mtime).unwrap();
        }

        let changed = first_modified_since(dir.path(), "rs", since, &ignore()).unwrap();
        assert_eq!(changed, Some(dir.path().join("fresh.rs")));
        assert_eq!(first_modified_since(dir.path(), "rs", new, &ignore()).unwrap(), None);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        assert!(first_modified_since(&gone, "rs", SystemTime::now(), &ignore()).is_err());
    }
}
