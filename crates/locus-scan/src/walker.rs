use std::path::{Path, PathBuf};

use locus_core::LocusError;

/// A file found under the repository root.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use locus_scan::DiscoveredFile;
///
/// let file = DiscoveredFile {
///     relative_path: "src/main.rs".into(),
///     absolute_path: PathBuf::from("/repo/src/main.rs"),
///     size_bytes: 12,
/// };
/// assert_eq!(file.relative_path, "src/main.rs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the root, with forward slashes.
    pub relative_path: String,
    /// Path on disk.
    pub absolute_path: PathBuf,
    /// Size reported by the filesystem.
    pub size_bytes: u64,
}

/// Walk a repository, respecting `.gitignore`, returning every regular file.
///
/// Hidden files and the `.git` directory are skipped. Classification is
/// left to the caller so skipped files can still be counted. Results are
/// sorted by relative path.
///
/// # Errors
///
/// Returns [`LocusError::FileNotFound`] if `root` is not a directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use locus_scan::discover;
///
/// let files = discover(Path::new(".")).unwrap();
/// for f in &files {
///     println!("{} ({} bytes)", f.relative_path, f.size_bytes);
/// }
/// ```
pub fn discover(root: &Path) -> Result<Vec<DiscoveredFile>, LocusError> {
    if !root.is_dir() {
        return Err(LocusError::FileNotFound(root.to_path_buf()));
    }

    let walker = ignore::WalkBuilder::new(root)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();
    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable walk entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);

        let relative = match path.strip_prefix(root) {
            Ok(r) => r,
            Err(_) => path,
        };
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(DiscoveredFile {
            relative_path,
            absolute_path: path.to_path_buf(),
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/nested/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

        dir
    }

    #[test]
    fn discover_lists_all_files_sorted() {
        let dir = make_temp_repo();
        let files = discover(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["README.md", "logo.png", "src/main.rs", "src/nested/lib.py"]
        );
        assert_eq!(files[2].size_bytes, 12);
    }

    #[test]
    fn discover_respects_gitignore_and_skips_git_dir() {
        let dir = make_temp_repo();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/output.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = discover(root).unwrap();
        assert!(files.iter().all(|f| !f.relative_path.starts_with("build/")));
        assert!(files.iter().all(|f| !f.relative_path.starts_with(".git")));
    }

    #[test]
    fn discover_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover(&dir.path().join("nope"));
        assert!(matches!(result, Err(LocusError::FileNotFound(_))));
    }
}
