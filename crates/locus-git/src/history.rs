//! Per-file version-control facts mined from commit history.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{Delta, DiffOptions, Repository, Sort};
use locus_core::GitFacts;

/// Walking stops after this many commits on very long histories.
const MAX_COMMITS: usize = 50_000;

/// Author, last commit and creation date for every path touched in history.
///
/// Built with a single revwalk from `HEAD`, newest first: the first commit
/// that touches a path supplies `last_modified`, `author` and
/// `commit_hash`; the oldest one supplies `creation_date`.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use locus_git::HistoryIndex;
///
/// let index = HistoryIndex::build(Path::new("."));
/// let facts = index.facts("src/main.rs");
/// println!("{:?} by {:?}", facts.commit_hash, facts.author);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HistoryIndex {
    files: HashMap<String, GitFacts>,
}

impl HistoryIndex {
    /// Mine history for the repository at `repo_root`.
    ///
    /// Never fails: a directory that is not a git repository, or a
    /// repository without commits, yields an empty index and every file
    /// gets empty facts.
    pub fn build(repo_root: &Path) -> Self {
        match Self::try_build(repo_root) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!(root = %repo_root.display(), error = %e, "no git history available");
                Self::default()
            }
        }
    }

    fn try_build(repo_root: &Path) -> Result<Self, git2::Error> {
        let repo = Repository::open(repo_root)?;
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push_head()?;

        let mut files: HashMap<String, GitFacts> = HashMap::new();

        for (walked, oid) in revwalk.enumerate() {
            if walked >= MAX_COMMITS {
                tracing::debug!(limit = MAX_COMMITS, "history walk truncated");
                break;
            }
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            let when = timestamp(commit.time().seconds());
            let hash = oid.to_string()[..8].to_string();
            let author = commit.author().name().unwrap_or("unknown").to_string();

            for path in touched_paths(&repo, &commit)? {
                let facts = files.entry(path).or_insert_with(|| GitFacts {
                    last_modified: when,
                    author: Some(author.clone()),
                    commit_hash: Some(hash.clone()),
                    creation_date: None,
                });
                facts.creation_date = when;
            }
        }

        Ok(Self { files })
    }

    /// Facts for a relative path; empty when the path never appeared.
    pub fn facts(&self, relative_path: &str) -> GitFacts {
        self.files.get(relative_path).cloned().unwrap_or_default()
    }

    /// Number of paths with history.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no history was found.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Paths added or modified by `commit` relative to its first parent.
fn touched_paths(repo: &Repository, commit: &git2::Commit<'_>) -> Result<Vec<String>, git2::Error> {
    let commit_tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };

    let mut opts = DiffOptions::new();
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), Some(&mut opts))?;

    let mut paths = Vec::new();
    for delta in diff.deltas() {
        if delta.status() == Delta::Deleted {
            continue;
        }
        if let Some(path) = delta.new_file().path().and_then(|p| p.to_str()) {
            paths.push(path.replace('\\', "/"));
        }
    }
    Ok(paths)
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}
