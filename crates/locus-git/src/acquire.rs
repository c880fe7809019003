//! Getting a working tree onto local disk.
//!
//! Remote repositories are cloned with the `git` CLI into
//! `<clones_dir>/<collection_id>` and refreshed in place on re-ingestion.
//! The clone is partial (`--filter=blob:none`): full commit history for
//! [`HistoryIndex`](crate::HistoryIndex), blobs only for `HEAD`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use locus_core::{AcquisitionFailure, LocusConfig, LocusError, RepositoryUrl, UrlKind};
use tokio::process::Command;

/// Limits and credentials for one acquisition.
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Parent directory of managed clones.
    pub clones_dir: PathBuf,
    /// Access token for private repositories.
    pub token: Option<String>,
    /// Deadline for the whole clone or refresh.
    pub timeout: Duration,
    /// Largest working tree accepted, in megabytes.
    pub max_repo_size_mb: u64,
}

impl AcquireOptions {
    /// Options from configuration, with an explicit token taking precedence
    /// over the configured one.
    pub fn from_config(config: &LocusConfig, token: Option<String>) -> Self {
        Self {
            clones_dir: config.storage.clones_dir(),
            token: token.or_else(|| config.github.token.clone()),
            timeout: Duration::from_secs(config.ingest.clone_timeout_secs),
            max_repo_size_mb: config.ingest.max_repo_size_mb,
        }
    }
}

/// A repository ready to be walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredRepo {
    /// Root of the working tree.
    pub root: PathBuf,
    /// Short hash of `HEAD`, when the tree is a git repository.
    pub head_commit: Option<String>,
}

/// Clone, refresh, or open the repository behind `url`.
///
/// Local directories are used in place. Remote repositories are cloned on
/// first use and fetched and hard-reset to the remote `HEAD` afterwards.
/// Dropping the returned future kills any running `git` process.
///
/// # Errors
///
/// Returns [`LocusError::Acquisition`] classified from git's output (not
/// found, private without token, invalid token, missing permissions,
/// unreachable host), on timeout, or when the working tree exceeds
/// `max_repo_size_mb`.
pub async fn acquire(url: &RepositoryUrl, opts: &AcquireOptions) -> Result<AcquiredRepo, LocusError> {
    let root = match url.kind() {
        UrlKind::Local(path) => {
            if !path.is_dir() {
                return Err(LocusError::acquisition(
                    AcquisitionFailure::NotFound,
                    format!("{} is not a directory", path.display()),
                ));
            }
            path.clone()
        }
        UrlKind::Remote(remote) => {
            let target = opts.clones_dir.join(url.collection_id().as_str());
            tokio::fs::create_dir_all(&opts.clones_dir).await?;
            if target.join(".git").is_dir() {
                tracing::info!(url = %url, "refreshing existing clone");
                refresh(&target, opts).await?;
            } else {
                if target.exists() {
                    tokio::fs::remove_dir_all(&target).await?;
                }
                tracing::info!(url = %url, target = %target.display(), "cloning repository");
                if let Err(e) = clone(remote, &target, opts).await {
                    let _ = tokio::fs::remove_dir_all(&target).await;
                    return Err(e);
                }
            }
            target
        }
    };

    let size_root = root.clone();
    let bytes = tokio::task::spawn_blocking(move || tree_size(&size_root))
        .await
        .map_err(|e| LocusError::Git(format!("size check panicked: {e}")))?;
    let size_mb = bytes / (1024 * 1024);
    if size_mb > opts.max_repo_size_mb {
        return Err(LocusError::acquisition(
            AcquisitionFailure::TooLarge,
            format!("{url} is {size_mb} MB on disk, limit is {} MB", opts.max_repo_size_mb),
        ));
    }

    let head_commit = head_commit(&root);
    Ok(AcquiredRepo { root, head_commit })
}

async fn clone(remote: &str, target: &Path, opts: &AcquireOptions) -> Result<(), LocusError> {
    let target_arg = target.to_string_lossy().into_owned();
    run_git(
        &[
            "clone",
            "--filter=blob:none",
            "--no-tags",
            "--quiet",
            "--",
            remote,
            &target_arg,
        ],
        None,
        opts,
    )
    .await
}

async fn refresh(target: &Path, opts: &AcquireOptions) -> Result<(), LocusError> {
    run_git(&["fetch", "--quiet", "--no-tags", "origin", "HEAD"], Some(target), opts).await?;
    run_git(&["reset", "--quiet", "--hard", "FETCH_HEAD"], Some(target), opts).await?;
    run_git(&["clean", "-fdq"], Some(target), opts).await
}

async fn run_git(args: &[&str], cwd: Option<&Path>, opts: &AcquireOptions) -> Result<(), LocusError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ASKPASS", "")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    // Passed through the environment so the token stays off the command line.
    if let Some(token) = &opts.token {
        let credentials = STANDARD.encode(format!("x-access-token:{token}"));
        cmd.env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "http.extraHeader")
            .env("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {credentials}"));
    }

    let child = cmd
        .spawn()
        .map_err(|e| LocusError::Git(format!("failed to run git: {e}")))?;

    let output = match tokio::time::timeout(opts.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| LocusError::Git(format!("git did not finish: {e}")))?,
        Err(_) => {
            return Err(LocusError::acquisition(
                AcquisitionFailure::Timeout,
                format!("git {} exceeded {}s", args[0], opts.timeout.as_secs()),
            ))
        }
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    tracing::debug!(command = args[0], %stderr, "git failed");
    let kind = classify_git_failure(&stderr, opts.token.is_some());
    Err(LocusError::acquisition(kind, stderr))
}

/// Map git's stderr to a failure kind.
///
/// GitHub answers "not found" for private repositories when no
/// credentials are sent, so the token decides between the two.
pub fn classify_git_failure(stderr: &str, has_token: bool) -> AcquisitionFailure {
    let text = stderr.to_ascii_lowercase();
    let auth_required = text.contains("could not read username")
        || text.contains("terminal prompts disabled")
        || text.contains("authentication required");

    if text.contains("authentication failed")
        || text.contains("invalid username or password")
        || text.contains("error: 401")
        || (auth_required && has_token)
    {
        AcquisitionFailure::InvalidToken
    } else if auth_required {
        AcquisitionFailure::PrivateNoToken
    } else if text.contains("error: 403") || text.contains("permission to") || text.contains("access denied") {
        AcquisitionFailure::InsufficientPermissions
    } else if text.contains("repository not found")
        || text.contains("not found")
        || text.contains("does not exist")
        || text.contains("error: 404")
    {
        AcquisitionFailure::NotFound
    } else if text.contains("timed out") {
        AcquisitionFailure::Timeout
    } else {
        AcquisitionFailure::Unreachable
    }
}

/// Total bytes of regular files under `root`, `.git` included.
fn tree_size(root: &Path) -> u64 {
    ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|entry| entry.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn head_commit(root: &Path) -> Option<String> {
    let repo = git2::Repository::open(root).ok()?;
    let commit = repo.head().ok()?.peel_to_commit().ok()?;
    Some(commit.id().to_string()[..8].to_string())
}
