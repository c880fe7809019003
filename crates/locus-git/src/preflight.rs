//! GitHub repository checks before cloning.

use std::time::Duration;

use locus_core::{AcquisitionFailure, GithubConfig, LocusError, RepositoryUrl};
use serde::Deserialize;

/// Repository facts reported by the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoInfo {
    /// Whether the repository is private.
    #[serde(default)]
    pub private: bool,
    /// Size reported by GitHub, in kilobytes.
    #[serde(default)]
    pub size: u64,
    /// Default branch name.
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl RepoInfo {
    /// Size in whole megabytes.
    pub fn size_mb(&self) -> u64 {
        self.size / 1024
    }
}

/// Ask the GitHub API whether `url` can be cloned with `token`.
///
/// Distinguishes an invalid token, missing permissions, a missing
/// repository and an oversized one before any bytes are cloned. Rate
/// limiting and transport errors are not fatal: they return `Ok(None)`
/// and leave the decision to the clone itself.
///
/// # Errors
///
/// Returns [`LocusError::Acquisition`] when GitHub answers with a
/// definitive refusal or the repository exceeds `max_repo_size_mb`.
pub async fn preflight(
    url: &RepositoryUrl,
    token: Option<&str>,
    config: &GithubConfig,
    max_repo_size_mb: u64,
) -> Result<Option<RepoInfo>, LocusError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent(concat!("locus/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LocusError::Git(format!("failed to create HTTP client: {e}")))?;

    let endpoint = format!(
        "{}/repos/{}/{}",
        config.api_url.trim_end_matches('/'),
        url.owner(),
        url.name()
    );
    let mut request = client
        .get(&endpoint)
        .header("Accept", "application/vnd.github+json");
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "GitHub preflight failed; continuing with clone");
            return Ok(None);
        }
    };

    let status = response.status().as_u16();
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");

    match status {
        200..=299 => {
            let info: RepoInfo = response
                .json()
                .await
                .map_err(|e| LocusError::Git(format!("unexpected GitHub response: {e}")))?;
            if info.size_mb() > max_repo_size_mb {
                return Err(LocusError::acquisition(
                    AcquisitionFailure::TooLarge,
                    format!(
                        "{} is {} MB, limit is {} MB",
                        url,
                        info.size_mb(),
                        max_repo_size_mb
                    ),
                ));
            }
            Ok(Some(info))
        }
        401 => Err(LocusError::acquisition(
            AcquisitionFailure::InvalidToken,
            format!("GitHub rejected the token for {url}"),
        )),
        403 | 429 if rate_limited || status == 429 => {
            tracing::warn!("GitHub API rate limit reached; skipping preflight");
            Ok(None)
        }
        403 => Err(LocusError::acquisition(
            AcquisitionFailure::InsufficientPermissions,
            format!("token cannot read {url}"),
        )),
        404 if token.is_none() => Err(LocusError::acquisition(
            AcquisitionFailure::NotFound,
            format!("{url} does not exist or is private; pass a token to ingest private repositories"),
        )),
        404 => Err(LocusError::acquisition(
            AcquisitionFailure::NotFound,
            format!("{url} does not exist or the token cannot see it"),
        )),
        other => {
            tracing::warn!(status = other, "unexpected GitHub preflight status; continuing");
            Ok(None)
        }
    }
}
