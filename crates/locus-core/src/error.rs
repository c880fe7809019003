use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Why a repository could not be acquired.
///
/// Acquisition failures are fatal to an ingestion job, so each one maps to a
/// stable code that callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionFailure {
    /// The repository does not exist (or is hidden from the caller).
    NotFound,
    /// The repository is private and no token was supplied.
    PrivateNoToken,
    /// The supplied token was rejected.
    InvalidToken,
    /// The token is valid but lacks read access.
    InsufficientPermissions,
    /// The repository exceeds the configured size ceiling.
    TooLarge,
    /// Network failure reaching the host.
    Unreachable,
    /// The clone or fetch did not finish in time.
    Timeout,
}

impl AcquisitionFailure {
    /// Stable error code for reports.
    pub fn code(self) -> &'static str {
        match self {
            AcquisitionFailure::NotFound => "REPO_NOT_FOUND",
            AcquisitionFailure::PrivateNoToken => "PRIVATE_REPO_NO_TOKEN",
            AcquisitionFailure::InvalidToken => "INVALID_TOKEN",
            AcquisitionFailure::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AcquisitionFailure::TooLarge => "REPO_TOO_LARGE",
            AcquisitionFailure::Unreachable => "REPO_UNREACHABLE",
            AcquisitionFailure::Timeout => "ACQUISITION_TIMEOUT",
        }
    }
}

impl fmt::Display for AcquisitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AcquisitionFailure::NotFound => "repository not found",
            AcquisitionFailure::PrivateNoToken => "repository is private and no token was given",
            AcquisitionFailure::InvalidToken => "access token was rejected",
            AcquisitionFailure::InsufficientPermissions => "token lacks read access",
            AcquisitionFailure::TooLarge => "repository is too large",
            AcquisitionFailure::Unreachable => "repository host is unreachable",
            AcquisitionFailure::Timeout => "acquisition timed out",
        };
        f.write_str(text)
    }
}

/// Errors that can occur across Locus.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary converts to `miette` diagnostics at the boundary.
///
/// # Examples
///
/// ```
/// use locus_core::LocusError;
///
/// let err = LocusError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// assert_eq!(err.code(), "CONFIG_ERROR");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum LocusError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The repository URL or path could not be understood.
    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),

    /// The repository could not be cloned, fetched, or opened.
    #[error("{kind}: {message}")]
    Acquisition {
        kind: AcquisitionFailure,
        message: String,
    },

    /// Git operation failure.
    #[error("git error: {0}")]
    Git(String),

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// LLM API or response error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Transient storage failure. Callers retry these with backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Non-transient storage failure (corrupt data, schema mismatch).
    #[error("database error: {0}")]
    Database(String),

    /// A collection with this id already exists.
    #[error("collection {0} already exists")]
    CollectionExists(String),

    /// No collection with this id has been ingested.
    #[error("collection {0} has not been ingested")]
    CollectionNotFound(String),

    /// The job was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl LocusError {
    /// Build an acquisition error.
    pub fn acquisition(kind: AcquisitionFailure, message: impl Into<String>) -> Self {
        LocusError::Acquisition {
            kind,
            message: message.into(),
        }
    }

    /// Stable, machine-readable code for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use locus_core::{AcquisitionFailure, LocusError};
    ///
    /// let err = LocusError::acquisition(AcquisitionFailure::TooLarge, "812 MB");
    /// assert_eq!(err.code(), "REPO_TOO_LARGE");
    /// assert_eq!(LocusError::CollectionNotFound("repo-00000000".into()).code(), "REPO_NOT_INDEXED");
    /// ```
    pub fn code(&self) -> &'static str {
        match self {
            LocusError::InvalidUrl(_) => "INVALID_URL",
            LocusError::Acquisition { kind, .. } => kind.code(),
            LocusError::Config(_) | LocusError::Toml(_) => "CONFIG_ERROR",
            LocusError::StoreUnavailable(_)
            | LocusError::Database(_)
            | LocusError::CollectionExists(_) => "STORAGE_ERROR",
            LocusError::CollectionNotFound(_) => "REPO_NOT_INDEXED",
            LocusError::Cancelled => "CANCELLED",
            LocusError::Embedding(_) => "QUERY_PROCESSING_FAILED",
            LocusError::Io(_)
            | LocusError::Git(_)
            | LocusError::Parse(_)
            | LocusError::Llm(_)
            | LocusError::Serialization(_)
            | LocusError::FileNotFound(_) => "PROCESSING_FAILED",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LocusError::StoreUnavailable(_))
    }
}
