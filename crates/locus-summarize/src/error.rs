use std::time::Duration;

use locus_core::LocusError;

/// Why a summarization call failed.
///
/// The gateway retries [`is_transient`](Self::is_transient) failures and
/// falls back to a heuristic summary for the rest.
///
/// # Examples
///
/// ```
/// use locus_summarize::SummarizeError;
///
/// let err = SummarizeError::Upstream { status: 503, body: "busy".into() };
/// assert!(err.is_transient());
/// let err = SummarizeError::Upstream { status: 400, body: "bad".into() };
/// assert!(!err.is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    /// The call missed its deadline.
    #[error("summarizer call timed out")]
    Timeout,

    /// The provider answered 429.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success HTTP status.
    #[error("provider error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The reply could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Missing key, unknown provider, or a client that cannot be built.
    #[error("summarizer misconfigured: {0}")]
    Config(String),
}

impl SummarizeError {
    /// Timeouts, rate limits, 5xx answers and transport errors.
    pub fn is_transient(&self) -> bool {
        match self {
            SummarizeError::Timeout
            | SummarizeError::RateLimited { .. }
            | SummarizeError::Transport(_) => true,
            SummarizeError::Upstream { status, .. } => *status >= 500,
            SummarizeError::Malformed(_) | SummarizeError::Config(_) => false,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SummarizeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<SummarizeError> for LocusError {
    fn from(err: SummarizeError) -> Self {
        LocusError::Llm(err.to_string())
    }
}
