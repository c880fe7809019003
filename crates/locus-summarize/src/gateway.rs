//! Bounded, retrying access to the summarization model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use locus_core::{LlmConfig, SummarySource, Symbols};
use tokio::sync::Semaphore;

use crate::error::SummarizeError;
use crate::prompt::{build_summary_prompt, build_system_prompt, parse_summary_response, truncate_chars};

/// Something that turns a prompt into model text.
///
/// Implemented by [`LlmClient`](crate::LlmClient); tests substitute fakes.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Send the prompt and return the raw reply.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, SummarizeError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Exponential backoff schedule.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use locus_summarize::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_attempts: 3,
///     initial_backoff: Duration::from_millis(100),
///     max_backoff: Duration::from_secs(5),
/// };
/// assert_eq!(policy.delay(1, None), Duration::from_millis(100));
/// assert_eq!(policy.delay(2, None), Duration::from_millis(200));
/// assert_eq!(policy.delay(2, Some(Duration::from_secs(1))), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt `attempt` (1-based).
    /// A server-provided `retry_after` wins when it is longer.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let backoff = exp.min(self.max_backoff);
        match retry_after {
            Some(wait) if wait > backoff => wait,
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// A file summary and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Functional description.
    pub text: String,
    /// Search terms; empty for heuristic summaries.
    pub keywords: Vec<String>,
    /// Model or heuristic.
    pub source: SummarySource,
    /// Why the model could not be used, when it failed.
    pub failure: Option<String>,
}

impl Summary {
    /// True when the model failed and the text is a fallback.
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

/// Rate-limited, retrying front for a [`SummaryBackend`].
///
/// Without a backend every file gets the heuristic summary, which is not
/// considered degraded.
///
/// # Examples
///
/// ```
/// use locus_core::{LlmConfig, SummarySource, Symbols};
/// use locus_summarize::SummarizerGateway;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let gateway = SummarizerGateway::heuristic_only(&LlmConfig::default());
/// let summary = gateway
///     .summarize("src/lib.rs", None, "//! Token bucket rate limiter.\npub fn take() {}", &Symbols::default())
///     .await;
/// assert_eq!(summary.source, SummarySource::Fallback);
/// assert!(!summary.is_degraded());
/// assert!(summary.text.contains("Token bucket rate limiter"));
/// # }
/// ```
#[derive(Clone)]
pub struct SummarizerGateway {
    backend: Option<Arc<dyn SummaryBackend>>,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    retry: RetryPolicy,
    max_input_chars: usize,
}

impl SummarizerGateway {
    /// Gateway over `backend` with limits from `config`.
    pub fn new(backend: Arc<dyn SummaryBackend>, config: &LlmConfig) -> Self {
        Self::build(Some(backend), config)
    }

    /// Gateway that never calls a model.
    pub fn heuristic_only(config: &LlmConfig) -> Self {
        Self::build(None, config)
    }

    fn build(backend: Option<Arc<dyn SummaryBackend>>, config: &LlmConfig) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            call_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                max_backoff: Duration::from_secs(30),
            },
            max_input_chars: config.max_input_chars,
        }
    }

    /// Replace the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Whether a model is configured.
    pub fn has_model(&self) -> bool {
        self.backend.is_some()
    }

    /// Summarize one file. Never fails.
    ///
    /// At most `max_concurrent` calls are in flight across all clones of
    /// this gateway. Transient failures are retried; when attempts run out,
    /// or the failure is permanent, the heuristic summary is returned with
    /// `failure` set.
    pub async fn summarize(
        &self,
        path: &str,
        language: Option<&str>,
        content: &str,
        symbols: &Symbols,
    ) -> Summary {
        let Some(backend) = &self.backend else {
            return Summary {
                text: heuristic_summary(path, content, symbols),
                keywords: Vec::new(),
                source: SummarySource::Fallback,
                failure: None,
            };
        };

        let system = build_system_prompt();
        let prompt = build_summary_prompt(path, language, content, self.max_input_chars);
        let mut attempt = 0;

        let failure = loop {
            attempt += 1;
            let err = match self.attempt(backend.as_ref(), &system, &prompt).await {
                Ok(summary) => return summary,
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                break err;
            }
            let wait = self.retry.delay(attempt, err.retry_after());
            tracing::warn!(
                path,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "summarization failed; retrying"
            );
            tokio::time::sleep(wait).await;
        };

        tracing::warn!(path, attempts = attempt, error = %failure, "using fallback summary");
        Summary {
            text: heuristic_summary(path, content, symbols),
            keywords: Vec::new(),
            source: SummarySource::Fallback,
            failure: Some(failure.to_string()),
        }
    }

    async fn attempt(
        &self,
        backend: &dyn SummaryBackend,
        system: &str,
        prompt: &str,
    ) -> Result<Summary, SummarizeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SummarizeError::Config("summarizer is shut down".into()))?;

        let reply = tokio::time::timeout(self.call_timeout, backend.complete(system, prompt))
            .await
            .map_err(|_| SummarizeError::Timeout)??;
        let parsed = parse_summary_response(&reply)?;
        tracing::debug!(model = backend.name(), "summary received");
        Ok(Summary {
            text: parsed.summary,
            keywords: parsed.keywords,
            source: SummarySource::Model,
            failure: None,
        })
    }
}

/// Deterministic summary built from the file itself.
///
/// Uses the leading comment block when there is one, otherwise the first
/// lines of content, followed by up to eight symbol names.
///
/// # Examples
///
/// ```
/// use locus_core::Symbols;
/// use locus_summarize::heuristic_summary;
///
/// let symbols = Symbols { functions: vec!["login".into()], ..Symbols::default() };
/// let text = heuristic_summary("src/auth.py", "# User authentication helpers.\ndef login(): pass", &symbols);
/// assert_eq!(text, "src/auth.py: User authentication helpers. Defines: login.");
/// ```
pub fn heuristic_summary(path: &str, content: &str, symbols: &Symbols) -> String {
    let lead = leading_comment(content).unwrap_or_else(|| first_lines(content));
    let (lead, truncated) = truncate_chars(&lead, 280);
    let mut text = format!("{path}: {lead}");
    if truncated {
        text.push_str("...");
    }

    let names: Vec<&str> = symbols.iter().take(8).collect();
    if !names.is_empty() {
        if !text.ends_with('.') && !text.ends_with("...") {
            text.push('.');
        }
        text.push_str(&format!(" Defines: {}.", names.join(", ")));
    }
    text.trim_end().to_string()
}

const COMMENT_MARKERS: &[&str] = &["//!", "///", "//", "#", "--", "/**", "/*", "*/", "*", "\"\"\"", "'''"];

fn leading_comment(content: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if ["#[", "#include", "#define", "#import", "#pragma"]
            .iter()
            .any(|p| trimmed.starts_with(p))
        {
            break;
        }
        if trimmed.is_empty() || trimmed.starts_with("#!") {
            if parts.is_empty() {
                continue;
            }
            break;
        }
        let Some(marker) = COMMENT_MARKERS.iter().find(|m| trimmed.starts_with(**m)) else {
            break;
        };
        let mut text = trimmed[marker.len()..].trim();
        for closer in ["*/", "\"\"\"", "'''"] {
            text = text.strip_suffix(closer).unwrap_or(text).trim();
        }
        if !text.is_empty() {
            parts.push(text.to_string());
        }
    }
    let joined = parts.join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn first_lines(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct Scripted {
        replies: std::sync::Mutex<Vec<Result<String, SummarizeError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, SummarizeError>>) -> Self {
            replies.reverse();
            Self {
                replies: std::sync::Mutex::new(replies),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SummaryBackend for Scripted {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, SummarizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(SummarizeError::Transport("script exhausted".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn fast_config() -> LlmConfig {
        LlmConfig {
            initial_backoff_ms: 1,
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    fn auth_symbols() -> Symbols {
        Symbols {
            functions: vec!["login".into(), "logout".into()],
            ..Symbols::default()
        }
    }

    #[tokio::test]
    async fn model_reply_is_used() {
        let backend = Arc::new(Scripted::new(vec![Ok(
            r#"{"summary": "Handles user authentication.", "keywords": ["auth"]}"#.into(),
        )]));
        let gateway = SummarizerGateway::new(backend.clone(), &fast_config());
        let summary = gateway
            .summarize("src/auth.rs", Some("rust"), "fn login() {}", &auth_symbols())
            .await;
        assert_eq!(summary.text, "Handles user authentication.");
        assert_eq!(summary.keywords, vec!["auth"]);
        assert_eq!(summary.source, SummarySource::Model);
        assert!(!summary.is_degraded());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Arc::new(Scripted::new(vec![
            Err(SummarizeError::RateLimited { retry_after: None }),
            Err(SummarizeError::Upstream { status: 503, body: String::new() }),
            Ok("Plain text summary.".into()),
        ]));
        let gateway = SummarizerGateway::new(backend.clone(), &fast_config());
        let summary = gateway.summarize("a.rs", None, "fn a() {}", &Symbols::default()).await;
        assert_eq!(summary.text, "Plain text summary.");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back() {
        let backend = Arc::new(Scripted::new(vec![
            Err(SummarizeError::Timeout),
            Err(SummarizeError::Timeout),
            Err(SummarizeError::Timeout),
            Ok("never reached".into()),
        ]));
        let gateway = SummarizerGateway::new(backend.clone(), &fast_config());
        let summary = gateway
            .summarize("src/auth.rs", None, "// Login flow\nfn login() {}", &auth_symbols())
            .await;
        assert!(summary.is_degraded());
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.text, "src/auth.rs: Login flow. Defines: login, logout.");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let backend = Arc::new(Scripted::new(vec![Err(SummarizeError::Upstream {
            status: 401,
            body: "bad key".into(),
        })]));
        let gateway = SummarizerGateway::new(backend.clone(), &fast_config());
        let summary = gateway.summarize("a.rs", None, "fn a() {}", &Symbols::default()).await;
        assert!(summary.failure.unwrap().contains("401"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    struct Slow;

    #[async_trait]
    impl SummaryBackend for Slow {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, SummarizeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".into())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn per_call_timeout_applies() {
        let config = LlmConfig {
            max_attempts: 1,
            ..fast_config()
        };
        let gateway = SummarizerGateway::new(Arc::new(Slow), &config)
            .with_call_timeout(Duration::from_millis(20));
        let summary = gateway.summarize("a.rs", None, "fn a() {}", &Symbols::default()).await;
        assert!(summary.failure.unwrap().contains("timed out"));
    }

    struct Counting {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SummaryBackend for Counting {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, SummarizeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("summary".into())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn in_flight_calls_are_bounded() {
        let backend = Arc::new(Counting {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = LlmConfig {
            max_concurrent: 2,
            ..fast_config()
        };
        let gateway = SummarizerGateway::new(backend.clone(), &config);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let gateway = gateway.clone();
            tasks.spawn(async move {
                let path = format!("f{i}.rs");
                gateway
                    .summarize(&path, None, "fn f() {}", &Symbols::default())
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().text, "summary");
        }
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
        assert!(backend.peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn heuristic_without_comment_uses_first_lines() {
        let text = heuristic_summary("Makefile", "build:\n\tcargo build\n\ntest:\n", &Symbols::default());
        assert_eq!(text, "Makefile: build: cargo build test:");
    }

    #[test]
    fn heuristic_reads_block_and_docstring_comments() {
        let c = "/**\n * Session cache.\n */\nclass Cache {}";
        assert_eq!(heuristic_summary("c.ts", c, &Symbols::default()), "c.ts: Session cache.");
        let py = "\"\"\"Billing utilities.\"\"\"\nimport os";
        assert_eq!(heuristic_summary("b.py", py, &Symbols::default()), "b.py: Billing utilities.");
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
        };
        assert_eq!(policy.delay(5, None), Duration::from_secs(4));
    }
}
