//! File summarization through a language model, with a deterministic
//! fallback when the model is unavailable.
//!
//! [`SummarizerGateway`] is the only entry point the ingestion pipeline
//! uses: it bounds in-flight calls, applies a per-call timeout, retries
//! transient failures with exponential backoff, and never returns an error.

pub mod error;
pub mod gateway;
pub mod llm;
pub mod prompt;

pub use error::SummarizeError;
pub use gateway::{heuristic_summary, RetryPolicy, Summary, SummarizerGateway, SummaryBackend};
pub use llm::{LlmClient, Provider};
pub use prompt::ModelSummary;
