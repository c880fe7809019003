use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CollectionId, RepositoryUrl};

/// Version of the persisted [`Document`] layout.
///
/// Collections written with another version must be re-ingested.
pub const SCHEMA_VERSION: u32 = 1;

/// One repository's isolated, searchable set of documents.
///
/// # Examples
///
/// ```
/// use locus_core::{Collection, RepositoryUrl, SCHEMA_VERSION};
///
/// let url = RepositoryUrl::parse("https://github.com/acme/widgets").unwrap();
/// let collection = Collection::new(&url);
/// assert_eq!(collection.collection_id.as_str(), "repo-6e07f075");
/// assert_eq!(collection.name, "widgets");
/// assert_eq!(collection.schema_version, SCHEMA_VERSION);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Identifier derived from `repository_url`.
    pub collection_id: CollectionId,
    /// Canonical repository URL.
    pub repository_url: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// When the collection was first created.
    pub created_at: DateTime<Utc>,
    /// Document layout version.
    pub schema_version: u32,
}

impl Collection {
    /// Describe a new collection for `url`, stamped now.
    pub fn new(url: &RepositoryUrl) -> Self {
        Self {
            collection_id: url.collection_id(),
            repository_url: url.canonical().to_string(),
            owner: url.owner().to_string(),
            name: url.name().to_string(),
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Browser link to a file when the repository lives on github.com.
    pub fn github_blob_url(&self, relative_path: &str) -> Option<String> {
        self.repository_url
            .starts_with("https://github.com/")
            .then(|| format!("{}/blob/HEAD/{relative_path}", self.repository_url))
    }
}

/// Per-file processing status.
///
/// # Examples
///
/// ```
/// use locus_core::ProcessingStatus;
///
/// let status: ProcessingStatus = "completed".parse().unwrap();
/// assert_eq!(status, ProcessingStatus::Completed);
/// assert_eq!(ProcessingStatus::Skipped.to_string(), "skipped");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Discovered, not yet processed.
    #[default]
    Pending,
    /// Summarized and stored.
    Completed,
    /// Processing failed; the document may carry a fallback summary.
    Failed,
    /// Intentionally excluded.
    Skipped,
}

impl ProcessingStatus {
    /// Lowercase name used in storage and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            "skipped" => Ok(ProcessingStatus::Skipped),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// Statically extracted symbol names, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbols {
    /// Function and method names.
    #[serde(default)]
    pub functions: Vec<String>,
    /// Class, struct, trait, interface and enum names.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Top-level constants and variables.
    #[serde(default)]
    pub variables: Vec<String>,
}

impl Symbols {
    /// Every name, functions first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .chain(&self.classes)
            .chain(&self.variables)
            .map(String::as_str)
    }

    /// Total number of names.
    pub fn len(&self) -> usize {
        self.functions.len() + self.classes.len() + self.variables.len()
    }

    /// True when nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Version-control facts for one file. Absent when history is unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitFacts {
    /// Time of the newest commit touching the file.
    pub last_modified: Option<DateTime<Utc>>,
    /// Author of that commit.
    pub author: Option<String>,
    /// Short hash of that commit.
    pub commit_hash: Option<String>,
    /// Time of the oldest reachable commit touching the file.
    pub creation_date: Option<DateTime<Utc>>,
}

/// Where a document's summary came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    /// Produced by the language model.
    #[default]
    Model,
    /// Heuristic fallback after the model failed.
    Fallback,
}

/// Facts about the ingestion run that produced a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionFacts {
    /// When the document was stored.
    pub ingested_at: DateTime<Utc>,
    /// Outcome of processing.
    pub processing_status: ProcessingStatus,
    /// Model or fallback summary.
    #[serde(default)]
    pub summary_source: SummarySource,
    /// Why processing failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// The indexed representation of one source file.
///
/// # Examples
///
/// ```
/// use locus_core::{Document, ProcessingStatus};
///
/// let doc = Document::new("src/auth.rs", "abc123");
/// assert_eq!(doc.id, locus_core::document_id("src/auth.rs"));
/// assert_eq!(doc.ingestion.processing_status, ProcessingStatus::Pending);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable hash of `relative_path`.
    pub id: String,
    /// Path from the repository root, forward slashes.
    pub relative_path: String,
    /// Detected language, if any.
    pub language: Option<String>,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Number of lines.
    pub line_count: usize,
    /// SHA-256 of the raw bytes.
    pub content_hash: String,
    /// Functional description offered to semantic search.
    pub summary: String,
    /// Model-derived keywords offered to keyword search.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Extracted symbol names.
    #[serde(default)]
    pub symbols: Symbols,
    /// Imported modules or packages.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Exported names.
    #[serde(default)]
    pub exports: Vec<String>,
    /// Decision-point count heuristic.
    pub complexity_score: f64,
    /// Version-control facts.
    #[serde(default)]
    pub git: GitFacts,
    /// Ingestion facts.
    pub ingestion: IngestionFacts,
}

impl Document {
    /// A pending document with empty metadata.
    pub fn new(relative_path: &str, content_hash: &str) -> Self {
        Self {
            id: crate::id::document_id(relative_path),
            relative_path: relative_path.to_string(),
            language: None,
            size_bytes: 0,
            line_count: 0,
            content_hash: content_hash.to_string(),
            summary: String::new(),
            keywords: Vec::new(),
            symbols: Symbols::default(),
            imports: Vec::new(),
            exports: Vec::new(),
            complexity_score: 0.0,
            git: GitFacts::default(),
            ingestion: IngestionFacts {
                ingested_at: Utc::now(),
                processing_status: ProcessingStatus::Pending,
                summary_source: SummarySource::Model,
                failure_reason: None,
            },
        }
    }

    /// Current processing status.
    pub fn status(&self) -> ProcessingStatus {
        self.ingestion.processing_status
    }
}

/// A retrieval method.
///
/// # Examples
///
/// ```
/// use locus_core::Strategy;
///
/// let s: Strategy = "semantic".parse().unwrap();
/// assert_eq!(s, Strategy::Semantic);
/// assert_eq!(Strategy::Keyword.to_string(), "keyword");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Exact-substring match over summary, keywords, symbols and path.
    Keyword,
    /// Match over function/class/variable names.
    Symbol,
    /// Free-text similarity over summaries.
    Semantic,
    /// Routed combination of the above.
    Hybrid,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Keyword => write!(f, "keyword"),
            Strategy::Symbol => write!(f, "symbol"),
            Strategy::Semantic => write!(f, "semantic"),
            Strategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" | "metadata" => Ok(Strategy::Keyword),
            "symbol" => Ok(Strategy::Symbol),
            "semantic" => Ok(Strategy::Semantic),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Structured narrowing applied by every strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    /// Only documents in this language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Only paths starting with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Only paths containing this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_contains: Option<String>,
}

impl Filters {
    /// True when no filter is set.
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.path_prefix.is_none() && self.path_contains.is_none()
    }

    /// Whether `doc` passes every filter.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(lang) = &self.language {
            if !doc
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(lang))
            {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !doc.relative_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.path_contains {
            if !doc
                .relative_path
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// A search request against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Collection to search.
    pub collection_id: CollectionId,
    /// Query text.
    pub text: String,
    /// Explicit strategy; `None` means hybrid routing.
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// Structured filters.
    #[serde(default)]
    pub filters: Filters,
    /// Maximum results.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryRequest {
    /// A hybrid request with no filters and the default limit.
    pub fn new(collection_id: CollectionId, text: impl Into<String>) -> Self {
        Self {
            collection_id,
            text: text.into(),
            strategy: None,
            filters: Filters::default(),
            limit: None,
        }
    }
}

/// One ranked, file-attributed hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matching document.
    pub document_id: String,
    /// Path from the repository root.
    pub relative_path: String,
    /// Document summary.
    pub summary: String,
    /// Relevance in `[0, 1]`.
    pub score: f64,
    /// Strategy that produced the score.
    pub matched_by: Strategy,
    /// Extracted symbols.
    pub symbols: Symbols,
    /// Detected language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Browser link, for GitHub repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
}

/// How one strategy fared during a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StrategyStatus {
    /// Ran to completion.
    Completed { hits: usize },
    /// Returned an error; its results are missing.
    Failed { reason: String },
    /// Missed the query deadline.
    TimedOut,
}

/// A strategy and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRun {
    /// Which strategy ran.
    pub strategy: Strategy,
    /// What happened.
    #[serde(flatten)]
    pub status: StrategyStatus,
}

/// Overall outcome of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// At least one result from a healthy search.
    Found,
    /// Every strategy ran and nothing matched.
    NothingFound,
    /// At least one strategy failed or timed out.
    Degraded,
    /// The collection has not been ingested.
    NotIngested,
}

/// Ranked answer to a [`QueryRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Collection searched.
    pub collection_id: CollectionId,
    /// Query text.
    pub query: String,
    /// Overall outcome.
    pub outcome: SearchOutcome,
    /// True when a strategy missed the deadline.
    pub partial: bool,
    /// Per-strategy outcomes, in execution-plan order.
    pub strategies: Vec<StrategyRun>,
    /// Merged, ranked results.
    pub results: Vec<SearchResult>,
    /// Wall-clock time spent.
    pub elapsed_ms: u64,
}

impl QueryResponse {
    /// Response for a collection that has not been ingested.
    pub fn not_ingested(collection_id: CollectionId, query: &str) -> Self {
        Self {
            collection_id,
            query: query.to_string(),
            outcome: SearchOutcome::NotIngested,
            partial: false,
            strategies: Vec::new(),
            results: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Ingestion job state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Cloning or opening the repository.
    #[default]
    Acquiring,
    /// Discovering and classifying files.
    Filtering,
    /// Extracting static metadata.
    Extracting,
    /// Waiting on the summarizer.
    Summarizing,
    /// Writing documents and removing stale ones.
    Storing,
    /// Every file reached a terminal status.
    Completed,
    /// Unrecoverable error or cancellation.
    Failed,
}

impl JobState {
    /// Whether the job has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Acquiring => "acquiring",
            JobState::Filtering => "filtering",
            JobState::Extracting => "extracting",
            JobState::Summarizing => "summarizing",
            JobState::Storing => "storing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-status file counts for a job.
///
/// `indexed` includes `unchanged` files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Files found in the repository.
    pub discovered: usize,
    /// Files with a completed document after this run.
    pub indexed: usize,
    /// Indexed files whose content was already stored.
    pub unchanged: usize,
    /// Files excluded by the classifier.
    pub skipped: usize,
    /// Files that failed extraction, summarization or storage.
    pub failed: usize,
    /// Files not finished when the job stopped.
    pub pending: usize,
}

impl StatusCounts {
    /// Files that reached a terminal status.
    pub fn terminal(&self) -> usize {
        self.indexed + self.skipped + self.failed
    }
}

/// Snapshot published while a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Current job state.
    pub state: JobState,
    /// Counts so far.
    pub counts: StatusCounts,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Stable error code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// A file that did not index cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    /// Path from the repository root.
    pub path: String,
    /// What went wrong.
    pub reason: String,
}

/// Summary of one ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    /// Collection written to.
    pub collection_id: CollectionId,
    /// Canonical repository URL.
    pub repository_url: String,
    /// `Completed` or `Failed`.
    pub status: JobState,
    /// Per-status counts.
    pub counts: StatusCounts,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Set when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    /// Per-file failures, sorted by path.
    #[serde(default)]
    pub file_failures: Vec<FileFailure>,
}

impl IngestionReport {
    /// Whether the job completed.
    pub fn is_completed(&self) -> bool {
        self.status == JobState::Completed
    }
}

/// What `info` reports about a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// The collection.
    pub collection: Collection,
    /// Stored documents.
    pub document_count: usize,
    /// Documents per processing status.
    pub status_counts: BTreeMap<String, usize>,
    /// Documents per language.
    pub languages: BTreeMap<String, usize>,
    /// Newest `ingested_at` across documents.
    pub last_ingested_at: Option<DateTime<Utc>>,
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use locus_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable listing.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
    /// Markdown list.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
