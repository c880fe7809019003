//! The ingestion state machine: acquire, filter, extract, summarize, store.
//!
//! Extraction runs on a blocking pool bounded by a semaphore and feeds the
//! summarization stage through a bounded channel, so slow model calls never
//! stall the parsers. Each file is an independent unit; only acquisition,
//! storage exhaustion and cancellation end a job early.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use locus_core::{
    content_hash, document_id, Collection, CollectionId, Document, FileFailure, GitFacts,
    IngestionReport, JobFailure, JobProgress, JobState, LocusConfig, LocusError, ProcessingStatus,
    RepositoryUrl, SCHEMA_VERSION,
};
use locus_git::{acquire, preflight, AcquireOptions, AcquiredRepo, HistoryIndex};
use locus_scan::{discover, extract, Classifier, DiscoveredFile, SkipReason, StaticMetadata};
use locus_store::CollectionStore;
use locus_summarize::{Summary, SummarizerGateway};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::locks::CollectionLocks;

/// Extracted files buffered ahead of the summarizer.
const CHANNEL_CAPACITY: usize = 64;

/// First delay between store retries; doubles per attempt.
const STORE_BACKOFF: Duration = Duration::from_millis(100);

/// Per-job knobs supplied by the caller.
pub struct IngestOptions {
    /// Access token for private repositories. Overrides `[github] token`.
    pub token: Option<String>,
    /// Cooperative cancellation for the whole job.
    pub cancel: CancellationToken,
    /// Receives a snapshot after every state change and finished file.
    pub progress: Option<watch::Sender<JobProgress>>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            token: None,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

impl IngestOptions {
    /// Use `token` for acquisition.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Stop the job when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish progress on `sender`.
    pub fn with_progress(mut self, sender: watch::Sender<JobProgress>) -> Self {
        self.progress = Some(sender);
        self
    }
}

/// Turns a repository into a populated collection.
///
/// Jobs for the same collection are serialized; jobs for different
/// collections run concurrently. Re-ingestion only summarizes files whose
/// content changed or whose previous attempt failed, and removes documents
/// for files that no longer exist.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use locus_core::{LocusConfig, RepositoryUrl};
/// use locus_engine::{IngestOptions, IngestionPipeline};
/// use locus_store::{HashingEmbedder, SqliteStore};
/// use locus_summarize::SummarizerGateway;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = LocusConfig::default();
/// let store = SqliteStore::in_memory(Arc::new(HashingEmbedder::new(384))).unwrap();
/// let gateway = SummarizerGateway::heuristic_only(&config.llm);
/// let pipeline = IngestionPipeline::new(Arc::new(store), gateway, config);
///
/// let url = RepositoryUrl::parse(".").unwrap();
/// let report = pipeline.ingest(&url, IngestOptions::default()).await;
/// println!("{} files indexed", report.counts.indexed);
/// # }
/// ```
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn CollectionStore>,
    gateway: SummarizerGateway,
    config: Arc<LocusConfig>,
    locks: Arc<CollectionLocks>,
}

impl IngestionPipeline {
    /// Pipeline writing to `store` and summarizing through `gateway`.
    pub fn new(store: Arc<dyn CollectionStore>, gateway: SummarizerGateway, config: LocusConfig) -> Self {
        Self {
            store,
            gateway,
            config: Arc::new(config),
            locks: Arc::new(CollectionLocks::default()),
        }
    }

    /// Share a lock registry with other pipelines over the same store.
    pub fn with_locks(mut self, locks: Arc<CollectionLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Run one ingestion job to completion, failure, or cancellation.
    ///
    /// Never returns an error: the outcome, including fatal failures, is in
    /// the report.
    pub async fn ingest(&self, url: &RepositoryUrl, mut options: IngestOptions) -> IngestionReport {
        let started = Instant::now();
        let collection_id = url.collection_id();
        let mut tracker = Tracker::new(options.progress.take());
        tracker.publish();

        info!(collection = %collection_id, url = url.canonical(), "ingestion started");

        let guard = tokio::select! {
            _ = options.cancel.cancelled() => None,
            guard = self.locks.lock(&collection_id) => Some(guard),
        };
        let result = match guard {
            Some(_guard) => {
                let result = self.execute(url, &options, &mut tracker).await;
                if result.is_err() && tracker.created_collection {
                    self.discard_if_empty(&collection_id).await;
                }
                result
            }
            None => Err(LocusError::Cancelled),
        };

        let mut counts = tracker.progress.counts;
        counts.pending = counts.discovered.saturating_sub(counts.terminal());
        let (status, failure) = match result {
            Ok(()) => (JobState::Completed, None),
            Err(err) => {
                warn!(collection = %collection_id, code = err.code(), error = %err, "ingestion failed");
                (
                    JobState::Failed,
                    Some(JobFailure {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }),
                )
            }
        };
        tracker.progress = JobProgress { state: status, counts };
        tracker.publish();

        let mut file_failures = tracker.file_failures;
        file_failures.sort_by(|a, b| a.path.cmp(&b.path));

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            collection = %collection_id,
            status = %status,
            indexed = counts.indexed,
            unchanged = counts.unchanged,
            skipped = counts.skipped,
            failed = counts.failed,
            pending = counts.pending,
            duration_ms,
            "ingestion finished"
        );

        IngestionReport {
            collection_id,
            repository_url: url.canonical().to_string(),
            status,
            counts,
            duration_ms,
            failure,
            file_failures,
        }
    }

    async fn execute(
        &self,
        url: &RepositoryUrl,
        options: &IngestOptions,
        tracker: &mut Tracker,
    ) -> Result<(), LocusError> {
        let cancel = &options.cancel;
        let attempts = self.config.ingest.store_retry_attempts;

        tracker.enter(JobState::Acquiring);
        let repo = self.acquire_repository(url, options).await?;
        let (collection, created) = self.prepare_collection(url).await?;
        tracker.created_collection = created;
        let collection_id = collection.collection_id.clone();

        tracker.enter(JobState::Filtering);
        let (history, files) = scan_tree(&repo).await?;
        tracker.progress.counts.discovered = files.len();
        debug!(files = files.len(), history = history.len(), "repository scanned");

        let existing = retry_store(attempts, || self.store.list_documents(&collection_id)).await?;
        let known: HashMap<String, String> = existing
            .iter()
            .filter(|doc| doc.status() == ProcessingStatus::Completed)
            .map(|doc| (doc.relative_path.clone(), doc.content_hash.clone()))
            .collect();
        let mut stale: HashSet<String> = existing.into_iter().map(|doc| doc.id).collect();
        ensure_live(cancel)?;

        tracker.enter(JobState::Extracting);
        let summarizers = self.config.summarization_pool_size();
        let extractors = self.config.extraction_pool_size();
        let requested = self.config.ingest.extraction_workers;
        if requested > 0 && requested < extractors {
            warn!(
                requested,
                extractors,
                summarizers,
                "extraction_workers raised above llm.max_concurrent"
            );
        }
        let work = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let producer = spawn_extraction(
            files,
            Classifier::new(&self.config.ingest),
            Arc::new(known),
            extractors,
            work.clone(),
            tx,
        );

        let stage = Arc::new(StoreStage {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            collection_id: collection_id.clone(),
            attempts,
            cancel: work.clone(),
        });
        // Summaries waiting on a gateway permit; model calls stay at `summarizers`.
        let in_flight = summarizers * 2;
        let mut tasks: JoinSet<Result<FileOutcome, LocusError>> = JoinSet::new();
        let mut fatal = None;

        tracker.enter(JobState::Summarizing);
        'receive: while let Some(item) = rx.recv().await {
            let Extracted { relative_path, result } = item;
            if !matches!(result, Extraction::Skipped(_)) {
                stale.remove(&document_id(&relative_path));
            }
            match result {
                Extraction::Skipped(reason) => {
                    debug!(path = %relative_path, %reason, "file skipped");
                    tracker.record(FileOutcome::new(relative_path, Outcome::Skipped));
                }
                Extraction::Unchanged => {
                    debug!(path = %relative_path, "file unchanged");
                    tracker.record(FileOutcome::new(relative_path, Outcome::Unchanged));
                }
                Extraction::Failed(reason) => {
                    warn!(path = %relative_path, %reason, "file failed");
                    tracker.record(FileOutcome::new(relative_path, Outcome::Failed(reason)));
                }
                Extraction::Ready(file) => {
                    let git = history.facts(&relative_path);
                    let stage = stage.clone();
                    tasks.spawn(async move { stage.process(relative_path, *file, git).await });
                    while tasks.len() >= in_flight {
                        let Some(joined) = tasks.join_next().await else { break };
                        if let Err(err) = absorb(joined, tracker) {
                            fatal = Some(err);
                            break 'receive;
                        }
                    }
                }
            }
        }

        if fatal.is_none() {
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = absorb(joined, tracker) {
                    fatal = Some(err);
                    break;
                }
            }
        }

        drop(rx);
        if fatal.is_some() {
            work.cancel();
            tasks.shutdown().await;
        }
        if let Err(err) = producer.await {
            warn!(error = %err, "extraction producer ended abnormally");
        }
        if let Some(err) = fatal {
            return Err(err);
        }
        ensure_live(cancel)?;

        tracker.enter(JobState::Storing);
        let removed = stale.len();
        for id in &stale {
            retry_store(attempts, || self.store.delete_document(&collection_id, id)).await?;
        }
        if removed > 0 {
            info!(collection = %collection_id, removed, "removed documents for deleted files");
        }
        Ok(())
    }

    async fn acquire_repository(
        &self,
        url: &RepositoryUrl,
        options: &IngestOptions,
    ) -> Result<AcquiredRepo, LocusError> {
        let acquire_options = AcquireOptions::from_config(&self.config, options.token.clone());
        let work = async {
            if url.is_github() && self.config.github.preflight {
                if let Some(repo) = preflight(
                    url,
                    acquire_options.token.as_deref(),
                    &self.config.github,
                    acquire_options.max_repo_size_mb,
                )
                .await?
                {
                    debug!(private = repo.private, size_mb = repo.size_mb(), "preflight passed");
                }
            }
            acquire(url, &acquire_options).await
        };

        tokio::select! {
            _ = options.cancel.cancelled() => Err(LocusError::Cancelled),
            result = work => result,
        }
    }

    /// Fetch the collection, creating it on first ingestion and rebuilding it
    /// when its stored layout is from another schema version. The flag is
    /// set when this call created the collection.
    async fn prepare_collection(&self, url: &RepositoryUrl) -> Result<(Collection, bool), LocusError> {
        let id = url.collection_id();
        let attempts = self.config.ingest.store_retry_attempts;

        if let Some(existing) = retry_store(attempts, || self.store.get_collection(&id)).await? {
            if existing.schema_version == SCHEMA_VERSION {
                return Ok((existing, false));
            }
            warn!(
                collection = %id,
                stored = existing.schema_version,
                current = SCHEMA_VERSION,
                "collection schema changed; rebuilding"
            );
            retry_store(attempts, || self.store.delete_collection(&id)).await?;
        }

        let collection = Collection::new(url);
        match retry_store(attempts, || self.store.create_collection(&collection)).await {
            Ok(created) => Ok((created, true)),
            Err(LocusError::CollectionExists(_)) => retry_store(attempts, || self.store.get_collection(&id))
                .await?
                .map(|existing| (existing, false))
                .ok_or_else(|| LocusError::CollectionNotFound(id.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Drop a collection this job created when it ends with no documents,
    /// so a failed first ingestion still reads as "not ingested".
    async fn discard_if_empty(&self, id: &CollectionId) {
        match self.store.count(id).await {
            Ok(0) => match self.store.delete_collection(id).await {
                Ok(_) => info!(collection = %id, "discarded empty collection of failed ingestion"),
                Err(e) => warn!(collection = %id, error = %e, "failed to discard empty collection"),
            },
            Ok(_) => {}
            Err(e) => warn!(collection = %id, error = %e, "failed to count documents"),
        }
    }
}

/// Running counts and failures for one job.
struct Tracker {
    progress: JobProgress,
    sender: Option<watch::Sender<JobProgress>>,
    file_failures: Vec<FileFailure>,
    created_collection: bool,
}

impl Tracker {
    fn new(sender: Option<watch::Sender<JobProgress>>) -> Self {
        Self {
            progress: JobProgress::default(),
            sender,
            file_failures: Vec::new(),
            created_collection: false,
        }
    }

    fn enter(&mut self, state: JobState) {
        self.progress.state = state;
        self.publish();
    }

    fn record(&mut self, outcome: FileOutcome) {
        let counts = &mut self.progress.counts;
        match outcome.status {
            Outcome::Indexed => counts.indexed += 1,
            Outcome::Unchanged => {
                counts.indexed += 1;
                counts.unchanged += 1;
            }
            Outcome::Skipped => counts.skipped += 1,
            Outcome::Failed(reason) => {
                counts.failed += 1;
                self.file_failures.push(FileFailure {
                    path: outcome.relative_path,
                    reason,
                });
            }
            Outcome::Cancelled => return,
        }
        self.publish();
    }

    fn publish(&self) {
        if let Some(sender) = &self.sender {
            sender.send_replace(self.progress);
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Indexed,
    Unchanged,
    Skipped,
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct FileOutcome {
    relative_path: String,
    status: Outcome,
}

impl FileOutcome {
    fn new(relative_path: String, status: Outcome) -> Self {
        Self { relative_path, status }
    }
}

/// What the extraction pool produced for one file.
enum Extraction {
    Skipped(SkipReason),
    Unchanged,
    Ready(Box<ExtractedFile>),
    Failed(String),
}

struct Extracted {
    relative_path: String,
    result: Extraction,
}

struct ExtractedFile {
    text: String,
    metadata: StaticMetadata,
}

async fn scan_tree(repo: &AcquiredRepo) -> Result<(HistoryIndex, Vec<DiscoveredFile>), LocusError> {
    let history_root = repo.root.clone();
    let walk_root = repo.root.clone();
    let (history, files) = tokio::join!(
        tokio::task::spawn_blocking(move || HistoryIndex::build(&history_root)),
        tokio::task::spawn_blocking(move || discover(&walk_root)),
    );
    Ok((history.map_err(worker_failed)?, files.map_err(worker_failed)??))
}

/// Classify and extract every file on a bounded blocking pool, sending
/// results in completion order.
fn spawn_extraction(
    files: Vec<DiscoveredFile>,
    classifier: Classifier,
    known: Arc<HashMap<String, String>>,
    workers: usize,
    cancel: CancellationToken,
    tx: mpsc::Sender<Extracted>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let classifier = Arc::new(classifier);
        let mut tasks = JoinSet::new();

        for file in files {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let classifier = classifier.clone();
            let known = known.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let relative_path = file.relative_path.clone();
                let result = tokio::task::spawn_blocking(move || extract_file(&classifier, &file, &known))
                    .await
                    .unwrap_or_else(|e| Extraction::Failed(format!("extraction worker failed: {e}")));
                // The receiver is gone only when the job is already over.
                let _ = tx.send(Extracted { relative_path, result }).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    })
}

fn extract_file(classifier: &Classifier, file: &DiscoveredFile, known: &HashMap<String, String>) -> Extraction {
    let verdict = classifier.classify_file(&file.absolute_path, Path::new(&file.relative_path));
    if !verdict.include {
        return Extraction::Skipped(verdict.skip_reason.unwrap_or(SkipReason::Unreadable));
    }

    let bytes = match std::fs::read(&file.absolute_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %file.relative_path, error = %e, "unreadable file");
            return Extraction::Skipped(SkipReason::Unreadable);
        }
    };
    if known
        .get(&file.relative_path)
        .is_some_and(|hash| *hash == content_hash(&bytes))
    {
        return Extraction::Unchanged;
    }

    let metadata = extract(&file.relative_path, &bytes);
    if let Some(reason) = &metadata.degraded {
        warn!(path = %file.relative_path, %reason, "extraction degraded");
    }
    Extraction::Ready(Box::new(ExtractedFile {
        text: String::from_utf8_lossy(&bytes).into_owned(),
        metadata,
    }))
}

/// Summarize and persist one extracted file.
struct StoreStage {
    store: Arc<dyn CollectionStore>,
    gateway: SummarizerGateway,
    collection_id: CollectionId,
    attempts: u32,
    cancel: CancellationToken,
}

impl StoreStage {
    async fn process(
        &self,
        relative_path: String,
        file: ExtractedFile,
        git: GitFacts,
    ) -> Result<FileOutcome, LocusError> {
        if self.cancel.is_cancelled() {
            return Ok(FileOutcome::new(relative_path, Outcome::Cancelled));
        }

        let metadata = &file.metadata;
        let summary = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Ok(FileOutcome::new(relative_path, Outcome::Cancelled));
            }
            summary = self.gateway.summarize(
                &relative_path,
                metadata.language.as_deref(),
                &file.text,
                &metadata.symbols,
            ) => summary,
        };
        if self.cancel.is_cancelled() {
            return Ok(FileOutcome::new(relative_path, Outcome::Cancelled));
        }

        let document = build_document(&relative_path, file.metadata, git, summary);
        retry_store(self.attempts, || {
            self.store.upsert_document(&self.collection_id, &document)
        })
        .await?;

        let status = match &document.ingestion.failure_reason {
            Some(reason) => Outcome::Failed(format!("summarization failed: {reason}")),
            None => Outcome::Indexed,
        };
        debug!(path = %relative_path, status = %document.ingestion.processing_status, "document stored");
        Ok(FileOutcome::new(relative_path, status))
    }
}

/// Assemble the stored record for a file.
///
/// A fallback summary caused by a model failure marks the document failed
/// but keeps it searchable.
fn build_document(relative_path: &str, metadata: StaticMetadata, git: GitFacts, summary: Summary) -> Document {
    let mut doc = Document::new(relative_path, &metadata.content_hash);
    doc.language = metadata.language;
    doc.size_bytes = metadata.size_bytes;
    doc.line_count = metadata.line_count;
    doc.symbols = metadata.symbols;
    doc.imports = metadata.imports;
    doc.exports = metadata.exports;
    doc.complexity_score = metadata.complexity_score;
    doc.git = git;
    doc.summary = summary.text;
    doc.keywords = summary.keywords;
    doc.ingestion.summary_source = summary.source;
    match summary.failure {
        Some(reason) => {
            doc.ingestion.processing_status = ProcessingStatus::Failed;
            doc.ingestion.failure_reason = Some(reason);
        }
        None => doc.ingestion.processing_status = ProcessingStatus::Completed,
    }
    doc
}

fn absorb(
    joined: Result<Result<FileOutcome, LocusError>, JoinError>,
    tracker: &mut Tracker,
) -> Result<(), LocusError> {
    let outcome = joined.map_err(worker_failed)??;
    tracker.record(outcome);
    Ok(())
}

/// Run a store call, retrying transient failures with exponential backoff.
pub(crate) async fn retry_store<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, LocusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LocusError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(err) if err.is_transient() && attempt < attempts => {
                let wait = STORE_BACKOFF * 2u32.pow((attempt - 1).min(6));
                warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "store unavailable; retrying");
                tokio::time::sleep(wait).await;
            }
            result => return result,
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), LocusError> {
    if cancel.is_cancelled() {
        Err(LocusError::Cancelled)
    } else {
        Ok(())
    }
}

fn worker_failed(err: JoinError) -> LocusError {
    LocusError::Io(std::io::Error::other(format!("worker task failed: {err}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use locus_core::{Symbols, SummarySource};

    use super::*;

    fn metadata() -> StaticMetadata {
        extract("src/auth.rs", b"/// Login.\npub fn login() {}\n")
    }

    #[test]
    fn model_summary_completes_the_document() {
        let summary = Summary {
            text: "Handles login.".into(),
            keywords: vec!["auth".into()],
            source: SummarySource::Model,
            failure: None,
        };
        let doc = build_document("src/auth.rs", metadata(), GitFacts::default(), summary);
        assert_eq!(doc.status(), ProcessingStatus::Completed);
        assert_eq!(doc.symbols.functions, vec!["login"]);
        assert_eq!(doc.keywords, vec!["auth"]);
        assert_eq!(doc.id, document_id("src/auth.rs"));
        assert!(doc.ingestion.failure_reason.is_none());
    }

    #[test]
    fn degraded_summary_fails_the_document_but_keeps_text() {
        let summary = Summary {
            text: "src/auth.rs: Login. Defines: login.".into(),
            keywords: Vec::new(),
            source: SummarySource::Fallback,
            failure: Some("rate limited".into()),
        };
        let doc = build_document("src/auth.rs", metadata(), GitFacts::default(), summary);
        assert_eq!(doc.status(), ProcessingStatus::Failed);
        assert_eq!(doc.ingestion.summary_source, SummarySource::Fallback);
        assert_eq!(doc.ingestion.failure_reason.as_deref(), Some("rate limited"));
        assert!(doc.summary.contains("login"));
    }

    #[test]
    fn heuristic_only_summary_still_completes() {
        let summary = Summary {
            text: "src/auth.rs: Login.".into(),
            keywords: Vec::new(),
            source: SummarySource::Fallback,
            failure: None,
        };
        let doc = build_document("src/auth.rs", metadata(), GitFacts::default(), summary);
        assert_eq!(doc.status(), ProcessingStatus::Completed);
        assert_eq!(doc.symbols, Symbols { functions: vec!["login".into()], ..Symbols::default() });
    }

    #[tokio::test]
    async fn transient_store_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let result = retry_store(3, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LocusError::StoreUnavailable("locked".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn store_retries_stop_at_the_limit() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_store(2, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LocusError::StoreUnavailable("locked".into()))
        })
        .await;
        assert!(matches!(result, Err(LocusError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_store_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_store(5, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LocusError::Database("corrupt".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn denied_files_are_skipped_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0, 0]).unwrap();
        let file = DiscoveredFile {
            relative_path: "logo.png".into(),
            absolute_path: path,
            size_bytes: 6,
        };
        let classifier = Classifier::new(&LocusConfig::default().ingest);
        let result = extract_file(&classifier, &file, &HashMap::new());
        assert!(matches!(result, Extraction::Skipped(SkipReason::DeniedExtension)));
    }

    #[test]
    fn known_hash_short_circuits_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.rs");
        std::fs::write(&path, b"pub fn add() {}\n").unwrap();
        let file = DiscoveredFile {
            relative_path: "lib.rs".into(),
            absolute_path: path,
            size_bytes: 16,
        };
        let classifier = Classifier::new(&LocusConfig::default().ingest);

        let mut known = HashMap::new();
        known.insert("lib.rs".to_string(), content_hash(b"pub fn add() {}\n"));
        assert!(matches!(extract_file(&classifier, &file, &known), Extraction::Unchanged));

        known.insert("lib.rs".to_string(), "stale".to_string());
        assert!(matches!(extract_file(&classifier, &file, &known), Extraction::Ready(_)));
    }
}
