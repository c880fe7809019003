#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use locus_core::{Collection, CollectionId, Document, Filters, LocusConfig, LocusError};
use locus_store::{CollectionStore, HashingEmbedder, Predicate, ScoredDocument, SqliteStore};
use locus_summarize::{SummarizeError, SummaryBackend};
use tokio::sync::Notify;

/// Model double: answers with a JSON summary naming the file, and fails
/// permanently for any path listed in `failing`.
pub struct ScriptedBackend {
    pub failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryBackend for ScriptedBackend {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = prompt
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("File: "))
            .unwrap_or("unknown")
            .to_string();
        if self.failing.contains(&path) {
            return Err(SummarizeError::Upstream {
                status: 400,
                body: "context length exceeded".into(),
            });
        }
        Ok(serde_json::json!({
            "summary": format!("Summary of {path}."),
            "keywords": ["fixture"],
        })
        .to_string())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Model double that never answers, announcing each call.
pub struct StalledBackend {
    pub started: Notify,
}

#[async_trait]
impl SummaryBackend for StalledBackend {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, SummarizeError> {
        self.started.notify_one();
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// Store wrapper that injects failures into selected calls.
pub struct FaultyStore {
    pub inner: SqliteStore,
    /// Upserts left to fail with `StoreUnavailable`; `u32::MAX` fails forever.
    pub upsert_failures: AtomicU32,
    pub fail_text_queries: bool,
    pub text_query_delay: Option<Duration>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: memory_store(),
            upsert_failures: AtomicU32::new(0),
            fail_text_queries: false,
            text_query_delay: None,
        }
    }
}

#[async_trait]
impl CollectionStore for FaultyStore {
    async fn create_collection(&self, collection: &Collection) -> Result<Collection, LocusError> {
        self.inner.create_collection(collection).await
    }

    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>, LocusError> {
        self.inner.get_collection(id).await
    }

    async fn list_collections(&self) -> Result<Vec<Collection>, LocusError> {
        self.inner.list_collections().await
    }

    async fn delete_collection(&self, id: &CollectionId) -> Result<bool, LocusError> {
        self.inner.delete_collection(id).await
    }

    async fn upsert_document(&self, id: &CollectionId, document: &Document) -> Result<(), LocusError> {
        let remaining = self.upsert_failures.load(Ordering::SeqCst);
        if remaining == u32::MAX {
            return Err(LocusError::StoreUnavailable("database is locked".into()));
        }
        if remaining > 0 {
            self.upsert_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(LocusError::StoreUnavailable("database is locked".into()));
        }
        self.inner.upsert_document(id, document).await
    }

    async fn get_document(&self, id: &CollectionId, document_id: &str) -> Result<Option<Document>, LocusError> {
        self.inner.get_document(id, document_id).await
    }

    async fn list_documents(&self, id: &CollectionId) -> Result<Vec<Document>, LocusError> {
        self.inner.list_documents(id).await
    }

    async fn delete_document(&self, id: &CollectionId, document_id: &str) -> Result<bool, LocusError> {
        self.inner.delete_document(id, document_id).await
    }

    async fn query_by_text(
        &self,
        id: &CollectionId,
        text: &str,
        filters: &Filters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, LocusError> {
        if let Some(delay) = self.text_query_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_text_queries {
            return Err(LocusError::Embedding("embedding service unavailable".into()));
        }
        self.inner.query_by_text(id, text, filters, limit).await
    }

    async fn query_by_predicate(
        &self,
        id: &CollectionId,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<Document>, LocusError> {
        self.inner.query_by_predicate(id, predicate, limit).await
    }

    async fn count(&self, id: &CollectionId) -> Result<usize, LocusError> {
        self.inner.count(id).await
    }
}

pub fn memory_store() -> SqliteStore {
    SqliteStore::in_memory(Arc::new(HashingEmbedder::new(256))).unwrap()
}

/// Configuration with fast retries and a small extraction pool.
pub fn test_config() -> LocusConfig {
    let mut config = LocusConfig::default();
    config.llm.initial_backoff_ms = 1;
    config.llm.timeout_secs = 5;
    config.ingest.extraction_workers = 2;
    config
}

pub fn write(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Ten files: eight sources (one of them `src/broken.rs`) and two binaries.
pub fn ten_file_repo(root: &Path) {
    write(root, "src/main.rs", b"fn main() {\n    locus::run();\n}\n");
    write(root, "src/auth.rs", b"/// User authentication.\npub fn login() {}\n");
    write(root, "src/session.rs", b"pub struct Session;\nimpl Session { pub fn renew(&self) {} }\n");
    write(root, "src/broken.rs", b"pub fn broken() {}\n");
    write(root, "src/db/pool.rs", b"pub fn connect() -> bool { true }\n");
    write(root, "web/app.ts", b"export function render(): void {}\n");
    write(root, "scripts/build.py", b"import os\n\ndef build():\n    pass\n");
    write(root, "README.md", b"# Fixture\n\nA test repository.\n");
    write(root, "assets/logo.png", &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0]);
    write(root, "data/blob.dat", &[0u8, 1, 2, 3, 0, 0, 0, 255, 254, 0]);
}
