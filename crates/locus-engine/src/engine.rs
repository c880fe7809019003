use std::sync::Arc;

use locus_core::{
    Collection, CollectionSummary, IngestionReport, LlmConfig, LocusConfig, LocusError,
    QueryRequest, QueryResponse, RepositoryUrl,
};
use locus_store::{embedder_from_config, CollectionStore, SqliteStore};
use locus_summarize::{LlmClient, Provider, SummarizerGateway};
use tracing::{info, warn};

use crate::locks::CollectionLocks;
use crate::orchestrator::RetrievalOrchestrator;
use crate::pipeline::{IngestOptions, IngestionPipeline};
use crate::session::{summarize_collection, Session};

/// Everything a front end needs, wired from one configuration.
///
/// The engine holds no session state; call [`Engine::session`] once per
/// client.
pub struct Engine {
    config: LocusConfig,
    store: Arc<dyn CollectionStore>,
    locks: Arc<CollectionLocks>,
    pipeline: IngestionPipeline,
    orchestrator: RetrievalOrchestrator,
}

impl Engine {
    /// Open the SQLite store under `[storage] data_dir`, pick the embedder
    /// and summarization model, and wire the pipeline and orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::Io`] if the data directory cannot be created,
    /// [`LocusError::Config`] for an unusable embedding or model setup, or
    /// [`LocusError::Database`] if the database cannot be opened.
    pub fn from_config(config: LocusConfig) -> Result<Self, LocusError> {
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let embedder = embedder_from_config(&config.embedding)?;
        let store = SqliteStore::open(&config.storage.database_path(), embedder)?;
        let gateway = gateway_from_config(&config.llm)?;
        Ok(Self::new(config, Arc::new(store), gateway))
    }

    /// Engine over an existing store and gateway.
    pub fn new(config: LocusConfig, store: Arc<dyn CollectionStore>, gateway: SummarizerGateway) -> Self {
        let locks = Arc::new(CollectionLocks::default());
        let pipeline = IngestionPipeline::new(store.clone(), gateway, config.clone()).with_locks(locks.clone());
        let orchestrator = RetrievalOrchestrator::new(store.clone(), config.retrieval.clone());
        Self {
            config,
            store,
            locks,
            pipeline,
            orchestrator,
        }
    }

    /// Configuration the engine was built from.
    pub fn config(&self) -> &LocusConfig {
        &self.config
    }

    /// The collection store.
    pub fn store(&self) -> Arc<dyn CollectionStore> {
        self.store.clone()
    }

    /// The ingestion pipeline.
    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    /// The retrieval orchestrator.
    pub fn orchestrator(&self) -> &RetrievalOrchestrator {
        &self.orchestrator
    }

    /// A fresh session with nothing active.
    pub fn session(&self) -> Session {
        Session::new(self.store.clone(), self.orchestrator.clone()).with_locks(self.locks.clone())
    }

    /// Ingest a repository. See [`IngestionPipeline::ingest`].
    pub async fn ingest(&self, url: &RepositoryUrl, options: IngestOptions) -> IngestionReport {
        self.pipeline.ingest(url, options).await
    }

    /// Answer a query against any collection.
    pub async fn search(&self, request: &QueryRequest) -> Result<QueryResponse, LocusError> {
        self.orchestrator.search(request).await
    }

    /// Summary of the collection for `url`, if it was ingested.
    pub async fn info(&self, url: &RepositoryUrl) -> Result<Option<CollectionSummary>, LocusError> {
        match self.store.get_collection(&url.collection_id()).await? {
            Some(collection) => summarize_collection(self.store.as_ref(), &collection).await.map(Some),
            None => Ok(None),
        }
    }

    /// Every collection, ordered by id.
    pub async fn list(&self) -> Result<Vec<Collection>, LocusError> {
        self.store.list_collections().await
    }

    /// Delete the collection for `url` and any managed clone.
    ///
    /// Waits for a running ingestion of the same collection to finish.
    /// Returns whether the collection existed.
    pub async fn delete(&self, url: &RepositoryUrl) -> Result<bool, LocusError> {
        let id = url.collection_id();
        let _guard = self.locks.lock(&id).await;
        let existed = self.store.delete_collection(&id).await?;

        let clone = self.config.storage.clones_dir().join(id.as_str());
        if tokio::fs::try_exists(&clone).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&clone).await {
                warn!(path = %clone.display(), error = %e, "failed to remove clone");
            }
        }
        if existed {
            info!(collection = %id, "collection deleted");
        }
        Ok(existed)
    }
}

/// Build the summarizer gateway for `config`.
///
/// Provider `"none"`, or a hosted provider without an API key, yields a
/// heuristic-only gateway: documents are still indexed, with summaries
/// built from their leading comments and symbols.
///
/// # Errors
///
/// Returns [`LocusError::Llm`] when the model client cannot be built.
///
/// # Examples
///
/// ```
/// use locus_core::LlmConfig;
/// use locus_engine::gateway_from_config;
///
/// let config = LlmConfig { provider: "none".into(), ..LlmConfig::default() };
/// assert!(!gateway_from_config(&config).unwrap().has_model());
/// ```
pub fn gateway_from_config(config: &LlmConfig) -> Result<SummarizerGateway, LocusError> {
    if Provider::from_name(&config.provider).is_none() {
        info!("summarization model disabled; using heuristic summaries");
        return Ok(SummarizerGateway::heuristic_only(config));
    }
    if config.api_key.is_none() && config.base_url.is_none() && config.provider != "ollama" {
        warn!(
            provider = %config.provider,
            "no API key for the summarization model; using heuristic summaries"
        );
        return Ok(SummarizerGateway::heuristic_only(config));
    }
    let client = LlmClient::new(config)?;
    Ok(SummarizerGateway::new(Arc::new(client), config))
}
