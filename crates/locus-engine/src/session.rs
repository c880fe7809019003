use std::collections::BTreeMap;
use std::sync::Arc;

use locus_core::{
    Collection, CollectionSummary, Filters, LocusError, QueryRequest, QueryResponse, RepositoryUrl,
    Strategy,
};
use locus_store::CollectionStore;
use tokio::sync::RwLock;
use tracing::info;

use crate::locks::CollectionLocks;
use crate::orchestrator::RetrievalOrchestrator;

/// The active collection of one client session.
///
/// Each session (one CLI invocation, one MCP connection) owns its own
/// `Session`; nothing here is process-wide. Switching and deleting hold the
/// write lock, so a search never observes a half-switched session.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use locus_core::{Collection, RepositoryUrl, RetrievalConfig};
/// use locus_engine::{RetrievalOrchestrator, Session};
/// use locus_store::{CollectionStore, HashingEmbedder, SqliteStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store: Arc<dyn CollectionStore> =
///     Arc::new(SqliteStore::in_memory(Arc::new(HashingEmbedder::new(64))).unwrap());
/// let session = Session::new(
///     store.clone(),
///     RetrievalOrchestrator::new(store.clone(), RetrievalConfig::default()),
/// );
///
/// let url = RepositoryUrl::parse("https://github.com/acme/widgets").unwrap();
/// assert!(session.activate(&url).await.unwrap().is_none());
///
/// store.create_collection(&Collection::new(&url)).await.unwrap();
/// let active = session.activate(&url).await.unwrap().unwrap();
/// assert_eq!(active.collection_id.as_str(), "repo-6e07f075");
/// # }
/// ```
pub struct Session {
    store: Arc<dyn CollectionStore>,
    orchestrator: RetrievalOrchestrator,
    locks: Arc<CollectionLocks>,
    active: RwLock<Option<Arc<Collection>>>,
}

impl Session {
    /// A session with no active collection.
    pub fn new(store: Arc<dyn CollectionStore>, orchestrator: RetrievalOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
            locks: Arc::new(CollectionLocks::default()),
            active: RwLock::new(None),
        }
    }

    /// Share the lock registry used by ingestion, so deleting waits for a
    /// running job on the same collection.
    pub fn with_locks(mut self, locks: Arc<CollectionLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Make the collection for `url` active.
    ///
    /// Returns `None`, leaving the current selection untouched, when the
    /// repository has not been ingested. Collections are never created here.
    pub async fn activate(&self, url: &RepositoryUrl) -> Result<Option<Arc<Collection>>, LocusError> {
        let id = url.collection_id();
        let mut active = self.active.write().await;
        let Some(collection) = self.store.get_collection(&id).await? else {
            return Ok(None);
        };
        let collection = Arc::new(collection);
        *active = Some(collection.clone());
        info!(collection = %id, url = url.canonical(), "collection activated");
        Ok(Some(collection))
    }

    /// The active collection, if any.
    pub async fn current(&self) -> Option<Arc<Collection>> {
        self.active.read().await.clone()
    }

    /// Clear the selection, returning what was active.
    pub async fn deactivate(&self) -> Option<Arc<Collection>> {
        self.active.write().await.take()
    }

    /// Document counts and freshness for the active collection.
    pub async fn info(&self) -> Result<Option<CollectionSummary>, LocusError> {
        let Some(collection) = self.current().await else {
            return Ok(None);
        };
        summarize_collection(self.store.as_ref(), &collection).await.map(Some)
    }

    /// Delete the active collection and its documents, then clear the
    /// selection. Waits for a running ingestion of the collection. On a
    /// store error the selection is kept.
    pub async fn delete_active(&self) -> Result<Option<Arc<Collection>>, LocusError> {
        let mut active = self.active.write().await;
        let Some(collection) = active.clone() else {
            return Ok(None);
        };
        let _guard = self.locks.lock(&collection.collection_id).await;
        self.store.delete_collection(&collection.collection_id).await?;
        *active = None;
        info!(collection = %collection.collection_id, "active collection deleted");
        Ok(Some(collection))
    }

    /// Search the active collection.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::CollectionNotFound`] when no collection is
    /// active.
    pub async fn search(
        &self,
        text: &str,
        strategy: Option<Strategy>,
        filters: Filters,
        limit: Option<usize>,
    ) -> Result<QueryResponse, LocusError> {
        let active = self.active.read().await;
        let Some(collection) = active.as_ref() else {
            return Err(LocusError::CollectionNotFound(
                "no active repository; activate one first".into(),
            ));
        };
        let request = QueryRequest {
            collection_id: collection.collection_id.clone(),
            text: text.to_string(),
            strategy,
            filters,
            limit,
        };
        self.orchestrator.search(&request).await
    }
}

/// Count a collection's documents by status and language.
pub async fn summarize_collection(
    store: &dyn CollectionStore,
    collection: &Collection,
) -> Result<CollectionSummary, LocusError> {
    let documents = store.list_documents(&collection.collection_id).await?;

    let mut status_counts = BTreeMap::new();
    let mut languages = BTreeMap::new();
    for doc in &documents {
        *status_counts
            .entry(doc.status().as_str().to_string())
            .or_insert(0) += 1;
        let language = doc.language.clone().unwrap_or_else(|| "unknown".to_string());
        *languages.entry(language).or_insert(0) += 1;
    }

    Ok(CollectionSummary {
        collection: collection.clone(),
        document_count: documents.len(),
        status_counts,
        languages,
        last_ingested_at: documents.iter().map(|d| d.ingestion.ingested_at).max(),
    })
}
