use async_trait::async_trait;
use locus_core::{Collection, CollectionId, Document, Filters, LocusError};

use crate::predicate::Predicate;

/// A document with its similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    /// The matched document.
    pub document: Document,
    /// Raw cosine similarity; higher is closer.
    pub score: f64,
}

/// Persistence for collections and their documents.
///
/// Every collection is isolated: document operations take the owning
/// `collection_id` and never see another collection's data. Operations on
/// a collection that does not exist return
/// [`LocusError::CollectionNotFound`], except `get_collection`, which
/// returns `None`.
///
/// [`LocusError::StoreUnavailable`] marks failures worth retrying.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Create a collection.
    ///
    /// Returns [`LocusError::CollectionExists`] when the id is taken.
    async fn create_collection(&self, collection: &Collection) -> Result<Collection, LocusError>;

    /// Look up a collection.
    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>, LocusError>;

    /// Every collection, ordered by id.
    async fn list_collections(&self) -> Result<Vec<Collection>, LocusError>;

    /// Remove a collection and its documents. Returns whether it existed.
    async fn delete_collection(&self, id: &CollectionId) -> Result<bool, LocusError>;

    /// Insert or replace a document, keyed by `document.id`.
    async fn upsert_document(&self, id: &CollectionId, document: &Document) -> Result<(), LocusError>;

    /// Fetch one document.
    async fn get_document(
        &self,
        id: &CollectionId,
        document_id: &str,
    ) -> Result<Option<Document>, LocusError>;

    /// Every document, ordered by relative path.
    async fn list_documents(&self, id: &CollectionId) -> Result<Vec<Document>, LocusError>;

    /// Remove one document. Returns whether it existed.
    async fn delete_document(&self, id: &CollectionId, document_id: &str) -> Result<bool, LocusError>;

    /// Documents most similar to `text`, best first, after `filters`.
    async fn query_by_text(
        &self,
        id: &CollectionId,
        text: &str,
        filters: &Filters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, LocusError>;

    /// Documents satisfying `predicate`, ordered by relative path.
    async fn query_by_predicate(
        &self,
        id: &CollectionId,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<Document>, LocusError>;

    /// Number of documents in the collection.
    async fn count(&self, id: &CollectionId) -> Result<usize, LocusError>;
}
