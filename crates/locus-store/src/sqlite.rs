//! SQLite implementation of [`CollectionStore`].
//!
//! One database holds every collection. Documents are stored as a JSON
//! record plus indexed columns for the fields queries touch, with the
//! embedding in a BLOB. Cosine similarity is computed in Rust.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use locus_core::{Collection, CollectionId, Document, Filters, LocusError};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::embedding::{bytes_to_floats, cosine_similarity, floats_to_bytes, Embedder};
use crate::predicate::Predicate;
use crate::store::{CollectionStore, ScoredDocument};

const EMBEDDER_KEY: &str = "embedder";

/// SQLite-backed collection store.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use locus_store::{HashingEmbedder, SqliteStore};
///
/// let store = SqliteStore::in_memory(Arc::new(HashingEmbedder::new(64))).unwrap();
/// ```
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
}

impl SqliteStore {
    /// Open or create a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::Database`] if the database cannot be opened, or
    /// if it holds documents embedded by a different embedder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use std::sync::Arc;
    /// use locus_store::{HashingEmbedder, SqliteStore};
    ///
    /// let store = SqliteStore::open(Path::new(".locus/locus.db"), Arc::new(HashingEmbedder::new(384))).unwrap();
    /// ```
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, LocusError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LocusError::Database(format!("failed to create data directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| LocusError::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| LocusError::Database(format!("failed to configure database: {e}")))?;
        Self::from_connection(conn, embedder)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::Database`] if schema creation fails.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, LocusError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LocusError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        Self::from_connection(conn, embedder)
    }

    fn from_connection(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self, LocusError> {
        init_schema(&conn)?;
        check_embedder(&conn, &embedder.id())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, LocusError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, LocusError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| LocusError::Database("store lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| LocusError::StoreUnavailable(format!("store task failed: {e}")))?
    }
}

fn init_schema(conn: &Connection) -> Result<(), LocusError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS collections (
            collection_id TEXT PRIMARY KEY,
            repository_url TEXT NOT NULL,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            schema_version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            collection_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            processing_status TEXT NOT NULL,
            record TEXT NOT NULL,
            embedding BLOB,
            PRIMARY KEY (collection_id, document_id)
        );

        CREATE INDEX IF NOT EXISTS documents_by_path
            ON documents (collection_id, relative_path);
        ",
    )
    .map_err(|e| LocusError::Database(format!("failed to create schema: {e}")))
}

/// Record the embedder on first use; refuse a different one once
/// documents exist, since their vectors would not be comparable.
fn check_embedder(conn: &Connection, current: &str) -> Result<(), LocusError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![EMBEDDER_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;

    if let Some(stored) = &stored {
        if stored == current {
            return Ok(());
        }
        let documents: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(db_err)?;
        if documents > 0 {
            return Err(LocusError::Database(format!(
                "collections were embedded with '{stored}' but the configured embedder is \
                 '{current}'. Delete the collections and re-ingest to switch embedders."
            )));
        }
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![EMBEDDER_KEY, current],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Busy or locked databases are transient; everything else is not.
fn db_err(e: rusqlite::Error) -> LocusError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            LocusError::StoreUnavailable(e.to_string())
        }
        _ => LocusError::Database(e.to_string()),
    }
}

fn collection_exists(conn: &Connection, id: &str) -> Result<bool, LocusError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM collections WHERE collection_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(found.is_some())
}

fn require_collection(conn: &Connection, id: &str) -> Result<(), LocusError> {
    if collection_exists(conn, id)? {
        Ok(())
    } else {
        Err(LocusError::CollectionNotFound(id.to_string()))
    }
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String, u32)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build_collection(
    (id, url, owner, name, created_at, schema_version): (String, String, String, String, String, u32),
) -> Result<Collection, LocusError> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LocusError::Database(format!("corrupt created_at for {id}: {e}")))?;
    Ok(Collection {
        collection_id: CollectionId::parse(&id)
            .map_err(|_| LocusError::Database(format!("corrupt collection id '{id}'")))?,
        repository_url: url,
        owner,
        name,
        created_at,
        schema_version,
    })
}

fn load_documents(
    conn: &Connection,
    id: &str,
    with_embeddings: bool,
) -> Result<Vec<(Document, Option<Vec<f32>>)>, LocusError> {
    let sql = if with_embeddings {
        "SELECT record, embedding FROM documents WHERE collection_id = ?1 ORDER BY relative_path"
    } else {
        "SELECT record, NULL FROM documents WHERE collection_id = ?1 ORDER BY relative_path"
    };
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params![id], |row| {
            let record: String = row.get(0)?;
            let embedding: Option<Vec<u8>> = row.get(1)?;
            Ok((record, embedding))
        })
        .map_err(db_err)?;

    let mut documents = Vec::new();
    for row in rows {
        let (record, embedding) = row.map_err(db_err)?;
        let document: Document = serde_json::from_str(&record)?;
        documents.push((document, embedding.map(|b| bytes_to_floats(&b))));
    }
    Ok(documents)
}

/// Text offered to the embedder for one document.
pub(crate) fn embedding_text(doc: &Document) -> String {
    let mut text = format!("{}\n{}", doc.relative_path, doc.summary);
    if !doc.keywords.is_empty() {
        text.push_str("\nkeywords: ");
        text.push_str(&doc.keywords.join(", "));
    }
    if !doc.symbols.is_empty() {
        text.push_str("\nsymbols: ");
        text.push_str(&doc.symbols.iter().collect::<Vec<_>>().join(", "));
    }
    text
}

#[async_trait]
impl CollectionStore for SqliteStore {
    async fn create_collection(&self, collection: &Collection) -> Result<Collection, LocusError> {
        let collection = collection.clone();
        self.with_conn(move |conn| {
            let id = collection.collection_id.as_str();
            if collection_exists(conn, id)? {
                return Err(LocusError::CollectionExists(id.to_string()));
            }
            conn.execute(
                "INSERT INTO collections
                 (collection_id, repository_url, owner, name, created_at, schema_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    collection.repository_url,
                    collection.owner,
                    collection.name,
                    collection.created_at.to_rfc3339(),
                    collection.schema_version,
                ],
            )
            .map_err(db_err)?;
            tracing::debug!(collection = id, "collection created");
            Ok(collection)
        })
        .await
    }

    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>, LocusError> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT collection_id, repository_url, owner, name, created_at, schema_version
                     FROM collections WHERE collection_id = ?1",
                    params![id],
                    row_to_collection,
                )
                .optional()
                .map_err(db_err)?;
            row.map(build_collection).transpose()
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<Collection>, LocusError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT collection_id, repository_url, owner, name, created_at, schema_version
                     FROM collections ORDER BY collection_id",
                )
                .map_err(db_err)?;
            let rows = stmt.query_map([], row_to_collection).map_err(db_err)?;
            let mut collections = Vec::new();
            for row in rows {
                collections.push(build_collection(row.map_err(db_err)?)?);
            }
            Ok(collections)
        })
        .await
    }

    async fn delete_collection(&self, id: &CollectionId) -> Result<bool, LocusError> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute("DELETE FROM documents WHERE collection_id = ?1", params![id])
                .map_err(db_err)?;
            let removed = tx
                .execute("DELETE FROM collections WHERE collection_id = ?1", params![id])
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn upsert_document(&self, id: &CollectionId, document: &Document) -> Result<(), LocusError> {
        let embedding = match self.embedder.embed_documents(&[embedding_text(document)]).await {
            Ok(mut vectors) => vectors.pop(),
            Err(e) => {
                tracing::warn!(
                    path = %document.relative_path,
                    error = %e,
                    "embedding failed; storing without a vector"
                );
                None
            }
        };

        let id = id.as_str().to_string();
        let document = document.clone();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            let record = serde_json::to_string(&document)?;
            conn.execute(
                "INSERT OR REPLACE INTO documents
                 (collection_id, document_id, relative_path, content_hash, processing_status, record, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    document.id,
                    document.relative_path,
                    document.content_hash,
                    document.status().as_str(),
                    record,
                    embedding.as_deref().map(floats_to_bytes),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_document(
        &self,
        id: &CollectionId,
        document_id: &str,
    ) -> Result<Option<Document>, LocusError> {
        let id = id.as_str().to_string();
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM documents WHERE collection_id = ?1 AND document_id = ?2",
                    params![id, document_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            match record {
                Some(r) => Ok(Some(serde_json::from_str(&r)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_documents(&self, id: &CollectionId) -> Result<Vec<Document>, LocusError> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            Ok(load_documents(conn, &id, false)?
                .into_iter()
                .map(|(doc, _)| doc)
                .collect())
        })
        .await
    }

    async fn delete_document(&self, id: &CollectionId, document_id: &str) -> Result<bool, LocusError> {
        let id = id.as_str().to_string();
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            let removed = conn
                .execute(
                    "DELETE FROM documents WHERE collection_id = ?1 AND document_id = ?2",
                    params![id, document_id],
                )
                .map_err(db_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn query_by_text(
        &self,
        id: &CollectionId,
        text: &str,
        filters: &Filters,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, LocusError> {
        let query = self.embedder.embed_query(text).await?;
        let id = id.as_str().to_string();
        let filters = filters.clone();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            let mut scored: Vec<ScoredDocument> = load_documents(conn, &id, true)?
                .into_iter()
                .filter(|(doc, _)| filters.matches(doc))
                .filter_map(|(document, embedding)| {
                    let embedding = embedding?;
                    Some(ScoredDocument {
                        score: cosine_similarity(&query, &embedding),
                        document,
                    })
                })
                .collect();
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.document.relative_path.cmp(&b.document.relative_path))
            });
            scored.truncate(limit);
            Ok(scored)
        })
        .await
    }

    async fn query_by_predicate(
        &self,
        id: &CollectionId,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<Document>, LocusError> {
        let id = id.as_str().to_string();
        let predicate = predicate.clone();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            Ok(load_documents(conn, &id, false)?
                .into_iter()
                .map(|(doc, _)| doc)
                .filter(|doc| predicate.matches(doc))
                .take(limit)
                .collect())
        })
        .await
    }

    async fn count(&self, id: &CollectionId) -> Result<usize, LocusError> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            require_collection(conn, &id)?;
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(n as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use locus_core::{ProcessingStatus, RepositoryUrl};

    fn store() -> SqliteStore {
        SqliteStore::in_memory(Arc::new(HashingEmbedder::new(128))).unwrap()
    }

    fn widgets() -> Collection {
        Collection::new(&RepositoryUrl::parse("https://github.com/acme/widgets").unwrap())
    }

    fn doc(path: &str, summary: &str) -> Document {
        let mut d = Document::new(path, &format!("hash-{path}"));
        d.summary = summary.into();
        d.ingestion.processing_status = ProcessingStatus::Completed;
        d
    }

    #[test]
    fn embedding_text_includes_symbols_and_keywords() {
        let mut d = doc("src/auth.rs", "Login flow.");
        d.keywords = vec!["auth".into()];
        d.symbols.functions.push("login".into());
        assert_eq!(
            embedding_text(&d),
            "src/auth.rs\nLogin flow.\nkeywords: auth\nsymbols: login"
        );
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let store = store();
        let c = widgets();
        let created = store.create_collection(&c).await.unwrap();
        assert_eq!(created.collection_id.as_str(), "repo-6e07f075");

        let err = store.create_collection(&c).await.unwrap_err();
        assert!(matches!(err, LocusError::CollectionExists(_)));

        let fetched = store.get_collection(&c.collection_id).await.unwrap().unwrap();
        assert_eq!(fetched.repository_url, c.repository_url);
        assert_eq!(fetched.created_at.timestamp(), c.created_at.timestamp());
        assert_eq!(store.list_collections().await.unwrap().len(), 1);

        assert!(store.delete_collection(&c.collection_id).await.unwrap());
        assert!(!store.delete_collection(&c.collection_id).await.unwrap());
        assert!(store.get_collection(&c.collection_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn documents_require_a_collection() {
        let store = store();
        let id = widgets().collection_id;
        let err = store.upsert_document(&id, &doc("a.rs", "x")).await.unwrap_err();
        assert!(matches!(err, LocusError::CollectionNotFound(_)));
        assert!(matches!(
            store.count(&id).await,
            Err(LocusError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn upsert_replaces_by_document_id() {
        let store = store();
        let c = store.create_collection(&widgets()).await.unwrap();
        let id = &c.collection_id;

        store.upsert_document(id, &doc("src/a.rs", "first")).await.unwrap();
        store.upsert_document(id, &doc("src/a.rs", "second")).await.unwrap();
        store.upsert_document(id, &doc("src/b.rs", "other")).await.unwrap();
        assert_eq!(store.count(id).await.unwrap(), 2);

        let a = store
            .get_document(id, &locus_core::document_id("src/a.rs"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.summary, "second");

        let paths: Vec<String> = store
            .list_documents(id)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.relative_path)
            .collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs"]);

        assert!(store.delete_document(id, &a.id).await.unwrap());
        assert!(!store.delete_document(id, &a.id).await.unwrap());
        assert_eq!(store.count(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = store();
        let a = store.create_collection(&widgets()).await.unwrap();
        let other = Collection::new(&RepositoryUrl::parse("https://github.com/acme/gadgets").unwrap());
        let b = store.create_collection(&other).await.unwrap();

        store.upsert_document(&a.collection_id, &doc("shared.rs", "in a")).await.unwrap();
        assert_eq!(store.count(&b.collection_id).await.unwrap(), 0);
        assert!(store
            .query_by_text(&b.collection_id, "in a", &Filters::default(), 10)
            .await
            .unwrap()
            .is_empty());

        store.delete_collection(&a.collection_id).await.unwrap();
        store.create_collection(&widgets()).await.unwrap();
        assert_eq!(store.count(&a.collection_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn text_query_ranks_by_similarity_and_filters() {
        let store = store();
        let c = store.create_collection(&widgets()).await.unwrap();
        let id = &c.collection_id;
        let mut auth = doc("src/auth.rs", "Handles user authentication and login sessions.");
        auth.language = Some("rust".into());
        let mut chart = doc("web/chart.ts", "Renders bar charts with configurable axes.");
        chart.language = Some("typescript".into());
        store.upsert_document(id, &auth).await.unwrap();
        store.upsert_document(id, &chart).await.unwrap();

        let hits = store
            .query_by_text(id, "authentication", &Filters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.relative_path, "src/auth.rs");
        assert!(hits[0].score > hits[1].score);

        let filters = Filters {
            language: Some("typescript".into()),
            ..Filters::default()
        };
        let hits = store.query_by_text(id, "authentication", &filters, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.relative_path, "web/chart.ts");

        let hits = store
            .query_by_text(id, "authentication", &Filters::default(), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn predicate_query_orders_by_path() {
        let store = store();
        let c = store.create_collection(&widgets()).await.unwrap();
        let id = &c.collection_id;
        for path in ["src/z.rs", "src/a.rs", "docs/readme.md"] {
            store.upsert_document(id, &doc(path, "text")).await.unwrap();
        }
        let docs = store
            .query_by_predicate(id, &Predicate::PathPrefix("src/".into()), 10)
            .await
            .unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.rs", "src/z.rs"]);
    }

    #[tokio::test]
    async fn reopening_with_another_embedder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locus.db");
        {
            let store = SqliteStore::open(&path, Arc::new(HashingEmbedder::new(64))).unwrap();
            let c = store.create_collection(&widgets()).await.unwrap();
            store.upsert_document(&c.collection_id, &doc("a.rs", "x")).await.unwrap();
        }
        assert!(SqliteStore::open(&path, Arc::new(HashingEmbedder::new(64))).is_ok());
        let err = SqliteStore::open(&path, Arc::new(HashingEmbedder::new(128))).err().unwrap();
        assert!(err.to_string().contains("local-64"));
    }
}
