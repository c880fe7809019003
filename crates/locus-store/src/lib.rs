//! Collection persistence and similarity search.
//!
//! [`CollectionStore`] is the storage boundary the rest of Locus talks to.
//! [`SqliteStore`] implements it with one SQLite database holding every
//! collection, and delegates similarity scoring to an injected
//! [`Embedder`].

pub mod embedding;
pub mod predicate;
pub mod sqlite;
pub mod store;

pub use embedding::{embedder_from_config, Embedder, HashingEmbedder, RemoteEmbedder};
pub use predicate::{Predicate, SymbolKind};
pub use sqlite::SqliteStore;
pub use store::{CollectionStore, ScoredDocument};
