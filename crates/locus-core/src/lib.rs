//! Core types, configuration, and error handling for Locus.
//!
//! This crate provides the shared foundation used by all other Locus crates:
//! - [`LocusError`]: unified error type using `thiserror`, with stable codes
//! - [`LocusConfig`]: configuration loaded from `.locus.toml`
//! - [`RepositoryUrl`] and [`CollectionId`]: canonical repository addressing
//! - The persisted data model: [`Collection`], [`Document`], and the query
//!   and ingestion report shapes exchanged with callers

mod config;
mod error;
mod id;
mod types;

pub use config::{
    EmbeddingConfig, GithubConfig, IngestConfig, LlmConfig, LocusConfig, RetrievalConfig,
    StorageConfig, SymbolRouting,
};
pub use error::{AcquisitionFailure, LocusError};
pub use id::{content_hash, document_id, CollectionId, RepositoryUrl, UrlKind};
pub use types::{
    Collection, CollectionSummary, Document, FileFailure, Filters, GitFacts, IngestionFacts,
    IngestionReport, JobFailure, JobProgress, JobState, OutputFormat, ProcessingStatus,
    QueryRequest, QueryResponse, SearchOutcome, SearchResult, StatusCounts, Strategy,
    StrategyRun, StrategyStatus, SummarySource, Symbols, SCHEMA_VERSION,
};

/// A convenience `Result` type for Locus operations.
pub type Result<T> = std::result::Result<T, LocusError>;
