//! File discovery, content classification, and static metadata extraction.
//!
//! Scan is the per-file front half of ingestion:
//! - [`walker`]: lists candidate files, respecting `.gitignore`
//! - [`classify`]: decides whether a file is text/source worth indexing
//! - [`symbols`]: tree-sitter extraction of function, class and variable names
//! - [`metadata`]: size, lines, hash, imports, exports and complexity
//!
//! Every function here is synchronous and deterministic; the ingestion
//! pipeline runs them on a blocking worker pool.

pub mod classify;
pub mod language;
pub mod metadata;
pub mod symbols;
pub mod walker;

pub use classify::{Classification, Classifier, SkipReason};
pub use language::Language;
pub use metadata::{extract, StaticMetadata};
pub use walker::{discover, DiscoveredFile};
