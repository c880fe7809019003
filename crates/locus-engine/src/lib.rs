//! The repository knowledge engine.
//!
//! - [`IngestionPipeline`]: acquisition → classification → extraction →
//!   summarization → storage, with bounded pools and per-file failure
//!   containment
//! - [`RetrievalOrchestrator`]: routes a query across keyword, symbol and
//!   semantic search and merges the results
//! - [`Session`]: the active collection of one client
//! - [`Engine`]: wires all of the above from a [`LocusConfig`](locus_core::LocusConfig)

pub mod engine;
pub mod locks;
pub mod orchestrator;
pub mod pipeline;
pub mod session;

pub use engine::{gateway_from_config, Engine};
pub use locks::CollectionLocks;
pub use orchestrator::{Hit, RetrievalOrchestrator};
pub use pipeline::{IngestOptions, IngestionPipeline};
pub use session::{summarize_collection, Session};
