//! MCP server exposing a Locus engine to IDEs and agents.
//!
//! Serves `ingest_repository`, `activate_repository`, `search_repository`
//! and `repository_info` over stdio. Each connection owns one
//! [`Session`](locus_engine::Session), so the active repository of one
//! client never leaks into another.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use locus_core::LocusConfig;
//! use locus_engine::Engine;
//!
//! # async fn example() -> Result<(), locus_core::LocusError> {
//! let engine = Arc::new(Engine::from_config(LocusConfig::default())?);
//! locus_mcp::server::run_server(engine).await?;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod tools;
