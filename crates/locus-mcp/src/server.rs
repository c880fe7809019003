//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which serves one client over stdio until it
//! disconnects.

use std::sync::Arc;

use locus_core::LocusError;
use locus_engine::Engine;
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};
use tracing::info;

use crate::tools::LocusServer;

const SERVER_INSTRUCTIONS: &str = "\
Locus answers \"where in this repository is X?\" from an index of per-file summaries, symbols and git history.\n\
- ingest_repository: Index a GitHub URL or local path (re-ingesting only touches changed files), then make it active\n\
- activate_repository: Switch this session to an already ingested repository\n\
- search_repository: Find files in the active repository by topic, identifier or description\n\
- repository_info: Document counts, languages and freshness of the active repository";

#[tool_handler]
impl ServerHandler for LocusServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "locus".to_string(),
                title: Some("Locus Repository Knowledge".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Ingest repositories and locate code by meaning, symbol or keyword".to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `locus mcp` CLI subcommand. It blocks until the
/// client closes stdin; an ingestion still running at that point is
/// cancelled.
///
/// # Errors
///
/// Returns [`LocusError::Config`] if the server fails to initialize or
/// encounters a transport error.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use locus_core::LocusConfig;
/// use locus_engine::Engine;
///
/// # async fn example() -> Result<(), locus_core::LocusError> {
/// let engine = Arc::new(Engine::from_config(LocusConfig::default())?);
/// locus_mcp::server::run_server(engine).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server(engine: Arc<Engine>) -> Result<(), LocusError> {
    let server = LocusServer::new(engine);
    let shutdown = server.shutdown_token();
    let service = server
        .serve(stdio())
        .await
        .map_err(|e| LocusError::Config(format!("MCP server failed to start: {e}")))?;
    info!("MCP server ready on stdio");

    let result = service.waiting().await;
    shutdown.cancel();
    result.map_err(|e| LocusError::Config(format!("MCP server error: {e}")))?;

    Ok(())
}
