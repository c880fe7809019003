//! Tool implementations for the Locus MCP server.
//!
//! Four tools are exposed: `ingest_repository`, `activate_repository`,
//! `search_repository` and `repository_info`. Successful calls return the
//! engine's JSON records; failures return an error result whose JSON body
//! carries the stable error code.

use std::sync::Arc;

use locus_core::{Filters, LocusError, RepositoryUrl, Strategy};
use locus_engine::{Engine, IngestOptions, Session};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// MCP server over a shared [`Engine`], with one [`Session`] per
/// connection.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use locus_core::{LocusConfig, LlmConfig};
/// use locus_engine::{gateway_from_config, Engine};
/// use locus_mcp::tools::LocusServer;
/// use locus_store::{HashingEmbedder, SqliteStore};
///
/// let config = LocusConfig::default();
/// let store = SqliteStore::in_memory(Arc::new(HashingEmbedder::new(64))).unwrap();
/// let gateway = gateway_from_config(&LlmConfig { provider: "none".into(), ..LlmConfig::default() }).unwrap();
/// let server = LocusServer::new(Arc::new(Engine::new(config, Arc::new(store), gateway)));
/// ```
#[derive(Clone)]
pub struct LocusServer {
    pub(crate) engine: Arc<Engine>,
    pub(crate) session: Arc<Session>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tool_router: ToolRouter<Self>,
}

// --- Parameter structs ---

/// Parameters for the `ingest_repository` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IngestRepositoryParams {
    /// Repository URL (`https://github.com/owner/name`, `git@host:owner/name`) or local path.
    pub url: String,
    /// Access token for private repositories.
    pub token: Option<String>,
}

/// Parameters for the `activate_repository` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ActivateRepositoryParams {
    /// URL or path of a previously ingested repository.
    pub url: String,
}

/// Parameters for the `search_repository` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRepositoryParams {
    /// What to look for: a topic, an identifier or a description.
    pub query: String,
    /// "keyword", "symbol", "semantic" or "hybrid" (default).
    pub strategy: Option<String>,
    /// Maximum results (default 10, capped at 20).
    pub limit: Option<usize>,
    /// Only files in this language, e.g. "rust".
    pub language: Option<String>,
    /// Only files under this directory, e.g. "src/auth/".
    pub path_prefix: Option<String>,
}

// --- Response structs ---

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

#[derive(Serialize)]
struct IngestResponse<'a> {
    report: &'a locus_core::IngestionReport,
    active: bool,
}

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| mcp_err(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn error_result(code: &str, message: impl Into<String>) -> Result<CallToolResult, McpError> {
    let body = ErrorBody {
        error: ErrorDetail {
            code,
            message: message.into(),
        },
    };
    let json = serde_json::to_string_pretty(&body).map_err(|e| mcp_err(e.to_string()))?;
    Ok(CallToolResult::error(vec![Content::text(json)]))
}

fn locus_error(err: &LocusError) -> Result<CallToolResult, McpError> {
    error_result(err.code(), err.to_string())
}

#[tool_router]
impl LocusServer {
    /// Create a server with a fresh session over `engine`.
    pub fn new(engine: Arc<Engine>) -> Self {
        let session = Arc::new(engine.session());
        Self {
            engine,
            session,
            shutdown: CancellationToken::new(),
            tool_router: Self::tool_router(),
        }
    }

    /// Token that, once cancelled, stops any ingestion this server started.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[tool(
        name = "ingest_repository",
        description = "Ingest a repository so it can be searched: clones (or reads) it, summarizes every text file and records symbols and git history. Re-ingesting only reprocesses changed files. On success the repository becomes this session's active repository. Returns the job report with indexed/unchanged/skipped/failed counts."
    )]
    pub async fn ingest_repository(
        &self,
        Parameters(params): Parameters<IngestRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let url = match RepositoryUrl::parse(&params.url) {
            Ok(url) => url,
            Err(e) => return locus_error(&e),
        };

        let mut options = IngestOptions::default().with_cancel(self.shutdown.child_token());
        if let Some(token) = params.token.filter(|t| !t.is_empty()) {
            options = options.with_token(token);
        }
        let report = self.engine.ingest(&url, options).await;

        if !report.is_completed() {
            let json = serde_json::to_string_pretty(&IngestResponse {
                report: &report,
                active: false,
            })
            .map_err(|e| mcp_err(e.to_string()))?;
            return Ok(CallToolResult::error(vec![Content::text(json)]));
        }

        let active = match self.session.activate(&url).await {
            Ok(collection) => collection.is_some(),
            Err(e) => return locus_error(&e),
        };
        info!(collection = %report.collection_id, "repository ingested over MCP");
        json_result(&IngestResponse {
            report: &report,
            active,
        })
    }

    #[tool(
        name = "activate_repository",
        description = "Make a previously ingested repository the active one for this session and describe it. Does not ingest; fails with REPO_NOT_INDEXED if the repository is unknown."
    )]
    pub async fn activate_repository(
        &self,
        Parameters(params): Parameters<ActivateRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let url = match RepositoryUrl::parse(&params.url) {
            Ok(url) => url,
            Err(e) => return locus_error(&e),
        };
        match self.session.activate(&url).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return error_result(
                    "REPO_NOT_INDEXED",
                    format!("{} has not been ingested; call ingest_repository first", url.canonical()),
                )
            }
            Err(e) => return locus_error(&e),
        }
        match self.session.info().await {
            Ok(Some(summary)) => json_result(&summary),
            Ok(None) => error_result("REPO_NOT_INDEXED", "repository was deleted while activating"),
            Err(e) => locus_error(&e),
        }
    }

    #[tool(
        name = "search_repository",
        description = "Search the active repository. Combines keyword matching over summaries and paths, symbol matching over function/class names, and semantic similarity. Each result names the file, its summary, its score and which strategy found it. The outcome distinguishes found, nothing_found, degraded and not_ingested."
    )]
    pub async fn search_repository(
        &self,
        Parameters(params): Parameters<SearchRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let strategy = match params.strategy.as_deref().map(str::parse::<Strategy>) {
            None => None,
            Some(Ok(strategy)) => Some(strategy),
            Some(Err(message)) => return error_result("QUERY_PROCESSING_FAILED", message),
        };
        let filters = Filters {
            language: params.language,
            path_prefix: params.path_prefix,
            ..Filters::default()
        };

        match self
            .session
            .search(&params.query, strategy, filters, params.limit)
            .await
        {
            Ok(response) => json_result(&response),
            Err(e) => locus_error(&e),
        }
    }

    #[tool(
        name = "repository_info",
        description = "Describe the active repository: URL, collection id, document counts by status and language, and when it was last ingested."
    )]
    pub async fn repository_info(&self) -> Result<CallToolResult, McpError> {
        match self.session.info().await {
            Ok(Some(summary)) => json_result(&summary),
            Ok(None) => error_result(
                "REPO_NOT_INDEXED",
                "no active repository; call activate_repository or ingest_repository first",
            ),
            Err(e) => locus_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(result: &CallToolResult) -> serde_json::Value {
        match &result.content[0].raw {
            RawContent::Text(t) => serde_json::from_str(&t.text).unwrap(),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn error_results_carry_the_code() {
        let result = error_result("REPO_NOT_INDEXED", "nothing active").unwrap();
        assert_eq!(result.is_error, Some(true));
        let body = text(&result);
        assert_eq!(body["error"]["code"], "REPO_NOT_INDEXED");
        assert_eq!(body["error"]["message"], "nothing active");
    }

    #[test]
    fn locus_errors_map_to_stable_codes() {
        let result = locus_error(&LocusError::InvalidUrl("ftp://nowhere".into())).unwrap();
        assert_eq!(text(&result)["error"]["code"], "INVALID_URL");
    }
}
