use std::path::Path;
use std::sync::Arc;

use locus_core::{LlmConfig, LocusConfig};
use locus_engine::Engine;
use locus_mcp::tools::{
    ActivateRepositoryParams, IngestRepositoryParams, LocusServer, SearchRepositoryParams,
};
use locus_store::{HashingEmbedder, SqliteStore};
use locus_summarize::SummarizerGateway;
use rmcp::{handler::server::wrapper::Parameters, model::*, ServerHandler};

fn engine(data_dir: &Path) -> Arc<Engine> {
    let mut config = LocusConfig::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.llm = LlmConfig {
        provider: "none".into(),
        ..LlmConfig::default()
    };
    let store = SqliteStore::in_memory(Arc::new(HashingEmbedder::new(128))).unwrap();
    let gateway = SummarizerGateway::heuristic_only(&config.llm);
    Arc::new(Engine::new(config, Arc::new(store), gateway))
}

fn fixture_repo(root: &Path) {
    let write = |relative: &str, content: &str| {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    };
    write("src/auth.rs", "/// User authentication.\npub fn login() {}\n");
    write("src/billing.rs", "/// Invoice generation.\npub fn send_invoice() {}\n");
    write("README.md", "# Fixture\n");
}

fn body(result: &CallToolResult) -> serde_json::Value {
    match &result.content[0].raw {
        RawContent::Text(t) => serde_json::from_str(&t.text).unwrap(),
        _ => panic!("expected text content"),
    }
}

fn search(query: &str, strategy: Option<&str>) -> Parameters<SearchRepositoryParams> {
    Parameters(SearchRepositoryParams {
        query: query.to_string(),
        strategy: strategy.map(str::to_string),
        limit: None,
        language: None,
        path_prefix: None,
    })
}

#[test]
fn server_info_is_correct() {
    let data = tempfile::tempdir().unwrap();
    let server = LocusServer::new(engine(data.path()));
    let info = server.get_info();

    assert_eq!(info.server_info.name, "locus");
    assert_eq!(info.server_info.version, env!("CARGO_PKG_VERSION"));
    let instructions = info.instructions.unwrap();
    for tool in [
        "ingest_repository",
        "activate_repository",
        "search_repository",
        "repository_info",
    ] {
        assert!(instructions.contains(tool), "{tool} missing from instructions");
    }
}

#[tokio::test]
async fn ingest_activates_and_search_finds_symbols() {
    let data = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    fixture_repo(repo.path());
    let server = LocusServer::new(engine(data.path()));

    let result = server
        .ingest_repository(Parameters(IngestRepositoryParams {
            url: repo.path().display().to_string(),
            token: None,
        }))
        .await
        .unwrap();
    assert_ne!(result.is_error, Some(true));
    let ingest = body(&result);
    assert_eq!(ingest["active"], true);
    assert_eq!(ingest["report"]["status"], "completed");
    assert_eq!(ingest["report"]["counts"]["indexed"], 3);

    let result = server
        .search_repository(search("login", Some("symbol")))
        .await
        .unwrap();
    let response = body(&result);
    assert_eq!(response["outcome"], "found");
    assert_eq!(response["results"][0]["relative_path"], "src/auth.rs");
    assert_eq!(response["results"][0]["matched_by"], "symbol");

    let info = body(&server.repository_info().await.unwrap());
    assert_eq!(info["document_count"], 3);
    assert_eq!(info["languages"]["rust"], 2);
}

#[tokio::test]
async fn sessions_are_per_connection() {
    let data = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    fixture_repo(repo.path());
    let engine = engine(data.path());
    let first = LocusServer::new(engine.clone());
    let second = LocusServer::new(engine);

    first
        .ingest_repository(Parameters(IngestRepositoryParams {
            url: repo.path().display().to_string(),
            token: None,
        }))
        .await
        .unwrap();

    let result = second.repository_info().await.unwrap();
    assert_eq!(result.is_error, Some(true));
    assert_eq!(body(&result)["error"]["code"], "REPO_NOT_INDEXED");

    let result = second
        .activate_repository(Parameters(ActivateRepositoryParams {
            url: repo.path().display().to_string(),
        }))
        .await
        .unwrap();
    assert_ne!(result.is_error, Some(true));
    assert_eq!(body(&result)["document_count"], 3);
}

#[tokio::test]
async fn activating_an_unknown_repository_is_reported() {
    let data = tempfile::tempdir().unwrap();
    let server = LocusServer::new(engine(data.path()));

    let result = server
        .activate_repository(Parameters(ActivateRepositoryParams {
            url: "https://github.com/acme/never-ingested".into(),
        }))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert_eq!(body(&result)["error"]["code"], "REPO_NOT_INDEXED");
}

#[tokio::test]
async fn search_without_an_active_repository_is_reported() {
    let data = tempfile::tempdir().unwrap();
    let server = LocusServer::new(engine(data.path()));

    let result = server.search_repository(search("login", None)).await.unwrap();
    assert_eq!(result.is_error, Some(true));
    assert_eq!(body(&result)["error"]["code"], "REPO_NOT_INDEXED");
}

#[tokio::test]
async fn invalid_inputs_carry_error_codes() {
    let data = tempfile::tempdir().unwrap();
    let server = LocusServer::new(engine(data.path()));

    let result = server
        .ingest_repository(Parameters(IngestRepositoryParams {
            url: "   ".into(),
            token: None,
        }))
        .await
        .unwrap();
    assert_eq!(body(&result)["error"]["code"], "INVALID_URL");

    let result = server
        .search_repository(search("login", Some("fuzzy")))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert_eq!(body(&result)["error"]["code"], "QUERY_PROCESSING_FAILED");
}

#[tokio::test]
async fn failed_ingestion_returns_the_report_as_an_error() {
    let data = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    fixture_repo(repo.path());
    let server = LocusServer::new(engine(data.path()));
    server.shutdown_token().cancel();

    let result = server
        .ingest_repository(Parameters(IngestRepositoryParams {
            url: repo.path().display().to_string(),
            token: None,
        }))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    let ingest = body(&result);
    assert_eq!(ingest["active"], false);
    assert_eq!(ingest["report"]["status"], "failed");
    assert_eq!(ingest["report"]["failure"]["code"], "CANCELLED");
}
