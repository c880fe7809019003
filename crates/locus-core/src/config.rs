use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LocusError;

/// Top-level configuration loaded from `.locus.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// Every field has a default, so an empty file is a valid configuration.
///
/// # Examples
///
/// ```
/// use locus_core::LocusConfig;
///
/// let config = LocusConfig::default();
/// assert_eq!(config.retrieval.default_limit, 10);
/// assert_eq!(config.llm.max_concurrent, 4);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocusConfig {
    /// Summarization model settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding provider settings for semantic search.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Ingestion pipeline limits.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Query routing and ranking.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Where collections and clones live.
    #[serde(default)]
    pub storage: StorageConfig,
    /// GitHub access for private repositories and preflight checks.
    #[serde(default)]
    pub github: GithubConfig,
}

impl LocusConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::Io`] if the file cannot be read, or
    /// [`LocusError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use locus_core::LocusConfig;
    /// use std::path::Path;
    ///
    /// let config = LocusConfig::from_file(Path::new(".locus.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, LocusError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use locus_core::LocusConfig;
    ///
    /// let toml = r#"
    /// [retrieval]
    /// default_limit = 15
    /// "#;
    /// let config = LocusConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.retrieval.default_limit, 15);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, LocusError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Fill unset secrets and paths from the environment.
    ///
    /// Values already present in the file win. Recognised variables:
    /// `LOCUS_LLM_API_KEY`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
    /// `VOYAGE_API_KEY`, `GITHUB_TOKEN` and `LOCUS_DATA_DIR`.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.is_none() {
            let provider_var = match self.llm.provider.as_str() {
                "anthropic" => Some("ANTHROPIC_API_KEY"),
                "openai" => Some("OPENAI_API_KEY"),
                _ => None,
            };
            self.llm.api_key = lookup("LOCUS_LLM_API_KEY")
                .or_else(|| provider_var.and_then(|var| lookup(var)));
        }
        if self.embedding.api_key.is_none() {
            let var = match self.embedding.provider.as_str() {
                "voyage" => Some("VOYAGE_API_KEY"),
                "openai" => Some("OPENAI_API_KEY"),
                _ => None,
            };
            self.embedding.api_key = var.and_then(|v| lookup(v));
        }
        if self.github.token.is_none() {
            self.github.token = lookup("GITHUB_TOKEN");
        }
        if let Some(dir) = lookup("LOCUS_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Concurrent model calls allowed by `[llm] max_concurrent`.
    pub fn summarization_pool_size(&self) -> usize {
        self.llm.max_concurrent.max(1)
    }

    /// Extraction pool size, kept strictly larger than the summarization
    /// pool so parsers never wait behind model calls.
    ///
    /// # Examples
    ///
    /// ```
    /// use locus_core::LocusConfig;
    ///
    /// let mut config = LocusConfig::default();
    /// config.ingest.extraction_workers = 1;
    /// config.llm.max_concurrent = 4;
    /// assert_eq!(config.extraction_pool_size(), 5);
    /// ```
    pub fn extraction_pool_size(&self) -> usize {
        self.ingest
            .extraction_pool_size()
            .max(self.summarization_pool_size() + 1)
    }
}

/// Summarization model configuration.
///
/// # Examples
///
/// ```
/// use locus_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o-mini");
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (`"openai"`, `"anthropic"`, `"ollama"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Per-call timeout in seconds (default: 30).
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum summarization calls in flight (default: 4).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Attempts per file before falling back (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds, doubled per attempt (default: 500).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Characters of file content sent per request (default: 12000).
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_input_chars() -> usize {
    12_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            timeout_secs: default_llm_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// Configuration for the embedding capability behind semantic search.
///
/// The `local` provider is a deterministic feature-hashing embedder that
/// needs no network access.
///
/// # Examples
///
/// ```
/// use locus_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "local");
/// assert_eq!(config.dimensions, 384);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: `"local"`, `"voyage"`, or `"openai"` (default: `"local"`).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the embedding provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Model name (default: `"voyage-code-3"`, ignored by `local`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding dimensions (default: 384).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "local".into()
}

fn default_embedding_model() -> String {
    "voyage-code-3".into()
}

fn default_embedding_dimensions() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

/// Ingestion limits.
///
/// # Examples
///
/// ```
/// use locus_core::IngestConfig;
///
/// let config = IngestConfig::default();
/// assert_eq!(config.max_file_bytes, 1024 * 1024);
/// assert_eq!(config.extraction_workers, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Files larger than this are skipped (default: 1 MiB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Bytes inspected by the binary check (default: 8192).
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: usize,
    /// Share of non-text bytes above which a file is binary (default: 0.30).
    #[serde(default = "default_max_non_text_ratio")]
    pub max_non_text_ratio: f64,
    /// Extraction workers; 0 means one per available core.
    #[serde(default)]
    pub extraction_workers: usize,
    /// Additional extensions to skip, without the leading dot.
    #[serde(default)]
    pub skip_extensions: Vec<String>,
    /// Clone timeout in seconds (default: 300).
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    /// Largest repository accepted, in megabytes (default: 500).
    #[serde(default = "default_max_repo_size_mb")]
    pub max_repo_size_mb: u64,
    /// Attempts for a transient store failure (default: 3).
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_sample_bytes() -> usize {
    8192
}

fn default_max_non_text_ratio() -> f64 {
    0.30
}

fn default_clone_timeout_secs() -> u64 {
    300
}

fn default_max_repo_size_mb() -> u64 {
    500
}

fn default_store_retry_attempts() -> u32 {
    3
}

impl IngestConfig {
    /// Extraction pool size with `0` resolved to the core count.
    pub fn extraction_pool_size(&self) -> usize {
        if self.extraction_workers > 0 {
            return self.extraction_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            sample_bytes: default_sample_bytes(),
            max_non_text_ratio: default_max_non_text_ratio(),
            extraction_workers: 0,
            skip_extensions: Vec::new(),
            clone_timeout_secs: default_clone_timeout_secs(),
            max_repo_size_mb: default_max_repo_size_mb(),
            store_retry_attempts: default_store_retry_attempts(),
        }
    }
}

/// When the symbol strategy joins a hybrid query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolRouting {
    /// Only for identifier-like queries.
    #[default]
    Auto,
    /// For every query.
    Always,
    /// Never as part of hybrid routing.
    Never,
}

/// Query routing and ranking configuration.
///
/// # Examples
///
/// ```
/// use locus_core::{RetrievalConfig, SymbolRouting};
///
/// let config = RetrievalConfig::default();
/// assert_eq!(config.max_limit, 20);
/// assert_eq!(config.symbol_routing, SymbolRouting::Auto);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned when the caller gives no limit (default: 10).
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Upper bound on any caller limit (default: 20).
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Deadline for the strategies of one query, in milliseconds (default: 5000).
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Symbol strategy routing mode.
    #[serde(default)]
    pub symbol_routing: SymbolRouting,
    /// Identifier-like queries longer than this are treated as prose (default: 80).
    #[serde(default = "default_identifier_max_len")]
    pub identifier_max_len: usize,
    /// Semantic hits below this score are dropped (default: 0.05).
    #[serde(default = "default_min_semantic_score")]
    pub min_semantic_score: f64,
    /// Score for an exact symbol name match (default: 1.0).
    #[serde(default = "default_symbol_exact_score")]
    pub symbol_exact_score: f64,
    /// Score for a symbol name prefix match (default: 0.8).
    #[serde(default = "default_symbol_prefix_score")]
    pub symbol_prefix_score: f64,
    /// Score for a symbol name substring match (default: 0.6).
    #[serde(default = "default_symbol_substring_score")]
    pub symbol_substring_score: f64,
}

fn default_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    20
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_identifier_max_len() -> usize {
    80
}

fn default_min_semantic_score() -> f64 {
    0.05
}

fn default_symbol_exact_score() -> f64 {
    1.0
}

fn default_symbol_prefix_score() -> f64 {
    0.8
}

fn default_symbol_substring_score() -> f64 {
    0.6
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            query_timeout_ms: default_query_timeout_ms(),
            symbol_routing: SymbolRouting::default(),
            identifier_max_len: default_identifier_max_len(),
            min_semantic_score: default_min_semantic_score(),
            symbol_exact_score: default_symbol_exact_score(),
            symbol_prefix_score: default_symbol_prefix_score(),
            symbol_substring_score: default_symbol_substring_score(),
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for the database and clones (default: `.locus`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".locus")
}

impl StorageConfig {
    /// Path of the collection database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("locus.db")
    }

    /// Directory holding cloned repositories.
    pub fn clones_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// GitHub access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Token for private repositories.
    pub token: Option<String>,
    /// REST API root (default: `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Ask the API about visibility and size before cloning (default: true).
    #[serde(default = "default_preflight")]
    pub preflight: bool,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}

fn default_preflight() -> bool {
    true
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_github_api_url(),
            preflight: default_preflight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = LocusConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.llm.initial_backoff_ms, 500);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.ingest.sample_bytes, 8192);
        assert_eq!(config.ingest.max_non_text_ratio, 0.30);
        assert_eq!(config.retrieval.default_limit, 10);
        assert_eq!(config.retrieval.symbol_prefix_score, 0.8);
        assert_eq!(config.storage.database_path(), PathBuf::from(".locus/locus.db"));
        assert!(config.github.preflight);
    }

    #[test]
    fn empty_toml_is_valid() {
        let config = LocusConfig::from_toml("").unwrap();
        assert_eq!(config.retrieval.max_limit, 20);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[llm]
provider = "anthropic"
model = "claude-3-5-haiku-latest"
max_concurrent = 2

[embedding]
provider = "voyage"
dimensions = 1024

[ingest]
max_file_bytes = 2048
skip_extensions = ["sql"]

[retrieval]
symbol_routing = "always"
query_timeout_ms = 250

[storage]
data_dir = "/var/lib/locus"

[github]
preflight = false
"#;
        let config = LocusConfig::from_toml(toml).unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.max_concurrent, 2);
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(config.ingest.max_file_bytes, 2048);
        assert_eq!(config.ingest.skip_extensions, vec!["sql".to_string()]);
        assert_eq!(config.retrieval.symbol_routing, SymbolRouting::Always);
        assert_eq!(config.retrieval.query_timeout_ms, 250);
        assert_eq!(config.storage.clones_dir(), PathBuf::from("/var/lib/locus/repos"));
        assert!(!config.github.preflight);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = LocusConfig::from_toml("[retrieval]\ndefault_limit = \"ten\"");
        assert!(matches!(result, Err(LocusError::Toml(_))));
    }

    #[test]
    fn env_fills_missing_secrets_only() {
        let mut config = LocusConfig::from_toml(
            r#"
[llm]
api_key = "from-file"

[embedding]
provider = "voyage"
"#,
        )
        .unwrap();
        config.apply_env_from(|key| match key {
            "LOCUS_LLM_API_KEY" => Some("from-env".into()),
            "VOYAGE_API_KEY" => Some("voyage-env".into()),
            "GITHUB_TOKEN" => Some("ghp_test".into()),
            "LOCUS_DATA_DIR" => Some("/tmp/locus".into()),
            _ => None,
        });
        assert_eq!(config.llm.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.embedding.api_key.as_deref(), Some("voyage-env"));
        assert_eq!(config.github.token.as_deref(), Some("ghp_test"));
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/locus"));
    }

    #[test]
    fn provider_specific_key_is_used() {
        let mut config = LocusConfig::default();
        config.llm.provider = "anthropic".into();
        config.apply_env_from(|key| (key == "ANTHROPIC_API_KEY").then(|| "sk-ant".to_string()));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));
    }

    #[test]
    fn extraction_pool_resolves_zero_to_cores() {
        let mut config = IngestConfig::default();
        assert!(config.extraction_pool_size() >= 1);
        config.extraction_workers = 3;
        assert_eq!(config.extraction_pool_size(), 3);
    }

    #[test]
    fn summarization_pool_is_smaller_than_extraction_pool() {
        let mut config = LocusConfig::default();
        for (workers, concurrent) in [(0, 4), (1, 4), (4, 4), (8, 2), (1, 0)] {
            config.ingest.extraction_workers = workers;
            config.llm.max_concurrent = concurrent;
            assert!(
                config.summarization_pool_size() < config.extraction_pool_size(),
                "workers={workers} max_concurrent={concurrent}"
            );
        }
        config.ingest.extraction_workers = 8;
        config.llm.max_concurrent = 2;
        assert_eq!(config.extraction_pool_size(), 8);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".locus.toml");
        std::fs::write(&path, "[llm]\nmodel = \"llama3\"\n").unwrap();
        let config = LocusConfig::from_file(&path).unwrap();
        assert_eq!(config.llm.model, "llama3");
    }
}
