//! Text embedding providers used for semantic search.
//!
//! The store never computes similarity from raw text itself: it asks an
//! [`Embedder`] for vectors and compares them with cosine similarity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use locus_core::{EmbeddingConfig, LocusError};
use serde::{Deserialize, Serialize};

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stored alongside embeddings, e.g. `local-384`.
    ///
    /// Vectors from embedders with different ids are not comparable.
    fn id(&self) -> String;

    /// Embed documents for indexing. Output order matches input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LocusError>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LocusError>;
}

/// Build the embedder named by `config.provider`.
///
/// # Errors
///
/// Returns [`LocusError::Config`] for an unknown provider, or a remote
/// provider without an API key.
///
/// # Examples
///
/// ```
/// use locus_core::EmbeddingConfig;
/// use locus_store::embedder_from_config;
///
/// let embedder = embedder_from_config(&EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.id(), "local-384");
/// ```
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, LocusError> {
    match config.provider.as_str() {
        "local" | "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        "voyage" | "openai" => Ok(Arc::new(RemoteEmbedder::with_config(config)?)),
        other => Err(LocusError::Config(format!(
            "unknown embedding provider '{other}' (expected local, voyage or openai)"
        ))),
    }
}

/// Offline embedder based on feature hashing.
///
/// Words are split on punctuation and camelCase boundaries, lowercased and
/// lightly stemmed; each word and each of its 4-character grams is hashed
/// into a signed bucket. The vector is L2-normalised. Deterministic across
/// runs and platforms.
///
/// # Examples
///
/// ```
/// use locus_store::HashingEmbedder;
///
/// let embedder = HashingEmbedder::new(64);
/// let a = embedder.vector("user authentication");
/// let b = embedder.vector("authenticateUser");
/// let c = embedder.vector("render chart axis");
/// let sim = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
/// assert!(sim(&a, &b) > sim(&a, &c));
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Embedder producing `dimensions`-long vectors (at least 8).
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    /// Embed one text synchronously.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in words(text) {
            self.add(&mut v, word.as_bytes(), 1.0);
            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 4 {
                for gram in chars.windows(4) {
                    let gram: String = gram.iter().collect();
                    self.add(&mut v, gram.as_bytes(), 0.5);
                }
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn add(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn id(&self) -> String {
        format!("local-{}", self.dimensions)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LocusError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LocusError> {
        Ok(self.vector(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Lowercased, stemmed words of `text`, split on camelCase too.
pub(crate) fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in raw.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.extend(c.to_lowercase());
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out.into_iter()
        .filter(|w| w.chars().count() > 1)
        .map(|w| stem(&w))
        .collect()
}

fn stem(word: &str) -> String {
    for suffix in ["ations", "ation", "ings", "ing", "ers", "er", "ed", "es", "s"] {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.chars().count() >= 4 {
                return base.to_string();
            }
        }
    }
    word.to_string()
}

const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const BATCH_SIZE: usize = 64;
const BATCH_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Voyage,
    OpenAi,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for Voyage AI or an OpenAI-compatible `/embeddings` endpoint.
///
/// # Examples
///
/// ```
/// use locus_core::EmbeddingConfig;
/// use locus_store::RemoteEmbedder;
/// use locus_store::Embedder;
///
/// let config = EmbeddingConfig {
///     provider: "voyage".into(),
///     api_key: Some("test-key".into()),
///     ..EmbeddingConfig::default()
/// };
/// let embedder = RemoteEmbedder::with_config(&config).unwrap();
/// assert_eq!(embedder.id(), "voyage-voyage-code-3");
/// ```
pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    flavor: Flavor,
}

impl std::fmt::Debug for RemoteEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl RemoteEmbedder {
    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::Config`] if no API key is available.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, LocusError> {
        let flavor = if config.provider == "openai" {
            Flavor::OpenAi
        } else {
            Flavor::Voyage
        };
        let api_key = config.api_key.clone().ok_or_else(|| {
            LocusError::Config(format!(
                "embedding API key not found: set embedding.api_key in .locus.toml or {}",
                match flavor {
                    Flavor::Voyage => "VOYAGE_API_KEY",
                    Flavor::OpenAi => "OPENAI_API_KEY",
                }
            ))
        })?;
        let default_base = match flavor {
            Flavor::Voyage => VOYAGE_BASE_URL,
            Flavor::OpenAi => OPENAI_BASE_URL,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LocusError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            flavor,
        })
    }

    async fn post(&self, input: &[String], input_type: &'static str) -> Result<Vec<Vec<f32>>, LocusError> {
        let request = EmbedRequest {
            model: &self.model,
            input,
            input_type: (self.flavor == Flavor::Voyage).then_some(input_type),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LocusError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(LocusError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let mut parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LocusError::Embedding(format!("failed to parse response: {e}")))?;
        if parsed.data.len() != input.len() {
            return Err(LocusError::Embedding(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|item| item.index.unwrap_or(0));
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn id(&self) -> String {
        let prefix = match self.flavor {
            Flavor::Voyage => "voyage",
            Flavor::OpenAi => "openai",
        };
        format!("{prefix}-{}", self.model)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LocusError> {
        let mut all = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(BATCH_DELAY_MS)).await;
            }
            all.extend(self.post(batch, "document").await?);
        }
        Ok(all)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LocusError> {
        self.post(&[text.to_string()], "query")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LocusError::Embedding("empty response from embedding API".into()))
    }
}

/// Serialize a vector as little-endian `f32` bytes.
pub(crate) fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

pub(crate) fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn words_split_camel_and_snake_case() {
        assert_eq!(words("parseConfigFile"), vec!["parse", "config", "file"]);
        assert_eq!(words("load_user_sessions"), vec!["load", "user", "session"]);
        assert_eq!(words("HTTPServer a"), vec!["httpserv"]);
    }

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(128);
        let a = e.vector("token refresh logic");
        assert_eq!(a, e.vector("token refresh logic"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.vector("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn related_text_scores_higher() {
        let e = HashingEmbedder::new(384);
        let query = e.vector("authentication");
        let auth = e.vector("Handles user authentication and login sessions");
        let chart = e.vector("Renders bar charts with configurable axes");
        assert!(cosine_similarity(&query, &auth) > cosine_similarity(&query, &chart));
        assert!(cosine_similarity(&query, &auth) > 0.1);
    }

    #[test]
    fn float_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_floats(&floats_to_bytes(&v)), v);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let config = EmbeddingConfig {
            provider: "magic".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(embedder_from_config(&config), Err(LocusError::Config(_))));

        let config = EmbeddingConfig {
            provider: "voyage".into(),
            api_key: None,
            ..EmbeddingConfig::default()
        };
        let err = embedder_from_config(&config).err().unwrap();
        assert!(err.to_string().contains("VOYAGE_API_KEY"));
    }

    #[tokio::test]
    async fn voyage_requests_use_input_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({ "input_type": "query" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3] }]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            provider: "voyage".into(),
            api_key: Some("k".into()),
            base_url: Some(server.uri()),
            ..EmbeddingConfig::default()
        };
        let embedder = RemoteEmbedder::with_config(&config).unwrap();
        assert_eq!(embedder.embed_query("auth").await.unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn openai_responses_are_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [2.0] },
                    { "index": 0, "embedding": [1.0] }
                ]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key: Some("k".into()),
            base_url: Some(server.uri()),
            model: "text-embedding-3-small".into(),
            ..EmbeddingConfig::default()
        };
        let embedder = RemoteEmbedder::with_config(&config).unwrap();
        let out = embedder
            .embed_documents(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn api_errors_surface_as_embedding_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            provider: "voyage".into(),
            api_key: Some("k".into()),
            base_url: Some(server.uri()),
            ..EmbeddingConfig::default()
        };
        let embedder = RemoteEmbedder::with_config(&config).unwrap();
        let err = embedder.embed_query("x").await.unwrap_err();
        assert!(matches!(err, LocusError::Embedding(_)));
    }
}
