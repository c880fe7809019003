use std::time::Duration;

use async_trait::async_trait;
use locus_core::LlmConfig;
use serde::{Deserialize, Serialize};

use crate::error::SummarizeError;
use crate::gateway::SummaryBackend;

/// Wire protocol spoken by the configured provider.
///
/// # Examples
///
/// ```
/// use locus_summarize::Provider;
///
/// assert_eq!(Provider::from_name("anthropic"), Some(Provider::Anthropic));
/// assert_eq!(Provider::from_name("ollama"), Some(Provider::OpenAi));
/// assert_eq!(Provider::from_name("none"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// `/v1/chat/completions`: OpenAI, Ollama, vLLM, LiteLLM and friends.
    OpenAi,
    /// Anthropic `/v1/messages`.
    Anthropic,
}

impl Provider {
    /// Provider for a configured name; `None` for `"none"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "off" | "" => None,
            "anthropic" | "claude" => Some(Provider::Anthropic),
            _ => Some(Provider::OpenAi),
        }
    }

    fn default_base_url(self, name: &str) -> &'static str {
        match (self, name) {
            (Provider::Anthropic, _) => "https://api.anthropic.com",
            (Provider::OpenAi, "ollama") => "http://localhost:11434",
            (Provider::OpenAi, _) => "https://api.openai.com",
        }
    }
}

/// A message in a chat conversation with the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
}

/// Chat client for OpenAI-compatible and Anthropic endpoints.
///
/// # Examples
///
/// ```
/// use locus_core::LlmConfig;
/// use locus_summarize::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4o-mini");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    provider: Provider,
    base_url: String,
}

impl LlmClient {
    /// Create a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SummarizeError::Config`] when the provider is `"none"`,
    /// Anthropic is selected without a key, or the HTTP client cannot be
    /// built.
    pub fn new(config: &LlmConfig) -> Result<Self, SummarizeError> {
        let provider = Provider::from_name(&config.provider)
            .ok_or_else(|| SummarizeError::Config("no LLM provider configured".into()))?;
        if provider == Provider::Anthropic && config.api_key.is_none() {
            return Err(SummarizeError::Config("anthropic provider requires an API key".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1) * 2))
            .build()
            .map_err(|e| SummarizeError::Config(format!("failed to create HTTP client: {e}")))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| provider.default_base_url(&config.provider).to_string());
        Ok(Self {
            client,
            config: config.clone(),
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Wire protocol in use.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Send one system + user exchange and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns [`SummarizeError::RateLimited`] on 429 (with `Retry-After`
    /// when present), [`SummarizeError::Upstream`] on other error statuses,
    /// [`SummarizeError::Timeout`] / [`SummarizeError::Transport`] on
    /// connection failures, and [`SummarizeError::Malformed`] when the
    /// body lacks the expected text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, SummarizeError> {
        let request = match self.provider {
            Provider::OpenAi => {
                let messages = vec![
                    ChatMessage {
                        role: Role::System,
                        content: system.to_string(),
                    },
                    ChatMessage {
                        role: Role::User,
                        content: user.to_string(),
                    },
                ];
                let body = serde_json::json!({
                    "model": self.config.model,
                    "messages": messages,
                    "temperature": 0.1,
                    "response_format": { "type": "json_object" },
                });
                let mut request = self
                    .client
                    .post(format!("{}/v1/chat/completions", self.base_url))
                    .json(&body);
                if let Some(api_key) = &self.config.api_key {
                    request = request.header("Authorization", format!("Bearer {api_key}"));
                }
                request
            }
            Provider::Anthropic => {
                let body = serde_json::json!({
                    "model": self.config.model,
                    "max_tokens": 512,
                    "temperature": 0.1,
                    "system": system,
                    "messages": [ChatMessage { role: Role::User, content: user.to_string() }],
                });
                self.client
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", self.config.api_key.as_deref().unwrap_or_default())
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
            }
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SummarizeError::Timeout
            } else {
                SummarizeError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SummarizeError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SummarizeError::Malformed(format!("failed to parse response: {e}")))?;

        let content = match self.provider {
            Provider::OpenAi => body
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str()),
            Provider::Anthropic => body
                .get("content")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("text"))
                .and_then(|t| t.as_str()),
        };

        content
            .map(str::to_string)
            .ok_or_else(|| SummarizeError::Malformed(format!("unexpected response structure: {body}")))
    }
}

#[async_trait]
impl SummaryBackend for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, SummarizeError> {
        self.chat(system, prompt).await
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.into(),
            api_key: Some("test-key".into()),
            base_url: Some(server.uri()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn none_provider_is_a_config_error() {
        let config = LlmConfig {
            provider: "none".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(LlmClient::new(&config), Err(SummarizeError::Config(_))));
    }

    #[test]
    fn anthropic_requires_key() {
        let config = LlmConfig {
            provider: "anthropic".into(),
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(matches!(LlmClient::new(&config), Err(SummarizeError::Config(_))));
    }

    #[tokio::test]
    async fn openai_chat_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "{\"summary\": \"ok\"}" } }]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config_for(&server, "openai")).unwrap();
        let reply = client.chat("sys", "user").await.unwrap();
        assert_eq!(reply, "{\"summary\": \"ok\"}");
    }

    #[tokio::test]
    async fn anthropic_chat_returns_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "summary text" }]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config_for(&server, "anthropic")).unwrap();
        assert_eq!(client.provider(), Provider::Anthropic);
        assert_eq!(client.chat("sys", "user").await.unwrap(), "summary text");
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config_for(&server, "openai")).unwrap();
        let err = client.chat("sys", "user").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config_for(&server, "openai")).unwrap();
        match client.chat("sys", "user").await.unwrap_err() {
            SummarizeError::Upstream { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unexpected_shape_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config_for(&server, "openai")).unwrap();
        assert!(matches!(
            client.chat("sys", "user").await,
            Err(SummarizeError::Malformed(_))
        ));
    }
}
