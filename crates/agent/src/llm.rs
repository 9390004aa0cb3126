use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use concierge_core::config::{LlmConfig, LlmProvider};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_text: String,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self { system_prompt: system_prompt.into(), user_text: user_text.into() }
    }
}

/// Returns the model's raw text reply. Any error sends the caller down its
/// deterministic fallback path.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String>;
}

/// Always fails. Used in offline mode so every parse takes the fallback path.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableLlmClient;

#[async_trait]
impl LlmClient for UnavailableLlmClient {
    async fn complete(&self, _request: &LlmRequest) -> Result<String> {
        bail!("language model is not configured")
    }
}

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 1024;

pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build llm http client")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/v1/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/v1/messages", self.base_url),
            LlmProvider::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn body(&self, request: &LlmRequest) -> Value {
        match self.provider {
            LlmProvider::OpenAi => json!({
                "model": self.model,
                "temperature": 0,
                "messages": [
                    {"role": "system", "content": request.system_prompt},
                    {"role": "user", "content": request.user_text},
                ],
            }),
            LlmProvider::Anthropic => json!({
                "model": self.model,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "system": request.system_prompt,
                "messages": [{"role": "user", "content": request.user_text}],
            }),
            LlmProvider::Ollama => json!({
                "model": self.model,
                "stream": false,
                "messages": [
                    {"role": "system", "content": request.system_prompt},
                    {"role": "user", "content": request.user_text},
                ],
            }),
        }
    }

    async fn send_once(&self, request: &LlmRequest) -> Result<String, AttemptError> {
        let mut builder = self.client.post(self.endpoint()).json(&self.body(request));
        let api_key = self.api_key.as_ref().map(|key| key.expose_secret().to_string());
        builder = match (self.provider, api_key) {
            (LlmProvider::OpenAi, Some(key)) => builder.bearer_auth(key),
            (LlmProvider::Anthropic, Some(key)) => {
                builder.header("x-api-key", key).header("anthropic-version", ANTHROPIC_VERSION)
            }
            (_, _) => builder,
        };

        let response = builder.send().await.map_err(|error| AttemptError {
            retryable: error.is_timeout() || error.is_connect(),
            error: anyhow!("llm request failed: {error}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
                error: anyhow!("llm provider returned {status}: {}", truncate(&detail, 200)),
            });
        }

        let payload: Value = response.json().await.map_err(|error| AttemptError {
            retryable: false,
            error: anyhow!("llm response was not json: {error}"),
        })?;
        extract_text(self.provider, &payload)
            .map(str::to_string)
            .ok_or_else(|| AttemptError {
                retryable: false,
                error: anyhow!("llm response carried no text content"),
            })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(text) => return Ok(text),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "agent.llm.retry",
                        provider = self.provider.as_str(),
                        attempt,
                        error = %failure.error,
                        "retrying llm request"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }
}

impl fmt::Debug for HttpLlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLlmClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

struct AttemptError {
    retryable: bool,
    error: anyhow::Error,
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

fn extract_text(provider: LlmProvider, payload: &Value) -> Option<&str> {
    match provider {
        LlmProvider::OpenAi => payload.pointer("/choices/0/message/content")?.as_str(),
        LlmProvider::Anthropic => payload
            .get("content")?
            .as_array()?
            .iter()
            .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))?
            .get("text")?
            .as_str(),
        LlmProvider::Ollama => payload.pointer("/message/content")?.as_str(),
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::{AppConfig, LlmProvider};
    use serde_json::json;

    use super::{extract_text, truncate, HttpLlmClient, LlmClient, LlmRequest, UnavailableLlmClient};

    #[test]
    fn extracts_text_for_each_wire_format() {
        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "{\"intent\":\"unknown\"}"}}]});
        let anthropic = json!({"content": [{"type": "text", "text": "hello"}]});
        let ollama = json!({"message": {"role": "assistant", "content": "hi"}});

        assert_eq!(extract_text(LlmProvider::OpenAi, &openai), Some("{\"intent\":\"unknown\"}"));
        assert_eq!(extract_text(LlmProvider::Anthropic, &anthropic), Some("hello"));
        assert_eq!(extract_text(LlmProvider::Ollama, &ollama), Some("hi"));
        assert_eq!(extract_text(LlmProvider::Ollama, &json!({})), None);
    }

    #[test]
    fn request_bodies_follow_provider_shape() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Anthropic;
        config.base_url = Some("https://api.anthropic.com/".to_owned());
        let client = HttpLlmClient::from_config(&config).expect("client builds");

        let request = LlmRequest::new("system", "user text");
        let body = client.body(&request);
        assert_eq!(body["system"], "system");
        assert_eq!(body["messages"][0]["content"], "user text");
        assert_eq!(client.endpoint(), "https://api.anthropic.com/v1/messages");
        assert!(!format!("{client:?}").contains("sk-"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("创建订单", 2), "创建");
        assert_eq!(truncate("ok", 10), "ok");
    }

    #[tokio::test]
    async fn unavailable_client_always_fails() {
        let result = UnavailableLlmClient.complete(&LlmRequest::new("s", "u")).await;
        assert!(result.is_err());
    }
}
