//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::client::{ModelClient, ModelError, ModelRequest, ModelResponse, TokenUsage};

/// Endpoint settings for [`HttpModelClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL up to and including `/v1`.
    pub base_url: String,
    /// Bearer token; empty for local servers.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Transport-level timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: String::new(),
            request_timeout_secs: 60,
        }
    }
}

/// `ModelClient` backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpModelClient {
    endpoint: EndpointConfig,
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(endpoint: EndpointConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| ModelError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { endpoint, client })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Map an HTTP status to the error taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ModelError {
    let detail = format!("{}: {}", status, body.chars().take(300).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS {
        ModelError::RateLimited(detail)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ModelError::Transient(detail)
    } else {
        ModelError::Fatal(detail)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn evaluate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = serde_json::json!({
            "model": request.settings.model,
            "temperature": request.settings.temperature,
            "max_tokens": request.settings.max_tokens,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.rendered}
            ]
        });

        let mut builder = self.client.post(self.completions_url()).json(&body);
        if !self.endpoint.api_key.is_empty() {
            builder = builder.bearer_auth(&self.endpoint.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(Duration::from_secs(self.endpoint.request_timeout_secs))
            } else {
                ModelError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: CompletionBody = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(format!("invalid completion body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Parse("completion had no content".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let model = if parsed.model.is_empty() {
            request.settings.model.clone()
        } else {
            parsed.model
        };

        Ok(ModelResponse {
            content,
            usage,
            model,
        })
    }

    fn name(&self) -> &str {
        &self.endpoint.base_url
    }
}
