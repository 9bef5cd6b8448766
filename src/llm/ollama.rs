//! Ollama local-model adapter.
//!
//! Talks to a local Ollama daemon; no credentials involved. The host can
//! be overridden with `OLLAMA_HOST` for daemons on other machines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, FailureKind, RouterError};
use super::{AdapterResponse, CompletionRequest, ProviderAdapter, Role};

const DEFAULT_HOST: &str = "http://localhost:11434";

pub(crate) struct OllamaAdapter {
    client: reqwest::Client,
    host: String,
}

impl OllamaAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        let host =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        Self { client, host }
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<AdapterResponse, RouterError> {
        let url = format!("{}/api/chat", self.host.trim_end_matches('/'));

        let messages: Vec<ApiMessage> = request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.as_str(),
            })
            .collect();

        let body = ApiRequest {
            model: &request.model,
            messages,
            stream: false,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let detail = if e.is_connect() {
                    format!("connection failed (is the Ollama daemon running?): {}", e)
                } else {
                    format!("request failed: {}", e)
                };
                RouterError::provider_failure("ollama", FailureKind::NetworkError, detail)
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(RouterError::provider_failure(
                "ollama",
                classify_http_status(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        let parsed: ApiResponse = serde_json::from_str(&text).map_err(|e| {
            RouterError::provider_failure(
                "ollama",
                FailureKind::ParseError,
                format!("failed to parse response: {}, body: {}", e, text),
            )
        })?;

        Ok(AdapterResponse {
            content: parsed.message.content,
            input_tokens: parsed.prompt_eval_count.unwrap_or(0),
            output_tokens: parsed.eval_count.unwrap_or(0),
        })
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
    num_predict: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}
