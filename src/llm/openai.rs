//! OpenAI Chat Completions adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, FailureKind, RouterError};
use super::{AdapterResponse, ChatMessage, CompletionRequest, ProviderAdapter};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub(crate) struct OpenAiAdapter {
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<AdapterResponse, RouterError> {
        chat_completions(
            &self.client,
            API_URL,
            "openai",
            api_key.unwrap_or_default(),
            request,
        )
        .await
    }
}

/// Shared OpenAI-wire-format call, also used by the Hugging Face router
/// endpoint which speaks the same protocol.
pub(crate) async fn chat_completions(
    client: &reqwest::Client,
    url: &str,
    provider_tag: &str,
    api_key: &str,
    request: &CompletionRequest,
) -> Result<AdapterResponse, RouterError> {
    let body = ApiRequest {
        model: &request.model,
        messages: &request.messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };

    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            let detail = if e.is_timeout() {
                format!("request timeout: {}", e)
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                format!("request failed: {}", e)
            };
            RouterError::provider_failure(provider_tag, FailureKind::NetworkError, detail)
        })?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(RouterError::provider_failure(
            provider_tag,
            classify_http_status(status.as_u16()),
            format!("HTTP {}: {}", status.as_u16(), text),
        ));
    }

    let parsed: ApiResponse = serde_json::from_str(&text).map_err(|e| {
        RouterError::provider_failure(
            provider_tag,
            FailureKind::ParseError,
            format!("failed to parse response: {}, body: {}", e, text),
        )
    })?;

    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        RouterError::provider_failure(
            provider_tag,
            FailureKind::ParseError,
            "no choices in response",
        )
    })?;

    let usage = parsed.usage.unwrap_or_default();

    Ok(AdapterResponse {
        content: choice.message.content.unwrap_or_default(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    })
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
