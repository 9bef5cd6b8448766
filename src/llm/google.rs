//! Google Gemini generateContent adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, FailureKind, RouterError};
use super::{AdapterResponse, CompletionRequest, ProviderAdapter, Role};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub(crate) struct GoogleAdapter {
    client: reqwest::Client,
}

impl GoogleAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<AdapterResponse, RouterError> {
        let url = format!("{}/{}:generateContent", API_BASE, request.model);

        let system_text: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<Content> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                },
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let body = ApiRequest {
            contents,
            system_instruction: if system_text.is_empty() {
                None
            } else {
                Some(SystemInstruction {
                    parts: vec![Part {
                        text: system_text.join("\n\n"),
                    }],
                })
            },
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key.unwrap_or_default())
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
                RouterError::provider_failure("google", FailureKind::NetworkError, detail)
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(RouterError::provider_failure(
                "google",
                classify_http_status(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        let parsed: ApiResponse = serde_json::from_str(&text).map_err(|e| {
            RouterError::provider_failure(
                "google",
                FailureKind::ParseError,
                format!("failed to parse response: {}, body: {}", e, text),
            )
        })?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| {
                RouterError::provider_failure(
                    "google",
                    FailureKind::ParseError,
                    "no candidates in response",
                )
            })?;

        let usage = parsed.usage_metadata.unwrap_or_default();

        Ok(AdapterResponse {
            content,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}
