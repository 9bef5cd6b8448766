//! Uniform call surface over the supported LLM vendors.
//!
//! The [`ProviderRouter`] owns one adapter per vendor and exposes a single
//! `complete(request) -> response` entry point. Cost is computed here from
//! the pricing table, never by callers. Calls are fully self-contained: no
//! conversation history is kept between them — any prior-iteration context
//! must be injected into the message list by the caller.

mod anthropic;
mod error;
mod google;
mod huggingface;
mod ollama;
mod openai;
mod router;

pub use error::{classify_http_status, FailureKind, RouterError};
pub use router::ProviderRouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LLM vendor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Google,
    OpenAi,
    HuggingFace,
    Ollama,
}

impl Provider {
    /// Env var holding this vendor's API key, if one is required.
    /// Ollama runs locally and needs no credentials.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Google => Some("GOOGLE_API_KEY"),
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::HuggingFace => Some("HF_API_KEY"),
            Provider::Ollama => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::OpenAi => "openai",
            Provider::HuggingFace => "huggingface",
            Provider::Ollama => "ollama",
        };
        write!(f, "{}", tag)
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "google" => Ok(Provider::Google),
            "openai" => Ok(Provider::OpenAi),
            "huggingface" | "hf" => Ok(Provider::HuggingFace),
            "ollama" => Ok(Provider::Ollama),
            other => Err(format!(
                "unknown provider '{}' (expected anthropic, google, openai, huggingface, or ollama)",
                other
            )),
        }
    }
}

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single self-contained completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub provider: Provider,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Completion response with router-computed cost.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Provider tag that actually served the call.
    pub provider: Provider,
}

/// What a vendor adapter returns; the router layers cost on top.
#[derive(Debug, Clone)]
pub(crate) struct AdapterResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-vendor adapter contract. Adapters share nothing beyond this shape.
#[async_trait]
pub(crate) trait ProviderAdapter: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<AdapterResponse, RouterError>;
}

/// Object-safe completion surface the agents depend on.
///
/// Production code uses [`ProviderRouter`]; tests substitute scripted
/// stubs to drive the loops deterministically.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, RouterError>;
}
