//! Vendor-adapter dispatcher and cost computer.

use std::time::Duration;

use async_trait::async_trait;

use crate::pricing;

use super::anthropic::AnthropicAdapter;
use super::google::GoogleAdapter;
use super::huggingface::HuggingFaceAdapter;
use super::ollama::OllamaAdapter;
use super::openai::OpenAiAdapter;
use super::{
    CompletionClient, CompletionRequest, CompletionResponse, Provider, ProviderAdapter,
    RouterError,
};

/// Default per-call HTTP timeout. LLM completions routinely take minutes.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Uniform call surface over all supported vendors.
///
/// Stateless between calls: no conversation history is held here. Cost is
/// computed from the pricing table on every response so callers never do
/// their own accounting.
pub struct ProviderRouter {
    anthropic: AnthropicAdapter,
    google: GoogleAdapter,
    openai: OpenAiAdapter,
    huggingface: HuggingFaceAdapter,
    ollama: OllamaAdapter,
}

impl ProviderRouter {
    /// Create a router with the default call timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    /// Create a router with a custom per-call HTTP timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            anthropic: AnthropicAdapter::new(client.clone()),
            google: GoogleAdapter::new(client.clone()),
            openai: OpenAiAdapter::new(client.clone()),
            huggingface: HuggingFaceAdapter::new(client.clone()),
            ollama: OllamaAdapter::new(client),
        }
    }

    /// Resolve the API key for a provider, or fail with a remediation hint.
    fn resolve_credentials(provider: Provider) -> Result<Option<String>, RouterError> {
        match provider.api_key_env_var() {
            None => Ok(None),
            Some(env_var) => match std::env::var(env_var) {
                Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
                _ => Err(RouterError::MissingCredentials {
                    provider: provider.to_string(),
                    env_var: env_var.to_string(),
                }),
            },
        }
    }

    fn adapter(&self, provider: Provider) -> &dyn ProviderAdapter {
        match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
            Provider::OpenAi => &self.openai,
            Provider::HuggingFace => &self.huggingface,
            Provider::Ollama => &self.ollama,
        }
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for ProviderRouter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, RouterError> {
        let api_key = Self::resolve_credentials(request.provider)?;

        tracing::debug!(
            provider = %request.provider,
            model = %request.model,
            messages = request.messages.len(),
            "Dispatching completion request"
        );

        let adapter = self.adapter(request.provider);
        let raw = adapter.complete(&request, api_key.as_deref()).await?;

        // Local models bill nothing; everything else goes through the
        // price table.
        let cost_usd = if request.provider == Provider::Ollama {
            0.0
        } else {
            pricing::cost_usd_for_usage(&request.model, raw.input_tokens, raw.output_tokens)
        };

        tracing::debug!(
            provider = %request.provider,
            model = %request.model,
            input_tokens = raw.input_tokens,
            output_tokens = raw.output_tokens,
            cost_usd,
            "Completion response received"
        );

        Ok(CompletionResponse {
            content: raw.content,
            input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            cost_usd,
            provider: request.provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_names_env_var() {
        std::env::remove_var("OPENAI_API_KEY");
        let err = ProviderRouter::resolve_credentials(Provider::OpenAi).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(err.to_string().contains("-> Fix:"));
    }

    #[test]
    fn test_ollama_needs_no_credentials() {
        let key = ProviderRouter::resolve_credentials(Provider::Ollama).unwrap();
        assert!(key.is_none());
    }
}
