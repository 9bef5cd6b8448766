//! Hugging Face Inference Providers adapter.
//!
//! The HF router endpoint is OpenAI-wire-compatible, so this adapter
//! delegates to the shared chat-completions call.

use async_trait::async_trait;

use super::openai::chat_completions;
use super::{AdapterResponse, CompletionRequest, ProviderAdapter, RouterError};

const API_URL: &str = "https://router.huggingface.co/v1/chat/completions";

pub(crate) struct HuggingFaceAdapter {
    client: reqwest::Client,
}

impl HuggingFaceAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<AdapterResponse, RouterError> {
        chat_completions(
            &self.client,
            API_URL,
            "huggingface",
            api_key.unwrap_or_default(),
            request,
        )
        .await
    }
}
