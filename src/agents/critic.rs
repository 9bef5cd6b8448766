//! Critic: reviews the Artisan's change against the objective.
//!
//! A rejection is recorded and reported but never stops the loop; the
//! test run is the arbiter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{AgentContext, CriticReview};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest};

use super::{Agent, AgentConfig, AgentError, AgentResult};

#[derive(Debug, Clone)]
struct CriticInput {
    objective: String,
    code: String,
    reasoning: String,
}

pub struct Critic {
    config: AgentConfig,
    client: Arc<dyn CompletionClient>,
    input: Option<CriticInput>,
}

impl Critic {
    pub fn new(config: AgentConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            config,
            client,
            input: None,
        }
    }
}

#[async_trait]
impl Agent for Critic {
    fn name(&self) -> &'static str {
        "critic"
    }

    fn config_mut(&mut self) -> &mut AgentConfig {
        &mut self.config
    }

    fn initialize(&mut self, context: &AgentContext) {
        let (code, reasoning) = context
            .artisan_code
            .as_ref()
            .map(|output| (output.code.clone(), output.reasoning.clone()))
            .unwrap_or_default();
        self.input = Some(CriticInput {
            objective: context.objective.clone(),
            code,
            reasoning,
        });
    }

    async fn execute(&mut self) -> Result<AgentResult, AgentError> {
        let input = self.input.clone().ok_or(AgentError::NotInitialized)?;

        if input.code.is_empty() {
            return Ok(AgentResult::invalid_output(
                "critic invoked without artisan output",
                0,
                0.0,
            ));
        }

        let user_message = format!(
            "Objective: {}\n\nProposed change (engineer's rationale: {}):\n```\n{}\n```\n\n\
             Does this change plausibly satisfy the objective without breaking unrelated \
             behavior? Start your reply with exactly APPROVED or REVISE, then give your \
             critique.",
            input.objective,
            if input.reasoning.is_empty() {
                "none given"
            } else {
                input.reasoning.as_str()
            },
            input.code
        );

        let request = CompletionRequest {
            provider: self.config.provider,
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(
                    "You are the Critic of an autonomous code-fixing agent. You review a \
                     proposed change for correctness and scope. Be strict but brief.",
                ),
                ChatMessage::user(user_message),
            ],
            temperature: self.config.temperature,
            max_tokens: 1024,
        };

        let response = self.client.complete(request).await?;
        let tokens_used = response.input_tokens + response.output_tokens;

        if response.content.trim().is_empty() {
            return Ok(AgentResult::invalid_output(
                "critic returned an empty review",
                tokens_used,
                response.cost_usd,
            ));
        }

        let (approved, critique) = parse_verdict(&response.content);
        let review = CriticReview {
            approved,
            critique,
            tokens_used,
            cost_usd: response.cost_usd,
        };

        match serde_json::to_value(&review) {
            Ok(data) => Ok(AgentResult {
                success: true,
                data,
                tokens_used,
                cost_usd: review.cost_usd,
            }),
            Err(e) => Ok(AgentResult::invalid_output(
                format!("unserializable review: {}", e),
                tokens_used,
                review.cost_usd,
            )),
        }
    }
}

/// Parse the leading APPROVED/REVISE verdict. Replies that follow neither
/// convention are treated as rejections with the full text as critique.
fn parse_verdict(content: &str) -> (bool, String) {
    let trimmed = content.trim();
    let first_line = trimmed.lines().next().unwrap_or_default().to_uppercase();

    let approved = first_line.starts_with("APPROVED");
    let critique = if first_line.starts_with("APPROVED") || first_line.starts_with("REVISE") {
        trimmed
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    };

    (approved, critique)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_approved() {
        let (approved, critique) = parse_verdict("APPROVED\nLooks correct.");
        assert!(approved);
        assert_eq!(critique, "Looks correct.");
    }

    #[test]
    fn test_verdict_revise() {
        let (approved, critique) = parse_verdict("REVISE\nThe loop bound is off by one.");
        assert!(!approved);
        assert!(critique.contains("off by one"));
    }

    #[test]
    fn test_nonconforming_reply_is_rejection() {
        let (approved, critique) = parse_verdict("I think this is probably fine?");
        assert!(!approved);
        assert_eq!(critique, "I think this is probably fine?");
    }
}
