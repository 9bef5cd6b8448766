//! Artisan: produces the replacement file content for each iteration.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::context::{AgentContext, ArtisanOutput};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest};

use super::{Agent, AgentConfig, AgentError, AgentResult};

/// Cap on the target-file content included in the prompt.
const MAX_TARGET_BYTES: usize = 48 * 1024;

#[derive(Debug, Clone)]
struct ArtisanInput {
    objective: String,
    target_file: Option<PathBuf>,
    working_directory: PathBuf,
    librarian_summary: Option<String>,
    escalation_context: Option<String>,
}

pub struct Artisan {
    config: AgentConfig,
    client: Arc<dyn CompletionClient>,
    input: Option<ArtisanInput>,
}

impl Artisan {
    pub fn new(config: AgentConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            config,
            client,
            input: None,
        }
    }

    fn build_user_message(input: &ArtisanInput, target_content: Option<&str>) -> String {
        let mut message = String::new();

        if let Some(history) = &input.escalation_context {
            message.push_str("PRIOR ATTEMPTS:\n");
            message.push_str(history);
            message.push_str("\n\n");
        }

        message.push_str(&format!("Objective: {}\n", input.objective));

        if let Some(summary) = &input.librarian_summary {
            message.push_str("\nCodebase context:\n");
            message.push_str(summary);
            message.push('\n');
        }

        match (&input.target_file, target_content) {
            (Some(path), Some(content)) => {
                message.push_str(&format!(
                    "\nCurrent content of {}:\n```\n{}\n```\n",
                    path.display(),
                    content
                ));
            }
            (Some(path), None) => {
                message.push_str(&format!(
                    "\nThe target file {} does not exist yet; create it.\n",
                    path.display()
                ));
            }
            (None, _) => {
                message.push_str("\nNo single target file; produce the file most in need of a fix.\n");
            }
        }

        message.push_str(
            "\nReturn the complete corrected file in a single fenced code block. \
             Before the block, explain your change in one or two sentences.",
        );
        message
    }
}

#[async_trait]
impl Agent for Artisan {
    fn name(&self) -> &'static str {
        "artisan"
    }

    fn config_mut(&mut self) -> &mut AgentConfig {
        &mut self.config
    }

    fn initialize(&mut self, context: &AgentContext) {
        self.input = Some(ArtisanInput {
            objective: context.objective.clone(),
            target_file: context.target_file.clone(),
            working_directory: context.working_directory.clone(),
            librarian_summary: context
                .librarian_context
                .as_ref()
                .map(|report| report.context_summary.clone()),
            escalation_context: context.escalation_context.clone(),
        });
    }

    async fn execute(&mut self) -> Result<AgentResult, AgentError> {
        let input = self.input.clone().ok_or(AgentError::NotInitialized)?;

        let target_content = input.target_file.as_ref().and_then(|rel| {
            let path = input.working_directory.join(rel);
            std::fs::read_to_string(path).ok().map(|mut content| {
                if content.len() > MAX_TARGET_BYTES {
                    let mut cut = MAX_TARGET_BYTES;
                    while cut > 0 && !content.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    content.truncate(cut);
                }
                content
            })
        });

        let request = CompletionRequest {
            provider: self.config.provider,
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(
                    "You are the Artisan of an autonomous code-fixing agent. You rewrite one \
                     file at a time to make the test suite pass. Output the full file, never a \
                     diff. Do not touch code unrelated to the objective.",
                ),
                ChatMessage::user(Self::build_user_message(&input, target_content.as_deref())),
            ],
            temperature: self.config.temperature,
            max_tokens: 4096,
        };

        let response = self.client.complete(request).await?;
        let tokens_used = response.input_tokens + response.output_tokens;

        let (code, reasoning) = match split_code_and_reasoning(&response.content) {
            Ok(parts) => parts,
            Err(message) => {
                return Ok(AgentResult::invalid_output(
                    message,
                    tokens_used,
                    response.cost_usd,
                ))
            }
        };

        let output = ArtisanOutput {
            code,
            reasoning,
            tokens_used,
            cost_usd: response.cost_usd,
        };

        match serde_json::to_value(&output) {
            Ok(data) => Ok(AgentResult {
                success: true,
                data,
                tokens_used,
                cost_usd: output.cost_usd,
            }),
            Err(e) => Ok(AgentResult::invalid_output(
                format!("unserializable output: {}", e),
                tokens_used,
                output.cost_usd,
            )),
        }
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)```").expect("valid regex"))
}

/// Split a model reply into (code, reasoning).
///
/// The first fenced block is the code; everything around it is the
/// reasoning. A fence-less reply is treated as all code. Empty replies
/// are invalid output.
fn split_code_and_reasoning(content: &str) -> Result<(String, String), String> {
    if content.trim().is_empty() {
        return Err("artisan returned an empty reply".to_string());
    }

    match fence_re().captures(content) {
        Some(caps) => {
            let code = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if code.trim().is_empty() {
                return Err("artisan returned an empty code block".to_string());
            }
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let mut reasoning = String::new();
            reasoning.push_str(content[..whole.start].trim());
            let after = content[whole.end..].trim();
            if !after.is_empty() {
                if !reasoning.is_empty() {
                    reasoning.push('\n');
                }
                reasoning.push_str(after);
            }
            Ok((code.to_string(), reasoning))
        }
        None => Ok((content.trim().to_string(), String::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_extracts_first_fenced_block() {
        let reply = "Switched the operator.\n```python\ndef multiply(a, b):\n    return a * b\n```\nDone.";
        let (code, reasoning) = split_code_and_reasoning(reply).unwrap();
        assert_eq!(code, "def multiply(a, b):\n    return a * b\n");
        assert!(reasoning.contains("Switched the operator."));
        assert!(reasoning.contains("Done."));
    }

    #[test]
    fn test_split_without_fence_uses_whole_reply() {
        let reply = "def multiply(a, b):\n    return a * b";
        let (code, reasoning) = split_code_and_reasoning(reply).unwrap();
        assert_eq!(code, reply);
        assert!(reasoning.is_empty());
    }

    #[test]
    fn test_split_rejects_empty_reply() {
        assert!(split_code_and_reasoning("   \n").is_err());
    }

    #[test]
    fn test_split_rejects_empty_code_block() {
        assert!(split_code_and_reasoning("text\n```\n\n```").is_err());
    }
}
