//! Role agents: Librarian, Artisan, Critic.
//!
//! Three concrete types sharing one capability shape: `initialize` with a
//! context snapshot, then `execute` to produce an [`AgentResult`]. Prompt
//! construction is direct code in each agent — there is no prompt
//! template hierarchy. Agents are cheap to construct; the reset policy
//! simply drops and rebuilds them between iterations.

mod artisan;
mod critic;
mod librarian;

pub use artisan::Artisan;
pub use critic::Critic;
pub use librarian::Librarian;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::AgentContext;
use crate::llm::{Provider, RouterError};

/// Per-agent model configuration. The orchestrator may override any field
/// before `initialize` (tier model overrides go through here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub provider: Provider,
    pub model: String,
    pub temperature: f64,
}

impl AgentConfig {
    pub fn new(provider: Provider, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }
}

/// Uniform result envelope. `data` holds the role-specific structured
/// output (`LibrarianReport`, `ArtisanOutput`, `CriticReview`) as JSON.
///
/// Invalid model output is a `success = false` result, not an error:
/// the call still cost money and the loop records that cost before
/// moving on.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

impl AgentResult {
    /// Failure envelope for unusable model output.
    pub fn invalid_output(message: impl Into<String>, tokens_used: u64, cost_usd: f64) -> Self {
        Self {
            success: false,
            data: serde_json::json!({ "error": message.into() }),
            tokens_used,
            cost_usd,
        }
    }

    /// The error message of a failed result, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.data.get("error").and_then(|v| v.as_str())
    }
}

/// Errors from agent execution. Both variants abort the current tier;
/// ordinary bad output is reported through `AgentResult::invalid_output`
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("agent executed before initialize")]
    NotInitialized,
}

/// Capability set shared by the three roles.
#[async_trait]
pub trait Agent: Send {
    /// Role name for logs and reports.
    fn name(&self) -> &'static str;

    /// Mutable access to the model configuration, for overrides.
    fn config_mut(&mut self) -> &mut AgentConfig;

    /// Snapshot the inputs this role needs from the context.
    fn initialize(&mut self, context: &AgentContext);

    /// Run the role once. Fully self-contained: any prior-iteration
    /// context must already be in the initialized snapshot.
    async fn execute(&mut self) -> Result<AgentResult, AgentError>;
}

/// Cap a change summary for records and reports.
pub(crate) fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_summary_caps_length() {
        let long = "x".repeat(500);
        let capped = truncate_summary(&long, 200);
        assert_eq!(capped.chars().count(), 200);
        assert!(capped.ends_with("..."));

        let short = "small change";
        assert_eq!(truncate_summary(short, 200), short);
    }
}
