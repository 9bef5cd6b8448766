//! Control loops: simple mode, full mode, and the tier engine.
//!
//! The loop is the error boundary. Inside an iteration, agent failures
//! and test-runner crashes become records that drive escalation;
//! provider errors and budget exhaustion end the loop; everything else
//! keeps iterating.

mod full;
mod simple;
mod tier;

pub use full::{run_full_phase, FullPhaseParams};
pub use simple::{run_simple_phase, SimplePhaseParams};
pub use tier::{run_tier_escalation, TierEngineOutcome, TierEngineParams};

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::agents::truncate_summary;
use crate::audit::AuditStore;
use crate::context::{AgentContext, ArtisanOutput, TestStatus};
use crate::records::{ExitReason, SimpleIterationRecord, TierAttemptRecord};
use crate::session::SessionLog;
use crate::tiers::TierMode;

/// Cap applied to every code-change summary.
pub const CHANGE_SUMMARY_CAP: usize = 200;

/// Why a phase loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    Success,
    IterationsExhausted,
    BudgetExhausted { reason: String },
    EntropyDetected,
    ProviderError { message: String },
}

impl LoopExit {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopExit::Success)
    }

    /// Whether the whole run must stop here (no further tiers/phases).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopExit::Success | LoopExit::BudgetExhausted { .. } | LoopExit::ProviderError { .. }
        )
    }

    /// Projection into the tier-level exit reason. Entropy ends a tier
    /// the same way iteration exhaustion does: the next tier gets its
    /// chance with the accumulated history.
    pub fn exit_reason(&self) -> ExitReason {
        match self {
            LoopExit::Success => ExitReason::Success,
            LoopExit::IterationsExhausted | LoopExit::EntropyDetected => {
                ExitReason::IterationsExhausted
            }
            LoopExit::BudgetExhausted { .. } => ExitReason::BudgetExhausted,
            LoopExit::ProviderError { .. } => ExitReason::ProviderError,
        }
    }
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::Success => write!(f, "success"),
            LoopExit::IterationsExhausted => write!(f, "iterations_exhausted"),
            LoopExit::BudgetExhausted { reason } => write!(f, "budget_exceeded ({})", reason),
            LoopExit::EntropyDetected => write!(f, "entropy_detected"),
            LoopExit::ProviderError { message } => write!(f, "provider_error ({})", message),
        }
    }
}

/// True per-agent cost totals, accumulated from each call's
/// `AgentResult.cost_usd`. The report falls back to the legacy
/// 20/50/20/10 share estimate only when this tracking is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgentCostBreakdown {
    pub librarian: f64,
    pub artisan: f64,
    pub critic: f64,
}

impl AgentCostBreakdown {
    pub fn total(&self) -> f64 {
        self.librarian + self.artisan + self.critic
    }

    pub fn merge(&mut self, other: &AgentCostBreakdown) {
        self.librarian += other.librarian;
        self.artisan += other.artisan;
        self.critic += other.critic;
    }
}

/// Result of running one phase (or one tier).
#[derive(Debug)]
pub struct PhaseOutcome {
    /// Context as of the last iteration; carries the final test result.
    pub context: AgentContext,
    pub records: Vec<SimpleIterationRecord>,
    pub attempts: Vec<TierAttemptRecord>,
    pub iterations_used: u32,
    pub cost_usd: f64,
    pub agent_costs: AgentCostBreakdown,
    pub exit: LoopExit,
}

impl PhaseOutcome {
    pub fn success(&self) -> bool {
        self.exit.is_success()
    }
}

/// Builds and persists one [`TierAttemptRecord`] per iteration. The
/// two-phase loops use pseudo-tiers ("simple" at index 0, "full" at
/// index 1) so the audit trail has one uniform shape.
pub struct AttemptRecorder<'a> {
    pub run_id: Uuid,
    pub tier_index: u32,
    pub tier_name: String,
    pub tier_mode: TierMode,
    pub model_artisan: String,
    pub model_librarian: Option<String>,
    pub model_critic: Option<String>,
    pub audit: &'a AuditStore,
    pub session: &'a SessionLog,
}

impl<'a> AttemptRecorder<'a> {
    pub async fn persist(&self, record: &SimpleIterationRecord) -> TierAttemptRecord {
        let attempt = TierAttemptRecord {
            run_id: self.run_id,
            tier_index: self.tier_index,
            tier_name: self.tier_name.clone(),
            tier_mode: self.tier_mode,
            model_artisan: self.model_artisan.clone(),
            model_librarian: self.model_librarian.clone(),
            model_critic: self.model_critic.clone(),
            iteration: record.iteration_index,
            code_change_summary: record.code_change_summary.clone(),
            test_status: record.test_status,
            failed_tests: record.failed_tests.clone(),
            error_messages: record.error_messages.clone(),
            cost_usd: record.cost_usd,
            duration_ms: record.duration_ms,
            timestamp: Utc::now(),
        };

        self.audit.write_attempt(&attempt).await;
        self.session.log_event(
            "attempt",
            json!({
                "tier": self.tier_name,
                "iteration": record.iteration_index,
                "test_status": record.test_status.to_string(),
                "cost_usd": record.cost_usd,
            }),
        );

        attempt
    }
}

/// Where the Artisan's code should land: the explicit target file, or the
/// Librarian's top-ranked file when the run has no single target.
pub(crate) fn resolve_write_target(context: &AgentContext) -> Option<PathBuf> {
    if let Some(target) = &context.target_file {
        return Some(context.working_directory.join(target));
    }
    context
        .librarian_context
        .as_ref()
        .and_then(|report| report.relevant_files.first())
        .map(|rel| context.working_directory.join(rel))
}

/// Apply the produced code to disk.
pub(crate) async fn write_code(context: &AgentContext, code: &str) -> Result<PathBuf, String> {
    let Some(path) = resolve_write_target(context) else {
        return Err("no target file and no ranked files to write to".to_string());
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Err(format!("cannot create {}: {}", parent.display(), e));
        }
    }
    match tokio::fs::write(&path, code).await {
        Ok(()) => Ok(path),
        Err(e) => Err(format!("cannot write {}: {}", path.display(), e)),
    }
}

/// Derive the ≤200-char change summary from the Artisan's output.
pub(crate) fn change_summary(output: &ArtisanOutput) -> String {
    let source = output
        .reasoning
        .lines()
        .find(|line| !line.trim().is_empty())
        .or_else(|| {
            output
                .code
                .lines()
                .find(|line| !line.trim().is_empty())
        })
        .unwrap_or("(no summary)");
    truncate_summary(source.trim(), CHANGE_SUMMARY_CAP)
}

/// Record for an iteration that failed before the test run (invalid
/// agent output, unwritable target).
pub(crate) fn error_record(
    iteration: u32,
    message: String,
    cost_usd: f64,
    duration_ms: u64,
) -> SimpleIterationRecord {
    SimpleIterationRecord {
        iteration_index: iteration,
        code_change_summary: truncate_summary(&message, CHANGE_SUMMARY_CAP),
        test_status: TestStatus::Error,
        failed_tests: Vec::new(),
        error_messages: vec![message],
        duration_ms,
        cost_usd,
    }
}

/// Scripted completion client used by the loop tests: replies are served
/// in order, then the default reply repeats forever.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm::{
        CompletionClient, CompletionRequest, CompletionResponse, FailureKind, RouterError,
    };

    pub enum ScriptedReply {
        Content { text: String, cost_usd: f64 },
        ProviderError(String),
    }

    impl ScriptedReply {
        pub fn content(text: &str, cost_usd: f64) -> Self {
            Self::Content {
                text: text.to_string(),
                cost_usd,
            }
        }
    }

    pub struct ScriptedClient {
        replies: Mutex<VecDeque<ScriptedReply>>,
        default: Option<ScriptedReply>,
    }

    impl ScriptedClient {
        pub fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                default: None,
            }
        }

        pub fn repeating(text: &str, cost_usd: f64) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                default: Some(ScriptedReply::content(text, cost_usd)),
            }
        }

        pub fn with_default(mut self, reply: ScriptedReply) -> Self {
            self.default = Some(reply);
            self
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, RouterError> {
            let next = {
                let mut replies = self.replies.lock().expect("scripted replies poisoned");
                replies.pop_front()
            };
            let reply = match (next, &self.default) {
                (Some(reply), _) => reply,
                (None, Some(ScriptedReply::Content { text, cost_usd })) => {
                    ScriptedReply::Content {
                        text: text.clone(),
                        cost_usd: *cost_usd,
                    }
                }
                (None, Some(ScriptedReply::ProviderError(message))) => {
                    ScriptedReply::ProviderError(message.clone())
                }
                (None, None) => ScriptedReply::ProviderError("script exhausted".to_string()),
            };

            match reply {
                ScriptedReply::Content { text, cost_usd } => Ok(CompletionResponse {
                    content: text,
                    input_tokens: 100,
                    output_tokens: 50,
                    cost_usd,
                    provider: request.provider,
                }),
                ScriptedReply::ProviderError(message) => Err(RouterError::provider_failure(
                    request.provider.to_string(),
                    FailureKind::ServerError,
                    message,
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunBudget, TestFramework};

    #[test]
    fn test_exit_reason_projection() {
        assert_eq!(LoopExit::Success.exit_reason(), ExitReason::Success);
        assert_eq!(
            LoopExit::EntropyDetected.exit_reason(),
            ExitReason::IterationsExhausted
        );
        assert_eq!(
            LoopExit::BudgetExhausted {
                reason: "cost".into()
            }
            .exit_reason(),
            ExitReason::BudgetExhausted
        );
    }

    #[test]
    fn test_resolve_write_target_prefers_explicit_target() {
        let context = AgentContext::new(
            "fix",
            Some(PathBuf::from("src/math.py")),
            PathBuf::from("/proj"),
            "pytest",
            TestFramework::Pytest,
            RunBudget::new(1.0, 10.0, 5),
        );
        assert_eq!(
            resolve_write_target(&context),
            Some(PathBuf::from("/proj/src/math.py"))
        );
    }

    #[test]
    fn test_change_summary_prefers_reasoning() {
        let output = ArtisanOutput {
            code: "def f(): pass".into(),
            reasoning: "\nSwapped + for *.\nMore detail.".into(),
            tokens_used: 5,
            cost_usd: 0.0,
        };
        assert_eq!(change_summary(&output), "Swapped + for *.");
    }
}
