//! N-tier escalation engine.
//!
//! Generalizes the two-phase loop: each tier brings its own mode, model
//! set, and iteration budget; failed tiers leave a compressed history
//! the next tier starts from. Success anywhere halts the chain; budget
//! exhaustion and provider errors are terminal for the whole run.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::agents::AgentConfig;
use crate::audit::AuditStore;
use crate::context::AgentContext;
use crate::iteration::IterationManager;
use crate::llm::CompletionClient;
use crate::records::TierRunResult;
use crate::session::SessionLog;
use crate::summary::build_accumulated_summary;
use crate::tiers::{ModelSpec, TierEscalationConfig, TierMode};

use super::full::{run_full_phase, FullPhaseParams};
use super::simple::{run_simple_phase, SimplePhaseParams};
use super::{AgentCostBreakdown, AttemptRecorder, LoopExit};

pub struct TierEngineParams<'a> {
    pub config: &'a TierEscalationConfig,
    /// Fallbacks for tiers that do not pin librarian/critic models.
    pub default_librarian: AgentConfig,
    pub default_critic: AgentConfig,
    pub client: Arc<dyn CompletionClient>,
    pub audit: &'a AuditStore,
    pub session: &'a SessionLog,
    pub run_id: Uuid,
    pub test_timeout: Duration,
}

#[derive(Debug)]
pub struct TierEngineOutcome {
    pub results: Vec<TierRunResult>,
    /// Context as of the last tier; carries the final escalation string.
    pub context: AgentContext,
    pub final_exit: LoopExit,
    pub agent_costs: AgentCostBreakdown,
}

impl TierEngineOutcome {
    pub fn success(&self) -> bool {
        self.results.iter().any(|result| result.success)
    }

    /// Name of the tier that resolved the objective, if any.
    pub fn resolved_tier(&self) -> Option<&TierRunResult> {
        self.results.iter().find(|result| result.success)
    }
}

fn agent_config_from_spec(spec: &ModelSpec, fallback_temperature: f64) -> AgentConfig {
    AgentConfig::new(
        spec.provider,
        spec.model.clone(),
        spec.temperature.unwrap_or(fallback_temperature),
    )
}

/// Run the escalation chain.
pub async fn run_tier_escalation(
    context: AgentContext,
    manager: &mut IterationManager,
    params: TierEngineParams<'_>,
) -> TierEngineOutcome {
    let tier_count = params.config.tiers.len();
    let mut context = context;
    let mut results: Vec<TierRunResult> = Vec::new();
    let mut accumulated = String::new();
    let mut final_exit = LoopExit::IterationsExhausted;
    let mut agent_costs = AgentCostBreakdown::default();

    for (tier_index, tier) in params.config.tiers.iter().enumerate() {
        println!(
            "---- > Tier {}/{}: {} [{}, {}] ----",
            tier_index + 1,
            tier_count,
            tier.name,
            tier.mode,
            tier.models.artisan.model
        );
        tracing::info!(
            tier = %tier.name,
            mode = %tier.mode,
            artisan = %tier.models.artisan.model,
            "Starting tier"
        );

        if !accumulated.is_empty() {
            context = context.with_escalation_context(accumulated.clone());
        }

        let artisan_config = agent_config_from_spec(&tier.models.artisan, 0.2);
        let librarian_config = tier
            .models
            .librarian
            .as_ref()
            .map(|spec| agent_config_from_spec(spec, 0.2))
            .unwrap_or_else(|| params.default_librarian.clone());
        let critic_config = tier
            .models
            .critic
            .as_ref()
            .map(|spec| agent_config_from_spec(spec, 0.2))
            .unwrap_or_else(|| params.default_critic.clone());

        let recorder = AttemptRecorder {
            run_id: params.run_id,
            tier_index: tier_index as u32,
            tier_name: tier.name.clone(),
            tier_mode: tier.mode,
            model_artisan: artisan_config.model.clone(),
            model_librarian: matches!(tier.mode, TierMode::Full)
                .then(|| librarian_config.model.clone()),
            model_critic: matches!(tier.mode, TierMode::Full)
                .then(|| critic_config.model.clone()),
            audit: params.audit,
            session: params.session,
        };

        let outcome = match tier.mode {
            TierMode::Simple => {
                run_simple_phase(
                    context.clone(),
                    manager,
                    SimplePhaseParams {
                        phase_iterations: tier.max_iterations,
                        artisan_config,
                        client: Arc::clone(&params.client),
                        recorder,
                        test_timeout: params.test_timeout,
                    },
                )
                .await
            }
            TierMode::Full => {
                run_full_phase(
                    context.clone(),
                    manager,
                    FullPhaseParams {
                        phase_iterations: tier.max_iterations,
                        librarian_config,
                        artisan_config,
                        critic_config,
                        client: Arc::clone(&params.client),
                        recorder,
                        test_timeout: params.test_timeout,
                    },
                )
                .await
            }
        };

        context = outcome.context.clone();
        final_exit = outcome.exit.clone();
        agent_costs.merge(&outcome.agent_costs);

        results.push(TierRunResult {
            tier_name: tier.name.clone(),
            tier_index: tier_index as u32,
            success: outcome.success(),
            iterations_ran: outcome.iterations_used,
            total_cost_usd: outcome.cost_usd,
            records: outcome.attempts,
            exit_reason: outcome.exit.exit_reason(),
        });

        if outcome.exit.is_terminal() {
            break;
        }

        // A fresh tier gets a fresh entropy streak.
        manager.reset_entropy();
        accumulated = build_accumulated_summary(&results);
    }

    TierEngineOutcome {
        results,
        context,
        final_exit,
        agent_costs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunBudget, TestFramework};
    use crate::engine::testing::{ScriptedClient, ScriptedReply};
    use crate::llm::Provider;
    use crate::records::ExitReason;
    use std::path::PathBuf;

    const SUMMARY: &str = "math.py defines multiply.";
    const GOOD_FIX: &str =
        "Swapped + for *.\n```python\ndef multiply(a, b):\n    return a * b\n```";
    const BAD_FIX: &str =
        "Tried subtraction.\n```python\ndef multiply(a, b):\n    return a - b\n```";
    const REVIEW: &str = "REVISE\nStill not a product.";

    fn three_tier_config() -> TierEscalationConfig {
        let yaml = r#"
tiers:
  - name: cheap
    mode: simple
    max_iterations: 2
    models:
      artisan: { provider: openai, model: gpt-4o-mini }
  - name: mid
    mode: full
    max_iterations: 2
    models:
      artisan: { provider: openai, model: gpt-4o }
      librarian: { provider: google, model: gemini-2.0-flash }
      critic: { provider: anthropic, model: claude-3-5-haiku }
  - name: heavy
    mode: full
    max_iterations: 3
    models:
      artisan: { provider: anthropic, model: claude-sonnet-4 }
      librarian: { provider: google, model: gemini-2.0-flash }
      critic: { provider: anthropic, model: claude-3-5-haiku }
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiers.yml");
        std::fs::write(&path, yaml).unwrap();
        TierEscalationConfig::load(&path).unwrap()
    }

    fn context_in(dir: &std::path::Path) -> AgentContext {
        AgentContext::new(
            "make multiply multiply",
            Some(PathBuf::from("math.py")),
            dir.to_path_buf(),
            "grep -q 'a \\* b' math.py || { echo 'AssertionError: multiply is wrong' >&2; exit 1; }",
            TestFramework::Custom,
            RunBudget::new(5.0, 30.0, 50),
        )
    }

    #[tokio::test]
    async fn test_three_tier_escalation_resolves_at_heavy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "def multiply(a, b): return a + b").unwrap();

        // Tier 1 (simple): two bad fixes. Tier 2 (full): two iterations
        // of summary/bad/review. Tier 3 (full): one good iteration.
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptedReply::content(BAD_FIX, 0.01),
            ScriptedReply::content(BAD_FIX, 0.01),
            ScriptedReply::content(SUMMARY, 0.001),
            ScriptedReply::content(BAD_FIX, 0.02),
            ScriptedReply::content(REVIEW, 0.001),
            ScriptedReply::content(SUMMARY, 0.001),
            ScriptedReply::content(BAD_FIX, 0.02),
            ScriptedReply::content(REVIEW, 0.001),
            ScriptedReply::content(SUMMARY, 0.001),
            ScriptedReply::content(GOOD_FIX, 0.03),
            ScriptedReply::content(REVIEW, 0.001),
        ]));

        let audit_dir = tempfile::tempdir().unwrap();
        let audit = AuditStore::open(&audit_dir.path().join("audit.db")).await;
        let session = SessionLog::disabled();
        let run_id = Uuid::new_v4();
        let config = three_tier_config();
        let mut manager = IterationManager::new(50, 5.0, 30.0, 1, 3);

        let outcome = run_tier_escalation(
            context_in(dir.path()),
            &mut manager,
            TierEngineParams {
                config: &config,
                default_librarian: AgentConfig::new(Provider::Google, "gemini-2.0-flash", 0.2),
                default_critic: AgentConfig::new(Provider::Anthropic, "claude-3-5-haiku", 0.2),
                client,
                audit: &audit,
                session: &session,
                run_id,
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert!(outcome.success());
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].exit_reason, ExitReason::IterationsExhausted);
        assert_eq!(outcome.results[1].exit_reason, ExitReason::IterationsExhausted);
        assert!(outcome.results[2].success);
        assert_eq!(outcome.resolved_tier().unwrap().tier_name, "heavy");

        // The heavy tier saw both prior tiers' failures.
        let escalation = outcome.context.escalation_context.as_deref().unwrap();
        assert!(escalation.contains("=== TIER 1 FAILURES: cheap (2 iterations) ==="));
        assert!(escalation.contains("=== TIER 2 FAILURES: mid (2 iterations) ==="));
        assert!(escalation.contains("[total accumulated across 2 tier(s): 4 iterations,"));

        // 2 + 2 + 1 attempts in the audit store, one per iteration.
        assert_eq!(audit.count_attempts(run_id).await, Some(5));

        // Iteration numbering is continuous across tiers.
        let last = outcome.results[2].records.last().unwrap();
        assert_eq!(last.iteration, 5);
    }

    #[tokio::test]
    async fn test_success_at_first_tier_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "def multiply(a, b): return a + b").unwrap();

        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::content(
            GOOD_FIX, 0.01,
        )]));
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let config = three_tier_config();
        let mut manager = IterationManager::new(50, 5.0, 30.0, 1, 3);

        let outcome = run_tier_escalation(
            context_in(dir.path()),
            &mut manager,
            TierEngineParams {
                config: &config,
                default_librarian: AgentConfig::new(Provider::Google, "gemini-2.0-flash", 0.2),
                default_critic: AgentConfig::new(Provider::Anthropic, "claude-3-5-haiku", 0.2),
                client,
                audit: &audit,
                session: &session,
                run_id: Uuid::new_v4(),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert!(outcome.success());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.resolved_tier().unwrap().tier_name, "cheap");
    }

    #[tokio::test]
    async fn test_provider_error_is_terminal_for_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "x").unwrap();

        let client = Arc::new(ScriptedClient::new(vec![
            ScriptedReply::content(BAD_FIX, 0.01),
            ScriptedReply::ProviderError("upstream down".to_string()),
        ]));
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let config = three_tier_config();
        let mut manager = IterationManager::new(50, 5.0, 30.0, 1, 3);

        let outcome = run_tier_escalation(
            context_in(dir.path()),
            &mut manager,
            TierEngineParams {
                config: &config,
                default_librarian: AgentConfig::new(Provider::Google, "gemini-2.0-flash", 0.2),
                default_critic: AgentConfig::new(Provider::Anthropic, "claude-3-5-haiku", 0.2),
                client,
                audit: &audit,
                session: &session,
                run_id: Uuid::new_v4(),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert!(!outcome.success());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].exit_reason, ExitReason::ProviderError);
        assert!(matches!(outcome.final_exit, LoopExit::ProviderError { .. }));
    }
}
