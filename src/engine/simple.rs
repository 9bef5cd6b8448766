//! Simple-mode loop: Artisan and the test runner, nothing else.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::{Agent, AgentConfig, Artisan};
use crate::context::{AgentContext, ArtisanOutput};
use crate::iteration::{BudgetStatus, IterationManager};
use crate::llm::CompletionClient;
use crate::runner::run_tests;

use super::{
    change_summary, error_record, write_code, AgentCostBreakdown, AttemptRecorder, LoopExit,
    PhaseOutcome,
};
use crate::records::SimpleIterationRecord;

pub struct SimplePhaseParams<'a> {
    /// Iteration budget for this phase (not the whole run).
    pub phase_iterations: u32,
    pub artisan_config: AgentConfig,
    pub client: Arc<dyn CompletionClient>,
    pub recorder: AttemptRecorder<'a>,
    pub test_timeout: Duration,
}

/// Run up to `phase_iterations` Artisan-only attempts.
///
/// Each iteration: budget pre-check, Artisan call with a minimal context,
/// write the produced code, run the tests, record the attempt. Test
/// passes end the phase with success; agent output problems are recorded
/// and skipped past; provider errors end the phase.
pub async fn run_simple_phase(
    context: AgentContext,
    manager: &mut IterationManager,
    params: SimplePhaseParams<'_>,
) -> PhaseOutcome {
    let mut context = context;
    let mut records: Vec<SimpleIterationRecord> = Vec::new();
    let mut attempts = Vec::new();
    let mut exit = LoopExit::IterationsExhausted;
    let phase_start_cost = manager.total_cost_usd();
    let mut iterations_used = 0;
    let mut agent_costs = AgentCostBreakdown::default();

    let mut artisan = Artisan::new(params.artisan_config.clone(), Arc::clone(&params.client));

    for _ in 0..params.phase_iterations {
        if let BudgetStatus::Exhausted { reason } = manager.check_budget() {
            exit = LoopExit::BudgetExhausted { reason };
            break;
        }

        let iteration = manager.increment_iteration();
        iterations_used += 1;
        context = context.with_iteration(iteration).with_fresh_phase_outputs();
        params.recorder.session.log_event(
            "iteration_start",
            serde_json::json!({ "iteration": iteration, "mode": "simple" }),
        );
        let started = Instant::now();

        artisan.initialize(&context);
        let result = match artisan.execute().await {
            Ok(result) => result,
            Err(e) => {
                exit = LoopExit::ProviderError {
                    message: e.to_string(),
                };
                break;
            }
        };

        manager.record_cost(result.cost_usd);
        context = context.with_recorded_cost(result.cost_usd);
        agent_costs.artisan += result.cost_usd;

        if !result.success {
            let message = result
                .error_message()
                .unwrap_or("artisan produced unusable output")
                .to_string();
            tracing::warn!(iteration, %message, "Artisan output invalid; continuing");
            let record = error_record(
                iteration,
                message,
                result.cost_usd,
                started.elapsed().as_millis() as u64,
            );
            attempts.push(params.recorder.persist(&record).await);
            records.push(record);
            continue;
        }

        let output: ArtisanOutput = match serde_json::from_value(result.data.clone()) {
            Ok(output) => output,
            Err(e) => {
                let record = error_record(
                    iteration,
                    format!("artisan result malformed: {}", e),
                    result.cost_usd,
                    started.elapsed().as_millis() as u64,
                );
                attempts.push(params.recorder.persist(&record).await);
                records.push(record);
                continue;
            }
        };
        context = context.with_artisan_code(output.clone());

        if let Err(message) = write_code(&context, &output.code).await {
            let record = error_record(
                iteration,
                message,
                result.cost_usd,
                started.elapsed().as_millis() as u64,
            );
            attempts.push(params.recorder.persist(&record).await);
            records.push(record);
            continue;
        }

        let test_result = run_tests(
            &context.working_directory,
            &context.test_command,
            context.test_framework,
            params.test_timeout,
        )
        .await;
        context = context.with_test_result(test_result.clone());
        params
            .recorder
            .session
            .write_test_result(iteration, &test_result);

        let record = SimpleIterationRecord {
            iteration_index: iteration,
            code_change_summary: change_summary(&output),
            test_status: test_result.status,
            failed_tests: test_result.failed_tests.clone(),
            error_messages: test_result.error_messages.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd: result.cost_usd,
        };
        attempts.push(params.recorder.persist(&record).await);
        records.push(record);

        if test_result.passed() {
            tracing::info!(iteration, "Tests passed in simple mode");
            exit = LoopExit::Success;
            break;
        }

        if manager.should_reset_context() {
            artisan = Artisan::new(params.artisan_config.clone(), Arc::clone(&params.client));
        }
    }

    PhaseOutcome {
        context,
        records,
        attempts,
        iterations_used,
        cost_usd: manager.total_cost_usd() - phase_start_cost,
        agent_costs,
        exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStore;
    use crate::context::{RunBudget, TestFramework, TestStatus};
    use crate::engine::testing::{ScriptedClient, ScriptedReply};
    use crate::llm::Provider;
    use crate::session::SessionLog;
    use crate::tiers::TierMode;
    use std::path::PathBuf;
    use uuid::Uuid;

    const GOOD_FIX: &str =
        "Swapped + for *.\n```python\ndef multiply(a, b):\n    return a * b\n```";
    const BAD_FIX: &str =
        "Tried subtraction.\n```python\ndef multiply(a, b):\n    return a - b\n```";
    // Stands in for a real test suite: passes once the fix landed,
    // otherwise prints an assertion-style failure.
    const CHECK_FIX: &str =
        "grep -q 'a \\* b' math.py || { echo 'AssertionError: multiply is wrong' >&2; exit 1; }";

    fn artisan_config() -> AgentConfig {
        AgentConfig::new(Provider::OpenAi, "gpt-4o-mini", 0.2)
    }

    fn context_in(dir: &std::path::Path, test_command: &str) -> AgentContext {
        AgentContext::new(
            "make multiply multiply",
            Some(PathBuf::from("math.py")),
            dir.to_path_buf(),
            test_command,
            TestFramework::Custom,
            RunBudget::new(2.0, 15.0, 30),
        )
    }

    fn recorder<'a>(audit: &'a AuditStore, session: &'a SessionLog) -> AttemptRecorder<'a> {
        AttemptRecorder {
            run_id: Uuid::new_v4(),
            tier_index: 0,
            tier_name: "simple".to_string(),
            tier_mode: TierMode::Simple,
            model_artisan: "gpt-4o-mini".to_string(),
            model_librarian: None,
            model_critic: None,
            audit,
            session,
        }
    }

    #[tokio::test]
    async fn test_happy_path_stops_on_pass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "def multiply(a, b): return a + b").unwrap();

        let client = Arc::new(ScriptedClient::new(vec![
            ScriptedReply::content(BAD_FIX, 0.01),
            ScriptedReply::content(GOOD_FIX, 0.01),
        ]));
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let mut manager = IterationManager::new(30, 2.0, 15.0, 1, 3);

        let outcome = run_simple_phase(
            context_in(dir.path(), CHECK_FIX),
            &mut manager,
            SimplePhaseParams {
                phase_iterations: 5,
                artisan_config: artisan_config(),
                client,
                recorder: recorder(&audit, &session),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert!(outcome.success());
        assert_eq!(outcome.iterations_used, 2);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].test_status, TestStatus::Failed);
        assert_eq!(outcome.records[1].test_status, TestStatus::Passed);
        assert!((outcome.cost_usd - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "def multiply(a, b): return a + b").unwrap();

        // $0.04 per iteration against a $0.05 cap: two iterations run,
        // the third pre-check trips on cost.
        let client = Arc::new(ScriptedClient::repeating(BAD_FIX, 0.04));
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let mut manager = IterationManager::new(30, 0.05, 15.0, 1, 3);

        let outcome = run_simple_phase(
            context_in(dir.path(), "false"),
            &mut manager,
            SimplePhaseParams {
                phase_iterations: 5,
                artisan_config: artisan_config(),
                client,
                recorder: recorder(&audit, &session),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert_eq!(outcome.iterations_used, 2);
        match &outcome.exit {
            LoopExit::BudgetExhausted { reason } => assert!(reason.contains("cost")),
            other => panic!("expected budget exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_output_is_recorded_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "def multiply(a, b): return a + b").unwrap();

        let client = Arc::new(
            ScriptedClient::new(vec![ScriptedReply::content("  ", 0.01)])
                .with_default(ScriptedReply::content(GOOD_FIX, 0.01)),
        );
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let mut manager = IterationManager::new(30, 2.0, 15.0, 1, 3);

        let outcome = run_simple_phase(
            context_in(dir.path(), CHECK_FIX),
            &mut manager,
            SimplePhaseParams {
                phase_iterations: 5,
                artisan_config: artisan_config(),
                client,
                recorder: recorder(&audit, &session),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert!(outcome.success());
        assert_eq!(outcome.records[0].test_status, TestStatus::Error);
        // Even the wasted call is accounted for.
        assert!(outcome.records[0].cost_usd > 0.0);
    }

    #[tokio::test]
    async fn test_provider_error_ends_phase() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "x").unwrap();

        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::ProviderError(
            "upstream 503".to_string(),
        )]));
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let mut manager = IterationManager::new(30, 2.0, 15.0, 1, 3);

        let outcome = run_simple_phase(
            context_in(dir.path(), "false"),
            &mut manager,
            SimplePhaseParams {
                phase_iterations: 5,
                artisan_config: artisan_config(),
                client,
                recorder: recorder(&audit, &session),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert!(matches!(outcome.exit, LoopExit::ProviderError { .. }));
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_counter_matches_record_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "x").unwrap();

        let client = Arc::new(ScriptedClient::repeating(BAD_FIX, 0.001));
        let audit = AuditStore::disabled();
        let session = SessionLog::disabled();
        let mut manager = IterationManager::new(30, 2.0, 15.0, 1, 3);

        let outcome = run_simple_phase(
            context_in(dir.path(), "false"),
            &mut manager,
            SimplePhaseParams {
                phase_iterations: 5,
                artisan_config: artisan_config(),
                client,
                recorder: recorder(&audit, &session),
                test_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert_eq!(outcome.exit, LoopExit::IterationsExhausted);
        assert_eq!(manager.iteration() as usize, outcome.records.len());
        assert_eq!(outcome.records.len(), 5);
    }
}
