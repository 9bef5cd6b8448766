//! Full-mode loop: Librarian, Artisan, Critic, test runner, entropy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::{Agent, AgentConfig, Artisan, Critic, Librarian};
use crate::context::{AgentContext, ArtisanOutput, CriticReview, LibrarianReport};
use crate::iteration::{BudgetStatus, IterationManager};
use crate::llm::CompletionClient;
use crate::records::SimpleIterationRecord;
use crate::runner::run_tests;

use super::{
    change_summary, error_record, write_code, AgentCostBreakdown, AttemptRecorder, LoopExit,
    PhaseOutcome,
};

pub struct FullPhaseParams<'a> {
    /// Iteration budget for this phase (not the whole run).
    pub phase_iterations: u32,
    pub librarian_config: AgentConfig,
    pub artisan_config: AgentConfig,
    pub critic_config: AgentConfig,
    pub client: Arc<dyn CompletionClient>,
    pub recorder: AttemptRecorder<'a>,
    pub test_timeout: Duration,
}

struct FullAgents {
    librarian: Librarian,
    artisan: Artisan,
    critic: Critic,
}

impl FullAgents {
    fn build(params: &FullPhaseParams<'_>) -> Self {
        Self {
            librarian: Librarian::new(params.librarian_config.clone(), Arc::clone(&params.client)),
            artisan: Artisan::new(params.artisan_config.clone(), Arc::clone(&params.client)),
            critic: Critic::new(params.critic_config.clone(), Arc::clone(&params.client)),
        }
    }
}

/// Run up to `phase_iterations` Librarian → Artisan → Critic attempts.
///
/// The context may carry an escalation summary from a failed simple
/// phase or earlier tiers; the Librarian puts it at the top of its
/// prompt. Test failures feed the entropy detector; three identical
/// normalized signatures in a row abort the phase.
pub async fn run_full_phase(
    context: AgentContext,
    manager: &mut IterationManager,
    params: FullPhaseParams<'_>,
) -> PhaseOutcome {
    let mut context = context;
    let mut records: Vec<SimpleIterationRecord> = Vec::new();
    let mut attempts = Vec::new();
    let mut exit = LoopExit::IterationsExhausted;
    let phase_start_cost = manager.total_cost_usd();
    let mut iterations_used = 0;
    let mut agent_costs = AgentCostBreakdown::default();

    let mut agents = FullAgents::build(&params);

    'iterations: for _ in 0..params.phase_iterations {
        if let BudgetStatus::Exhausted { reason } = manager.check_budget() {
            exit = LoopExit::BudgetExhausted { reason };
            break;
        }

        let iteration = manager.increment_iteration();
        iterations_used += 1;
        context = context.with_iteration(iteration).with_fresh_phase_outputs();
        params.recorder.session.log_event(
            "iteration_start",
            serde_json::json!({ "iteration": iteration, "mode": "full" }),
        );
        let started = Instant::now();
        let mut iteration_cost = 0.0;

        // Librarian
        agents.librarian.initialize(&context);
        let librarian_result = match agents.librarian.execute().await {
            Ok(result) => result,
            Err(e) => {
                exit = LoopExit::ProviderError {
                    message: e.to_string(),
                };
                break;
            }
        };
        manager.record_cost(librarian_result.cost_usd);
        context = context.with_recorded_cost(librarian_result.cost_usd);
        iteration_cost += librarian_result.cost_usd;
        agent_costs.librarian += librarian_result.cost_usd;

        if librarian_result.success {
            if let Ok(report) =
                serde_json::from_value::<LibrarianReport>(librarian_result.data.clone())
            {
                context = context.with_librarian_context(report);
            }
        } else {
            // Degraded iteration: the Artisan can still work from the
            // raw target file, so record the problem and press on.
            tracing::warn!(
                iteration,
                error = librarian_result.error_message().unwrap_or("unknown"),
                "Librarian output invalid; continuing without codebase context"
            );
        }

        // Artisan
        agents.artisan.initialize(&context);
        let artisan_result = match agents.artisan.execute().await {
            Ok(result) => result,
            Err(e) => {
                exit = LoopExit::ProviderError {
                    message: e.to_string(),
                };
                break;
            }
        };
        manager.record_cost(artisan_result.cost_usd);
        context = context.with_recorded_cost(artisan_result.cost_usd);
        iteration_cost += artisan_result.cost_usd;
        agent_costs.artisan += artisan_result.cost_usd;

        if !artisan_result.success {
            let message = artisan_result
                .error_message()
                .unwrap_or("artisan produced unusable output")
                .to_string();
            tracing::warn!(iteration, %message, "Artisan output invalid; continuing");
            let record = error_record(
                iteration,
                message.clone(),
                iteration_cost,
                started.elapsed().as_millis() as u64,
            );
            attempts.push(params.recorder.persist(&record).await);
            records.push(record);
            // Loop errors count toward entropy like any other failure.
            if manager.track_error(&message) {
                exit = LoopExit::EntropyDetected;
                break;
            }
            continue;
        }

        let output: ArtisanOutput = match serde_json::from_value(artisan_result.data.clone()) {
            Ok(output) => output,
            Err(e) => {
                let message = format!("artisan result malformed: {}", e);
                let record = error_record(
                    iteration,
                    message.clone(),
                    iteration_cost,
                    started.elapsed().as_millis() as u64,
                );
                attempts.push(params.recorder.persist(&record).await);
                records.push(record);
                if manager.track_error(&message) {
                    exit = LoopExit::EntropyDetected;
                    break;
                }
                continue;
            }
        };
        context = context.with_artisan_code(output.clone());

        if let Err(message) = write_code(&context, &output.code).await {
            let record = error_record(
                iteration,
                message.clone(),
                iteration_cost,
                started.elapsed().as_millis() as u64,
            );
            attempts.push(params.recorder.persist(&record).await);
            records.push(record);
            if manager.track_error(&message) {
                exit = LoopExit::EntropyDetected;
                break;
            }
            continue;
        }

        // Critic. A rejection is recorded, never blocking; an unusable
        // review just means the iteration goes unreviewed.
        agents.critic.initialize(&context);
        match agents.critic.execute().await {
            Ok(critic_result) => {
                manager.record_cost(critic_result.cost_usd);
                context = context.with_recorded_cost(critic_result.cost_usd);
                iteration_cost += critic_result.cost_usd;
                agent_costs.critic += critic_result.cost_usd;
                if critic_result.success {
                    if let Ok(review) =
                        serde_json::from_value::<CriticReview>(critic_result.data.clone())
                    {
                        if !review.approved {
                            tracing::info!(iteration, critique = %review.critique, "Critic rejected the change");
                        }
                        context = context.with_critic_review(review);
                    }
                } else {
                    tracing::warn!(
                        iteration,
                        error = critic_result.error_message().unwrap_or("unknown"),
                        "Critic output invalid; iteration goes unreviewed"
                    );
                }
            }
            Err(e) => {
                exit = LoopExit::ProviderError {
                    message: e.to_string(),
                };
                break 'iterations;
            }
        }

        // Tests
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
        params.recorder.session.write_checkpoint(iteration, &context);

        let record = SimpleIterationRecord {
            iteration_index: iteration,
            code_change_summary: change_summary(&output),
            test_status: test_result.status,
            failed_tests: test_result.failed_tests.clone(),
            error_messages: test_result.error_messages.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd: iteration_cost,
        };
        attempts.push(params.recorder.persist(&record).await);
        records.push(record);

        if test_result.passed() {
            tracing::info!(iteration, "Tests passed in full mode");
            exit = LoopExit::Success;
            break;
        }

        // One signature per iteration: identical failures across
        // iterations trip the breaker, varying ones reset it.
        if !test_result.error_messages.is_empty()
            && manager.track_error(&test_result.error_messages.join("\n"))
        {
            exit = LoopExit::EntropyDetected;
            break;
        }

        if manager.should_reset_context() {
            agents = FullAgents::build(&params);
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
