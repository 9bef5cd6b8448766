//! Run wiring: config in, loops driven, report out.
//!
//! The orchestrator owns everything with a lifetime longer than one
//! phase: the provider router, the iteration manager, the audit store
//! and the session log. Phases receive narrow parameter bundles and
//! return outcomes; nothing holds a back-pointer to the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditStore, RunOutcome};
use crate::config::ModelsConfig;
use crate::context::{AgentContext, RunBudget, TestFramework};
use crate::engine::{
    run_full_phase, run_simple_phase, run_tier_escalation, AgentCostBreakdown, AttemptRecorder,
    FullPhaseParams, SimplePhaseParams, TierEngineParams,
};
use crate::iteration::IterationManager;
use crate::llm::{CompletionClient, ProviderRouter};
use crate::records::SimpleIterationRecord;
use crate::report::{print_report, PhaseReport, RunReport};
use crate::session::SessionLog;
use crate::summary::build_failure_summary;
use crate::tiers::TierEscalationConfig;

/// Everything a run needs, resolved from config + CLI by the caller.
pub struct RunOptions {
    pub objective: String,
    /// Workspace-relative path; absent means "any files in working dir".
    pub target_file: Option<PathBuf>,
    pub working_directory: PathBuf,
    pub test_command: String,
    pub test_framework: TestFramework,
    pub max_iterations: u32,
    pub max_budget_usd: f64,
    pub max_duration_minutes: f64,
    pub simple_iterations: u32,
    pub no_escalate: bool,
    pub full_mode: bool,
    pub tier_config: Option<TierEscalationConfig>,
    pub tier_config_path: Option<PathBuf>,
    pub adversarial: bool,
    pub generate: bool,
    pub reset_frequency: u32,
    pub entropy_threshold: u32,
    pub models: ModelsConfig,
    pub audit_db_path: PathBuf,
    pub test_timeout: Duration,
}

pub struct Orchestrator {
    options: RunOptions,
    client: Arc<dyn CompletionClient>,
}

impl Orchestrator {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            client: Arc::new(ProviderRouter::new()),
        }
    }

    /// Swap the provider router out (tests inject scripted clients).
    pub fn with_client(options: RunOptions, client: Arc<dyn CompletionClient>) -> Self {
        Self { options, client }
    }

    /// Run to completion, print the report, return the process exit code.
    pub async fn run(self) -> i32 {
        let options = &self.options;

        let context = AgentContext::new(
            options.objective.clone(),
            options.target_file.clone(),
            options.working_directory.clone(),
            options.test_command.clone(),
            options.test_framework,
            RunBudget::new(
                options.max_budget_usd,
                options.max_duration_minutes,
                options.max_iterations,
            ),
        );
        let run_id = context.session_id;

        let session = SessionLog::create(&options.working_directory, run_id);
        let audit = AuditStore::open(&options.audit_db_path).await;
        audit
            .write_run_metadata(
                run_id,
                &options.objective,
                &options.working_directory,
                &options.test_command,
                options.tier_config_path.as_deref(),
            )
            .await;
        session.log_event(
            "run_start",
            serde_json::json!({
                "objective": options.objective,
                "test_command": options.test_command,
                "framework": options.test_framework.to_string(),
            }),
        );

        self.preflight();

        // Iteration/cost/duration envelope for the whole run; tier
        // configs may widen the iteration count and override the caps.
        let mut manager = match &options.tier_config {
            Some(config) => IterationManager::new(
                config.tiers.iter().map(|t| t.max_iterations).sum(),
                config.max_total_cost_usd.unwrap_or(options.max_budget_usd),
                config
                    .max_total_duration_minutes
                    .unwrap_or(options.max_duration_minutes),
                options.reset_frequency,
                options.entropy_threshold,
            ),
            None => IterationManager::new(
                options.max_iterations,
                options.max_budget_usd,
                options.max_duration_minutes,
                options.reset_frequency,
                options.entropy_threshold,
            ),
        };

        let report = tokio::select! {
            report = self.drive(context, &mut manager, &audit, &session) => report,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupt received; shutting down");
                Self::interrupted_report()
            }
        };

        let outcome = if report.success {
            RunOutcome::Success
        } else if report.terminal_status.starts_with("budget_exceeded") {
            RunOutcome::BudgetExhausted
        } else {
            RunOutcome::Failed
        };
        audit
            .update_run_metadata(
                run_id,
                outcome,
                report.success.then(|| report.ended_phase.as_str()),
                Some(report.total_iterations),
            )
            .await;
        audit.close().await;
        session.log_event(
            "run_end",
            serde_json::json!({
                "status": report.terminal_status,
                "iterations": report.total_iterations,
                "cost_usd": report.total_cost_usd,
            }),
        );

        print_report(&report);
        report.exit_code()
    }

    /// Non-fatal startup notices.
    fn preflight(&self) {
        let options = &self.options;

        if options.generate {
            if options.test_framework == TestFramework::Cargo {
                // Rust keeps tests in-file; external generation is
                // intentionally skipped for this target.
                tracing::debug!("Skipping test-file check for cargo targets");
            } else if let Some(target) = &options.target_file {
                if !has_test_file(&options.working_directory, target) {
                    tracing::info!(
                        target = %target.display(),
                        "No test file found for target; generation is delegated to the external test generator"
                    );
                }
            }
        }

        if options.adversarial {
            tracing::info!(
                "Adversarial testing runs out-of-band; its results are informational and never feed the entropy breaker"
            );
        }
    }

    async fn drive(
        &self,
        context: AgentContext,
        manager: &mut IterationManager,
        audit: &AuditStore,
        session: &SessionLog,
    ) -> RunReport {
        match &self.options.tier_config {
            Some(config) => self.drive_tiered(context, manager, audit, session, config).await,
            None => self.drive_two_phase(context, manager, audit, session).await,
        }
    }

    async fn drive_two_phase(
        &self,
        context: AgentContext,
        manager: &mut IterationManager,
        audit: &AuditStore,
        session: &SessionLog,
    ) -> RunReport {
        let options = &self.options;
        let run_id = context.session_id;
        let mut phases: Vec<PhaseReport> = Vec::new();
        let mut agent_costs = AgentCostBreakdown::default();
        let mut escalated = false;
        let mut context = context;

        // Phase A: simple mode (skipped with --full).
        if !options.full_mode {
            let recorder = AttemptRecorder {
                run_id,
                tier_index: 0,
                tier_name: "simple".to_string(),
                tier_mode: crate::tiers::TierMode::Simple,
                model_artisan: options.models.artisan.model.clone(),
                model_librarian: None,
                model_critic: None,
                audit,
                session,
            };
            let outcome = run_simple_phase(
                context,
                manager,
                SimplePhaseParams {
                    phase_iterations: options.simple_iterations.min(options.max_iterations),
                    artisan_config: options.models.artisan.agent_config(),
                    client: Arc::clone(&self.client),
                    recorder,
                    test_timeout: options.test_timeout,
                },
            )
            .await;

            phases.push(PhaseReport::new(
                "simple",
                outcome.iterations_used,
                outcome.cost_usd,
                &record_errors(&outcome.records),
            ));
            agent_costs.merge(&outcome.agent_costs);

            if outcome.exit.is_terminal() || options.no_escalate {
                return finish_report(
                    outcome.exit.is_success(),
                    if options.no_escalate && !outcome.exit.is_terminal() {
                        "iterations_exhausted (escalation disabled)".to_string()
                    } else {
                        outcome.exit.to_string()
                    },
                    "Simple only".to_string(),
                    "simple".to_string(),
                    phases,
                    manager,
                    agent_costs,
                );
            }

            // Phase B: escalation gate. Compress the failed attempts and
            // hand the history to full mode through the context.
            let summary = build_failure_summary(&outcome.records);
            tracing::info!(
                iterations = summary.total_iterations,
                unique_errors = summary.unique_error_signatures.len(),
                "Escalating to full mode with compressed failure history"
            );
            session.log_event(
                "escalation",
                serde_json::json!({
                    "iterations": summary.total_iterations,
                    "summary_chars": summary.natural_language_summary.len(),
                }),
            );
            context = outcome
                .context
                .with_escalation_context(summary.natural_language_summary.clone());
            escalated = true;
        }

        // Phase C: full mode with whatever iteration budget remains.
        let remaining = options.max_iterations.saturating_sub(manager.iteration());
        if remaining == 0 {
            return finish_report(
                false,
                "iterations_exhausted".to_string(),
                mode_label(options.full_mode, escalated),
                "simple".to_string(),
                phases,
                manager,
                agent_costs,
            );
        }

        let recorder = AttemptRecorder {
            run_id,
            tier_index: 1,
            tier_name: "full".to_string(),
            tier_mode: crate::tiers::TierMode::Full,
            model_artisan: options.models.artisan.model.clone(),
            model_librarian: Some(options.models.librarian.model.clone()),
            model_critic: Some(options.models.critic.model.clone()),
            audit,
            session,
        };
        let outcome = run_full_phase(
            context,
            manager,
            FullPhaseParams {
                phase_iterations: remaining,
                librarian_config: options.models.librarian.agent_config(),
                artisan_config: options.models.artisan.agent_config(),
                critic_config: options.models.critic.agent_config(),
                client: Arc::clone(&self.client),
                recorder,
                test_timeout: options.test_timeout,
            },
        )
        .await;

        phases.push(PhaseReport::new(
            "full",
            outcome.iterations_used,
            outcome.cost_usd,
            &record_errors(&outcome.records),
        ));
        agent_costs.merge(&outcome.agent_costs);

        finish_report(
            outcome.exit.is_success(),
            outcome.exit.to_string(),
            mode_label(options.full_mode, escalated),
            "full".to_string(),
            phases,
            manager,
            agent_costs,
        )
    }

    async fn drive_tiered(
        &self,
        context: AgentContext,
        manager: &mut IterationManager,
        audit: &AuditStore,
        session: &SessionLog,
        config: &TierEscalationConfig,
    ) -> RunReport {
        let options = &self.options;
        let run_id = context.session_id;

        let outcome = run_tier_escalation(
            context,
            manager,
            TierEngineParams {
                config,
                default_librarian: options.models.librarian.agent_config(),
                default_critic: options.models.critic.agent_config(),
                client: Arc::clone(&self.client),
                audit,
                session,
                run_id,
                test_timeout: options.test_timeout,
            },
        )
        .await;

        let phases: Vec<PhaseReport> = outcome
            .results
            .iter()
            .map(|result| {
                let errors: Vec<String> = result
                    .records
                    .iter()
                    .flat_map(|record| record.error_messages.iter().cloned())
                    .collect();
                PhaseReport::new(
                    result.tier_name.clone(),
                    result.iterations_ran,
                    result.total_cost_usd,
                    &errors,
                )
            })
            .collect();

        let ended_phase = outcome
            .resolved_tier()
            .map(|tier| tier.tier_name.clone())
            .or_else(|| outcome.results.last().map(|r| r.tier_name.clone()))
            .unwrap_or_else(|| "(no tiers ran)".to_string());

        let terminal_status = if outcome.success() {
            "success".to_string()
        } else {
            outcome.final_exit.to_string()
        };

        finish_report(
            outcome.success(),
            terminal_status,
            format!("Tiered ({} tiers)", config.tiers.len()),
            ended_phase,
            phases,
            manager,
            outcome.agent_costs,
        )
    }

    fn interrupted_report() -> RunReport {
        RunReport {
            success: false,
            mode: "(interrupted)".to_string(),
            terminal_status: "interrupted".to_string(),
            ended_phase: "(interrupted)".to_string(),
            phases: Vec::new(),
            total_iterations: 0,
            total_cost_usd: 0.0,
            agent_costs: AgentCostBreakdown::default(),
            interrupted: true,
        }
    }
}

fn mode_label(full_mode: bool, escalated: bool) -> String {
    if full_mode {
        "Full only".to_string()
    } else if escalated {
        "Simple -> Full (escalated)".to_string()
    } else {
        "Simple only".to_string()
    }
}

fn record_errors(records: &[SimpleIterationRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|record| record.error_messages.iter().cloned())
        .collect()
}

fn finish_report(
    success: bool,
    terminal_status: String,
    mode: String,
    ended_phase: String,
    phases: Vec<PhaseReport>,
    manager: &IterationManager,
    agent_costs: AgentCostBreakdown,
) -> RunReport {
    RunReport {
        success,
        mode,
        terminal_status,
        ended_phase,
        phases,
        total_iterations: manager.iteration(),
        total_cost_usd: manager.total_cost_usd(),
        agent_costs,
        interrupted: false,
    }
}

/// Look for a conventional test file next to (or below) the target.
fn has_test_file(working_dir: &Path, target: &Path) -> bool {
    let Some(stem) = target.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let parent = target.parent().unwrap_or_else(|| Path::new(""));

    let candidates = [
        // pytest
        format!("test_{}.py", stem),
        format!("{}_test.py", stem),
        format!("tests/test_{}.py", stem),
        // vitest / jest / mocha
        format!("{}.test.ts", stem),
        format!("{}.test.js", stem),
        format!("{}.spec.ts", stem),
        format!("{}.spec.js", stem),
        format!("__tests__/{}.test.ts", stem),
        format!("__tests__/{}.test.js", stem),
        // rspec
        format!("{}_spec.rb", stem),
        format!("spec/{}_spec.rb", stem),
    ];

    candidates.iter().any(|candidate| {
        working_dir.join(parent).join(candidate).is_file()
            || working_dir.join(candidate).is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_test_file_finds_pytest_sibling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "").unwrap();
        std::fs::write(dir.path().join("test_math.py"), "").unwrap();
        assert!(has_test_file(dir.path(), Path::new("math.py")));
        assert!(!has_test_file(dir.path(), Path::new("other.py")));
    }

    #[test]
    fn test_mode_labels() {
        assert_eq!(mode_label(true, false), "Full only");
        assert_eq!(mode_label(false, true), "Simple -> Full (escalated)");
        assert_eq!(mode_label(false, false), "Simple only");
    }
}
