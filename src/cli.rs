//! Command-line interface.
//!
//! `ralph run <target>` drives the fix loop. The target is either a
//! source file (the objective is inferred) or a free-text objective.
//! Everything else has a config-file or built-in default.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::context::TestFramework;
use crate::orchestrator::RunOptions;
use crate::runner::DEFAULT_TEST_TIMEOUT;
use crate::tiers::TierEscalationConfig;

#[derive(Parser)]
#[command(name = "ralph")]
#[command(about = "Autonomous test-driven code-fixing agent")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (debug-level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fix code until the tests pass, a budget runs out, or the loop
    /// gets stuck
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the source file to fix, or a free-text objective
    pub target: String,

    /// What to achieve (inferred from the target file when omitted)
    #[arg(long)]
    pub objective: Option<String>,

    /// Test command to run each iteration
    #[arg(long)]
    pub test: Option<String>,

    /// Test framework tag (vitest, jest, pytest, mocha, rspec, cargo, custom)
    #[arg(long)]
    pub framework: Option<String>,

    /// Maximum iterations across all phases
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Maximum spend in USD
    #[arg(long)]
    pub max_budget: Option<f64>,

    /// Maximum wall-clock duration in minutes
    #[arg(long)]
    pub max_duration: Option<f64>,

    /// Librarian model override (provider/model or bare model)
    #[arg(long)]
    pub librarian: Option<String>,

    /// Artisan model override (provider/model or bare model)
    #[arg(long)]
    pub artisan: Option<String>,

    /// Critic model override (provider/model or bare model)
    #[arg(long)]
    pub critic: Option<String>,

    /// Chaos model override (provider/model or bare model)
    #[arg(long)]
    pub chaos: Option<String>,

    /// Skip out-of-band adversarial testing
    #[arg(long)]
    pub no_adversarial: bool,

    /// Destroy agent state every N iterations (1 = every iteration)
    #[arg(long)]
    pub reset_frequency: Option<u32>,

    /// Simple-mode iteration budget before escalation
    #[arg(long, value_name = "N")]
    pub simple: Option<u32>,

    /// Never escalate from simple mode to full mode
    #[arg(long)]
    pub no_escalate: bool,

    /// Skip simple mode and go straight to full mode
    #[arg(long)]
    pub full: bool,

    /// Tier escalation config file (overrides the two-phase flags)
    #[arg(long, value_name = "PATH")]
    pub tier_config: Option<PathBuf>,

    /// Skip test-file generation for targets without tests
    #[arg(long)]
    pub no_generate: bool,

    /// Project config file (auto-discovered when omitted)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    /// Resolve CLI arguments against the project config into the full
    /// option set the orchestrator consumes.
    pub fn into_options(self, config: Config, cwd: PathBuf) -> anyhow::Result<RunOptions> {
        let mut models = config.models.clone();
        if let Some(raw) = &self.librarian {
            models.librarian.apply_override(raw).map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = &self.artisan {
            models.artisan.apply_override(raw).map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = &self.critic {
            models.critic.apply_override(raw).map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = &self.chaos {
            models.chaos.apply_override(raw).map_err(anyhow::Error::msg)?;
        }

        // A target that names an existing file is a target file; anything
        // else is treated as a free-text objective over the working dir.
        let target_path = cwd.join(&self.target);
        let (target_file, objective) = if target_path.is_file() {
            let objective = self.objective.clone().unwrap_or_else(|| {
                format!("Make the test suite pass for {}", self.target)
            });
            (Some(PathBuf::from(&self.target)), objective)
        } else {
            let objective = self.objective.clone().unwrap_or_else(|| self.target.clone());
            (None, objective)
        };

        let framework = match &self.framework {
            Some(tag) => tag.parse::<TestFramework>().map_err(anyhow::Error::msg)?,
            None => config.testing.framework,
        };

        // The tier config wins over the two-phase flags; combining them
        // is accepted with a warning.
        let tier_config_path = self.tier_config.clone().or(config.tier_config_file.clone());
        let tier_config = match &tier_config_path {
            Some(path) => {
                if self.simple.is_some() || self.no_escalate || self.full {
                    tracing::warn!(
                        "--simple/--no-escalate/--full are ignored because a tier config is active"
                    );
                }
                Some(TierEscalationConfig::load(path)?)
            }
            None => None,
        };

        let audit_db_path = tier_config
            .as_ref()
            .and_then(|config| config.audit_db_path.clone())
            .unwrap_or_else(|| cwd.join(".ralph").join("audit.db"));

        Ok(RunOptions {
            objective,
            target_file,
            working_directory: cwd,
            test_command: self
                .test
                .clone()
                .unwrap_or_else(|| config.testing.default_command.clone()),
            test_framework: framework,
            max_iterations: self.max_iterations.unwrap_or(config.budgets.max_iterations),
            max_budget_usd: self.max_budget.unwrap_or(config.budgets.max_cost_usd),
            max_duration_minutes: self
                .max_duration
                .unwrap_or(config.budgets.max_duration_minutes),
            simple_iterations: self.simple.unwrap_or(5),
            no_escalate: self.no_escalate,
            full_mode: self.full,
            tier_config,
            tier_config_path,
            adversarial: config.testing.adversarial_tests && !self.no_adversarial,
            generate: !self.no_generate,
            reset_frequency: self
                .reset_frequency
                .unwrap_or(config.memory.context_reset_frequency),
            entropy_threshold: config.entropy.threshold,
            models,
            audit_db_path,
            test_timeout: DEFAULT_TEST_TIMEOUT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    fn bare_args(target: &str) -> RunArgs {
        RunArgs {
            target: target.to_string(),
            objective: None,
            test: None,
            framework: None,
            max_iterations: None,
            max_budget: None,
            max_duration: None,
            librarian: None,
            artisan: None,
            critic: None,
            chaos: None,
            no_adversarial: false,
            reset_frequency: None,
            simple: None,
            no_escalate: false,
            full: false,
            tier_config: None,
            no_generate: false,
            config: None,
        }
    }

    #[test]
    fn test_existing_file_becomes_target() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("math.py"), "").unwrap();

        let options = bare_args("math.py")
            .into_options(Config::default(), dir.path().to_path_buf())
            .unwrap();
        assert_eq!(options.target_file, Some(PathBuf::from("math.py")));
        assert!(options.objective.contains("math.py"));
        assert_eq!(options.max_iterations, 30);
        assert!((options.max_budget_usd - 2.0).abs() < 1e-9);
        assert_eq!(options.simple_iterations, 5);
    }

    #[test]
    fn test_free_text_target_becomes_objective() {
        let dir = tempfile::tempdir().unwrap();
        let options = bare_args("make the parser handle empty input")
            .into_options(Config::default(), dir.path().to_path_buf())
            .unwrap();
        assert!(options.target_file.is_none());
        assert_eq!(options.objective, "make the parser handle empty input");
    }

    #[test]
    fn test_model_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = bare_args("whatever");
        args.artisan = Some("openai/gpt-4o".to_string());

        let options = args
            .into_options(Config::default(), dir.path().to_path_buf())
            .unwrap();
        assert_eq!(options.models.artisan.provider, Provider::OpenAi);
        assert_eq!(options.models.artisan.model, "gpt-4o");
    }

    #[test]
    fn test_invalid_framework_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = bare_args("whatever");
        args.framework = Some("junit".to_string());
        assert!(args
            .into_options(Config::default(), dir.path().to_path_buf())
            .is_err());
    }
}
