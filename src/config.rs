//! Project configuration.
//!
//! Configuration comes from `ralph.yml`, auto-discovered by ascending
//! from the working directory to the VCS root (`.git` marker), with
//! built-in defaults for everything. Validation reports every problem at
//! once; a bad config is fatal at startup.
//!
//! API keys are environment-only and are checked by the provider router
//! when a provider is actually used:
//! - `ANTHROPIC_API_KEY`, `GOOGLE_API_KEY`, `OPENAI_API_KEY`, `HF_API_KEY`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::AgentConfig;
use crate::context::TestFramework;
use crate::llm::Provider;

/// Config file name searched for during discovery.
pub const CONFIG_FILE_NAME: &str = "ralph.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration:\n{}", issues.join("\n"))]
    Invalid { issues: Vec<String> },
}

/// One role's model assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.2
}

impl ModelConfig {
    fn new(provider: Provider, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            temperature: default_temperature(),
        }
    }

    /// Apply a CLI override of the form `provider/model` or bare `model`.
    pub fn apply_override(&mut self, raw: &str) -> Result<(), String> {
        match raw.split_once('/') {
            Some((provider, model)) if !model.is_empty() => {
                self.provider = provider.parse()?;
                self.model = model.to_string();
                Ok(())
            }
            Some(_) => Err(format!("invalid model override '{}'", raw)),
            None => {
                self.model = raw.to_string();
                Ok(())
            }
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::new(self.provider, self.model.clone(), self.temperature)
    }
}

/// Per-role model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub librarian: ModelConfig,
    pub artisan: ModelConfig,
    pub critic: ModelConfig,
    pub chaos: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            librarian: ModelConfig::new(Provider::Google, "gemini-2.0-flash"),
            artisan: ModelConfig::new(Provider::Anthropic, "claude-sonnet-4"),
            critic: ModelConfig::new(Provider::Anthropic, "claude-3-5-haiku"),
            chaos: ModelConfig::new(Provider::OpenAi, "gpt-4o-mini"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetsConfig {
    pub max_iterations: u32,
    pub max_cost_usd: f64,
    pub max_duration_minutes: f64,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            max_cost_usd: 2.0,
            max_duration_minutes: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    pub default_command: String,
    pub framework: TestFramework,
    pub adversarial_tests: bool,
    pub coverage_threshold: f64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            default_command: "npm test".to_string(),
            framework: TestFramework::Vitest,
            adversarial_tests: true,
            coverage_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub context_reset_frequency: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_reset_frequency: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    pub threshold: u32,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub budgets: BudgetsConfig,
    pub testing: TestingConfig,
    pub memory: MemoryConfig,
    pub entropy: EntropyConfig,
    pub tier_config_file: Option<PathBuf>,
}

impl Config {
    /// Load a specific config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Walk from `start_dir` up to the VCS root looking for
    /// [`CONFIG_FILE_NAME`]; fall back to built-in defaults.
    pub fn discover(start_dir: &Path) -> Result<Self, ConfigError> {
        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Using discovered config");
                return Self::load(&candidate);
            }
            // The VCS root is the last directory searched.
            if current.join(".git").exists() {
                break;
            }
            dir = current.parent();
        }
        Ok(Self::default())
    }

    /// Surface every invalid value at once, each with a fix hint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.budgets.max_iterations == 0 {
            issues.push(
                "budgets.max_iterations: must be at least 1 -> Fix: set a positive iteration limit"
                    .to_string(),
            );
        }
        if self.budgets.max_cost_usd <= 0.0 {
            issues.push(
                "budgets.max_cost_usd: must be positive -> Fix: set a positive dollar budget"
                    .to_string(),
            );
        }
        if self.budgets.max_duration_minutes <= 0.0 {
            issues.push(
                "budgets.max_duration_minutes: must be positive -> Fix: set a positive duration"
                    .to_string(),
            );
        }
        if self.testing.default_command.trim().is_empty() {
            issues.push(
                "testing.default_command: must not be empty -> Fix: set the test command to run"
                    .to_string(),
            );
        }
        if !(0.0..=1.0).contains(&self.testing.coverage_threshold) {
            issues.push(format!(
                "testing.coverage_threshold: {} out of range -> Fix: use a fraction between 0 and 1",
                self.testing.coverage_threshold
            ));
        }
        if self.memory.context_reset_frequency == 0 {
            issues.push(
                "memory.context_reset_frequency: must be at least 1 -> Fix: use 1 to reset every iteration"
                    .to_string(),
            );
        }
        if self.entropy.threshold == 0 {
            issues.push(
                "entropy.threshold: must be at least 1 -> Fix: use the default of 3"
                    .to_string(),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_discovery_ascends_to_vcs_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "budgets:\n  max_iterations: 7\n",
        )
        .unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::discover(&nested).unwrap();
        assert_eq!(config.budgets.max_iterations, 7);
        // Untouched sections keep defaults.
        assert_eq!(config.entropy.threshold, 3);
    }

    #[test]
    fn test_discovery_stops_at_vcs_root() {
        let dir = tempfile::tempdir().unwrap();
        // Config above the repo root must not be picked up.
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "budgets:\n  max_iterations: 9\n",
        )
        .unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();

        let config = Config::discover(&repo).unwrap();
        assert_eq!(config.budgets.max_iterations, 30);
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = Config::default();
        config.budgets.max_iterations = 0;
        config.budgets.max_cost_usd = -1.0;
        config.testing.coverage_threshold = 2.0;
        config.entropy.threshold = 0;

        let err = config.validate().unwrap_err();
        let ConfigError::Invalid { issues } = err else {
            panic!("expected Invalid");
        };
        assert_eq!(issues.len(), 4);
        assert!(issues.iter().all(|issue| issue.contains("-> Fix:")));
    }

    #[test]
    fn test_model_override_parsing() {
        let mut model = ModelConfig::new(Provider::OpenAi, "gpt-4o-mini");
        model.apply_override("anthropic/claude-sonnet-4").unwrap();
        assert_eq!(model.provider, Provider::Anthropic);
        assert_eq!(model.model, "claude-sonnet-4");

        model.apply_override("gpt-4o").unwrap();
        assert_eq!(model.provider, Provider::Anthropic);
        assert_eq!(model.model, "gpt-4o");

        assert!(model.apply_override("weird/").is_err());
    }
}
