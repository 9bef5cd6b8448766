//! Tier escalation configuration.
//!
//! A tier config file replaces the built-in two-phase behavior with an
//! arbitrary chain of model configurations. Validation collects every
//! problem in the file and reports them together with remediation hints
//! — a config author should never have to fix errors one resubmit at a
//! time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::Provider;

/// Loop semantics a tier runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierMode {
    Simple,
    Full,
}

impl std::fmt::Display for TierMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// One model assignment inside a tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Model set for a tier. Artisan is mandatory; librarian/critic default
/// to the run-level configuration when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    pub artisan: ModelSpec,
    pub librarian: Option<ModelSpec>,
    pub critic: Option<ModelSpec>,
}

/// One tier definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub mode: TierMode,
    pub max_iterations: u32,
    pub models: TierModels,
}

/// Whole escalation chain plus optional global caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierEscalationConfig {
    pub tiers: Vec<TierConfig>,
    pub max_total_cost_usd: Option<f64>,
    pub max_total_duration_minutes: Option<f64>,
    pub audit_db_path: Option<PathBuf>,
}

/// Tier config loading/validation errors.
#[derive(Debug, Error)]
pub enum TierConfigError {
    #[error("cannot read tier config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tier config {path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Every schema violation found, each with a fix hint.
    #[error("invalid tier config:\n{}", issues.join("\n"))]
    Invalid { issues: Vec<String> },
}

// Permissive mirror of the file shape so every field problem can be
// reported instead of only serde's first failure.

#[derive(Debug, Deserialize)]
struct RawFile {
    tiers: Option<Vec<RawTier>>,
    max_total_cost_usd: Option<f64>,
    max_total_duration_minutes: Option<f64>,
    audit_db_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawTier {
    name: Option<String>,
    mode: Option<String>,
    max_iterations: Option<i64>,
    models: Option<RawModels>,
}

#[derive(Debug, Deserialize, Default)]
struct RawModels {
    artisan: Option<RawModelSpec>,
    librarian: Option<RawModelSpec>,
    critic: Option<RawModelSpec>,
}

#[derive(Debug, Deserialize)]
struct RawModelSpec {
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
}

impl TierEscalationConfig {
    /// Load and validate a tier config file.
    pub fn load(path: &Path) -> Result<Self, TierConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| TierConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawFile =
            serde_yaml::from_str(&text).map_err(|source| TierConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(raw)
    }

    fn validate(raw: RawFile) -> Result<Self, TierConfigError> {
        let mut issues: Vec<String> = Vec::new();

        let raw_tiers = raw.tiers.unwrap_or_default();
        if raw_tiers.is_empty() {
            issues.push(
                "tiers: list is empty -> Fix: define at least one tier with name, mode, \
                 max_iterations and models.artisan"
                    .to_string(),
            );
        }

        let mut tiers = Vec::with_capacity(raw_tiers.len());
        for (index, tier) in raw_tiers.into_iter().enumerate() {
            let label = format!("tiers[{}]", index);

            let name = match tier.name {
                Some(name) if !name.trim().is_empty() => Some(name),
                _ => {
                    issues.push(format!(
                        "{}.name: missing or empty -> Fix: give the tier a non-empty name",
                        label
                    ));
                    None
                }
            };

            let mode = match tier.mode.as_deref() {
                Some("simple") => Some(TierMode::Simple),
                Some("full") => Some(TierMode::Full),
                Some(other) => {
                    issues.push(format!(
                        "{}.mode: unknown mode '{}' -> Fix: use 'simple' or 'full'",
                        label, other
                    ));
                    None
                }
                None => {
                    issues.push(format!(
                        "{}.mode: missing -> Fix: use 'simple' or 'full'",
                        label
                    ));
                    None
                }
            };

            let max_iterations = match tier.max_iterations {
                Some(n) if (1..=100).contains(&n) => Some(n as u32),
                Some(n) => {
                    issues.push(format!(
                        "{}.max_iterations: {} is out of range -> Fix: use a value between 1 and 100",
                        label, n
                    ));
                    None
                }
                None => {
                    issues.push(format!(
                        "{}.max_iterations: missing -> Fix: use a value between 1 and 100",
                        label
                    ));
                    None
                }
            };

            let raw_models = tier.models.unwrap_or_default();
            let artisan = match raw_models.artisan {
                Some(spec) => validate_model_spec(&format!("{}.models.artisan", label), spec, &mut issues),
                None => {
                    issues.push(format!(
                        "{}.models.artisan: missing -> Fix: every tier needs an artisan model \
                         (provider + model)",
                        label
                    ));
                    None
                }
            };
            let librarian = raw_models.librarian.and_then(|spec| {
                validate_model_spec(&format!("{}.models.librarian", label), spec, &mut issues)
            });
            let critic = raw_models.critic.and_then(|spec| {
                validate_model_spec(&format!("{}.models.critic", label), spec, &mut issues)
            });

            if let (Some(name), Some(mode), Some(max_iterations), Some(artisan)) =
                (name, mode, max_iterations, artisan)
            {
                tiers.push(TierConfig {
                    name,
                    mode,
                    max_iterations,
                    models: TierModels {
                        artisan,
                        librarian,
                        critic,
                    },
                });
            }
        }

        if let Some(cost) = raw.max_total_cost_usd {
            if cost <= 0.0 {
                issues.push(format!(
                    "max_total_cost_usd: {} must be positive -> Fix: set a positive dollar amount",
                    cost
                ));
            }
        }
        if let Some(minutes) = raw.max_total_duration_minutes {
            if minutes <= 0.0 {
                issues.push(format!(
                    "max_total_duration_minutes: {} must be positive -> Fix: set a positive duration",
                    minutes
                ));
            }
        }

        if issues.is_empty() {
            Ok(Self {
                tiers,
                max_total_cost_usd: raw.max_total_cost_usd,
                max_total_duration_minutes: raw.max_total_duration_minutes,
                audit_db_path: raw.audit_db_path,
            })
        } else {
            Err(TierConfigError::Invalid { issues })
        }
    }
}

fn validate_model_spec(
    label: &str,
    raw: RawModelSpec,
    issues: &mut Vec<String>,
) -> Option<ModelSpec> {
    let provider = match raw.provider.as_deref() {
        Some(tag) => match tag.parse::<Provider>() {
            Ok(provider) => Some(provider),
            Err(e) => {
                issues.push(format!("{}.provider: {} -> Fix: pick a supported provider", label, e));
                None
            }
        },
        None => {
            issues.push(format!(
                "{}.provider: missing -> Fix: set one of anthropic, google, openai, huggingface, ollama",
                label
            ));
            None
        }
    };

    let model = match raw.model {
        Some(model) if !model.trim().is_empty() => Some(model),
        _ => {
            issues.push(format!(
                "{}.model: missing or empty -> Fix: set the model identifier",
                label
            ));
            None
        }
    };

    match (provider, model) {
        (Some(provider), Some(model)) => Some(ModelSpec {
            provider,
            model,
            temperature: raw.temperature,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_str(yaml: &str) -> Result<TierEscalationConfig, TierConfigError> {
        let raw: RawFile = serde_yaml::from_str(yaml).unwrap();
        TierEscalationConfig::validate(raw)
    }

    const VALID: &str = r#"
tiers:
  - name: cheap
    mode: simple
    max_iterations: 2
    models:
      artisan: { provider: openai, model: gpt-4o-mini }
  - name: heavy
    mode: full
    max_iterations: 3
    models:
      artisan: { provider: anthropic, model: claude-sonnet-4 }
      librarian: { provider: google, model: gemini-2.0-flash }
      critic: { provider: anthropic, model: claude-3-5-haiku }
max_total_cost_usd: 5.0
"#;

    #[test]
    fn test_valid_config_parses() {
        let config = load_str(VALID).unwrap();
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[0].name, "cheap");
        assert_eq!(config.tiers[1].mode, TierMode::Full);
        assert_eq!(config.max_total_cost_usd, Some(5.0));
    }

    #[test]
    fn test_all_errors_are_collected() {
        let yaml = r#"
tiers:
  - name: ""
    mode: turbo
    max_iterations: 500
    models: {}
"#;
        let err = load_str(yaml).unwrap_err();
        let TierConfigError::Invalid { issues } = err else {
            panic!("expected Invalid");
        };
        // name + mode + max_iterations + artisan: all four reported at once.
        assert_eq!(issues.len(), 4);
        assert!(issues.iter().all(|issue| issue.contains("-> Fix:")));
    }

    #[test]
    fn test_empty_tier_list_rejected() {
        let err = load_str("tiers: []").unwrap_err();
        assert!(err.to_string().contains("at least one tier"));
    }

    #[test]
    fn test_iteration_bounds() {
        for (value, ok) in [(0, false), (1, true), (100, true), (101, false)] {
            let yaml = format!(
                r#"
tiers:
  - name: t
    mode: simple
    max_iterations: {}
    models:
      artisan: {{ provider: openai, model: gpt-4o-mini }}
"#,
                value
            );
            assert_eq!(load_str(&yaml).is_ok(), ok, "max_iterations = {}", value);
        }
    }
}
