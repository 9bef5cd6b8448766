//! Per-attempt and per-tier record types.
//!
//! Records are created by the loops, never mutated afterwards, and
//! flushed to the audit store at the end of each iteration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::TestStatus;
use crate::tiers::TierMode;

/// One Simple-Mode attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleIterationRecord {
    pub iteration_index: u32,
    /// Capped at 200 characters by the producer.
    pub code_change_summary: String,
    pub test_status: TestStatus,
    pub failed_tests: Vec<String>,
    pub error_messages: Vec<String>,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

/// One attempt inside a tier run; superset of the simple record with
/// enough provenance to reconstruct the run from the audit store alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierAttemptRecord {
    pub run_id: Uuid,
    pub tier_index: u32,
    pub tier_name: String,
    pub tier_mode: TierMode,
    pub model_artisan: String,
    pub model_librarian: Option<String>,
    pub model_critic: Option<String>,
    pub iteration: u32,
    pub code_change_summary: String,
    pub test_status: TestStatus,
    pub failed_tests: Vec<String>,
    pub error_messages: Vec<String>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Why a tier (or phase) loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Success,
    IterationsExhausted,
    BudgetExhausted,
    ProviderError,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::IterationsExhausted => write!(f, "iterations_exhausted"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::ProviderError => write!(f, "provider_error"),
        }
    }
}

/// Outcome of one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRunResult {
    pub tier_name: String,
    pub tier_index: u32,
    pub success: bool,
    pub iterations_ran: u32,
    pub total_cost_usd: f64,
    pub records: Vec<TierAttemptRecord>,
    pub exit_reason: ExitReason,
}

impl TierRunResult {
    /// Project the tier attempts down to simple records for the
    /// failure-summary builders.
    pub fn as_simple_records(&self) -> Vec<SimpleIterationRecord> {
        self.records
            .iter()
            .map(|record| SimpleIterationRecord {
                iteration_index: record.iteration,
                code_change_summary: record.code_change_summary.clone(),
                test_status: record.test_status,
                failed_tests: record.failed_tests.clone(),
                error_messages: record.error_messages.clone(),
                duration_ms: record.duration_ms,
                cost_usd: record.cost_usd,
            })
            .collect()
    }
}
