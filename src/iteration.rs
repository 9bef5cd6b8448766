//! Per-run iteration accounting: budget checks, cost tracking, entropy.

use std::time::Instant;

use crate::entropy::EntropyDetector;

/// Result of a pre-iteration budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetStatus {
    Within,
    /// `reason` names the constraint that tripped (iterations, cost, or
    /// duration) for the final report.
    Exhausted { reason: String },
}

impl BudgetStatus {
    pub fn is_within(&self) -> bool {
        matches!(self, BudgetStatus::Within)
    }
}

/// Budget accounting, iteration numbering, and the entropy breaker for a
/// single run. Shared by every phase and tier — there is no per-phase
/// budget split.
pub struct IterationManager {
    iteration: u32,
    total_cost_usd: f64,
    start: Instant,
    max_iterations: u32,
    max_cost_usd: f64,
    max_duration_minutes: f64,
    context_reset_frequency: u32,
    entropy: EntropyDetector,
}

impl IterationManager {
    pub fn new(
        max_iterations: u32,
        max_cost_usd: f64,
        max_duration_minutes: f64,
        context_reset_frequency: u32,
        entropy_threshold: u32,
    ) -> Self {
        Self {
            iteration: 0,
            total_cost_usd: 0.0,
            start: Instant::now(),
            max_iterations,
            max_cost_usd,
            max_duration_minutes,
            context_reset_frequency: context_reset_frequency.max(1),
            entropy: EntropyDetector::new(entropy_threshold),
        }
    }

    /// Completed-iteration count. Incremented via [`Self::increment_iteration`].
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.start.elapsed().as_secs_f64() / 60.0
    }

    /// Pre-iteration budget check.
    ///
    /// The iteration constraint compares against *completed* iterations:
    /// a run configured for N iterations gets to actually run all N
    /// before this reports exhaustion. Cost is the one predictive check —
    /// crossing `max_cost_usd` stops the run even mid-phase.
    pub fn check_budget(&self) -> BudgetStatus {
        if self.iteration >= self.max_iterations {
            return BudgetStatus::Exhausted {
                reason: format!(
                    "iteration limit reached ({}/{})",
                    self.iteration, self.max_iterations
                ),
            };
        }
        if self.total_cost_usd >= self.max_cost_usd {
            return BudgetStatus::Exhausted {
                reason: format!(
                    "cost limit reached (${:.4}/${:.2})",
                    self.total_cost_usd, self.max_cost_usd
                ),
            };
        }
        let elapsed = self.elapsed_minutes();
        if elapsed >= self.max_duration_minutes {
            return BudgetStatus::Exhausted {
                reason: format!(
                    "duration limit reached ({:.1}/{:.0} minutes)",
                    elapsed, self.max_duration_minutes
                ),
            };
        }
        BudgetStatus::Within
    }

    /// Add a cost delta. Totals are monotonically non-decreasing.
    pub fn record_cost(&mut self, delta_usd: f64) {
        self.total_cost_usd += delta_usd.max(0.0);
    }

    /// Advance the iteration counter; returns the new iteration number.
    pub fn increment_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    /// Feed a raw error into the entropy detector.
    /// Returns true when the circuit breaker trips.
    pub fn track_error(&mut self, raw_error: &str) -> bool {
        self.entropy.track(raw_error)
    }

    /// Reset the entropy streak (used at tier boundaries).
    pub fn reset_entropy(&mut self) {
        self.entropy.reset();
    }

    /// Whether agent state should be destroyed after the current
    /// iteration. With the default frequency of 1 every iteration starts
    /// from a fresh agent.
    pub fn should_reset_context(&self) -> bool {
        self.iteration % self.context_reset_frequency == 0
    }
}
