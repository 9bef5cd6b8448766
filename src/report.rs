//! Final multi-phase run report.
//!
//! Every terminal state produces one of these: which status ended the
//! run, in which phase, what each phase cost, and up to five
//! deduplicated error messages per phase.

use colored::Colorize;

use crate::engine::AgentCostBreakdown;
use crate::entropy::normalize_signature;

/// Maximum error messages shown per phase.
const MAX_ERRORS_PER_PHASE: usize = 5;

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub name: String,
    pub iterations: u32,
    pub cost_usd: f64,
    /// Deduplicated by normalized signature, capped at five.
    pub errors: Vec<String>,
}

impl PhaseReport {
    pub fn new(name: impl Into<String>, iterations: u32, cost_usd: f64, raw_errors: &[String]) -> Self {
        Self {
            name: name.into(),
            iterations,
            cost_usd,
            errors: dedup_errors(raw_errors),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub success: bool,
    /// E.g. "Simple only", "Simple -> Full (escalated)", "Tiered (3 tiers)".
    pub mode: String,
    /// E.g. "success", "budget_exceeded (cost limit reached ...)".
    pub terminal_status: String,
    /// Phase (or tier) that ended the run.
    pub ended_phase: String,
    pub phases: Vec<PhaseReport>,
    pub total_iterations: u32,
    pub total_cost_usd: f64,
    pub agent_costs: AgentCostBreakdown,
    pub interrupted: bool,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// Keep the first raw message per distinct normalized signature.
fn dedup_errors(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .filter(|message| seen.insert(normalize_signature(message)))
        .take(MAX_ERRORS_PER_PHASE)
        .cloned()
        .collect()
}

/// Print the report to stdout.
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", "==== run report ====".bold());

    let status = if report.success {
        report.terminal_status.green().bold()
    } else {
        report.terminal_status.red().bold()
    };
    println!("Status:     {}", status);
    println!("Mode:       {}", report.mode);
    println!("Ended in:   {}", report.ended_phase);
    if report.interrupted {
        println!("{}", "Run was interrupted by the user.".yellow());
    }

    println!();
    for phase in &report.phases {
        println!(
            "  {:<12} {} iteration(s), ${:.4}",
            format!("{}:", phase.name),
            phase.iterations,
            phase.cost_usd
        );
        for error in &phase.errors {
            println!("    - {}", error.dimmed());
        }
    }

    println!();
    println!(
        "Total:      {} iteration(s), ${:.4}",
        report.total_iterations, report.total_cost_usd
    );

    let breakdown = &report.agent_costs;
    if breakdown.total() > 0.0 {
        println!(
            "Per agent:  librarian ${:.4}, artisan ${:.4}, critic ${:.4}",
            breakdown.librarian, breakdown.artisan, breakdown.critic
        );
    } else if report.total_cost_usd > 0.0 {
        // Per-call tracking unavailable; fall back to the historical
        // 20/50/20/10 share estimate.
        println!(
            "Per agent:  ~librarian ${:.4}, ~artisan ${:.4}, ~critic ${:.4}, ~chaos ${:.4} (estimated)",
            report.total_cost_usd * 0.20,
            report.total_cost_usd * 0.50,
            report.total_cost_usd * 0.20,
            report.total_cost_usd * 0.10
        );
    }
}
