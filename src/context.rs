//! Loop state data model.
//!
//! [`AgentContext`] is an immutable snapshot threaded through every phase
//! of a run. Updates go through `with_*` constructors that return a new
//! instance; nothing here mutates in place. All cross-iteration state
//! lives either in this value or on the filesystem — no in-memory LLM
//! conversation history survives an iteration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Test framework tag. Closed set; `Custom` covers everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Vitest,
    Jest,
    Pytest,
    Mocha,
    Rspec,
    Cargo,
    Custom,
}

impl std::str::FromStr for TestFramework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vitest" => Ok(Self::Vitest),
            "jest" => Ok(Self::Jest),
            "pytest" => Ok(Self::Pytest),
            "mocha" => Ok(Self::Mocha),
            "rspec" => Ok(Self::Rspec),
            "cargo" => Ok(Self::Cargo),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown test framework '{}' (expected vitest, jest, pytest, mocha, rspec, cargo, or custom)",
                other
            )),
        }
    }
}

impl std::fmt::Display for TestFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Vitest => "vitest",
            Self::Jest => "jest",
            Self::Pytest => "pytest",
            Self::Mocha => "mocha",
            Self::Rspec => "rspec",
            Self::Cargo => "cargo",
            Self::Custom => "custom",
        };
        write!(f, "{}", tag)
    }
}

/// Outcome of one test-runner invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    /// Runner crashed or timed out; the loop continues and the entropy
    /// detector catches stuck states.
    Error,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Result of running the user's test command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub status: TestStatus,
    pub failed_tests: Vec<String>,
    pub error_messages: Vec<String>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Dependency graph over files in the working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Workspace-relative file paths.
    pub nodes: Vec<String>,
    /// (from, to) edges: `from` references `to`.
    pub edges: Vec<(String, String)>,
}

/// Structured output of the Librarian agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarianReport {
    /// Ranked by shortest-path distance from the target file, ties broken
    /// lexicographically.
    pub relevant_files: Vec<String>,
    pub dependency_graph: DependencyGraph,
    pub context_summary: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Structured output of the Artisan agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtisanOutput {
    pub code: String,
    pub reasoning: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Structured output of the Critic agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticReview {
    pub approved: bool,
    pub critique: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Budget envelope for a whole run, shared across all phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBudget {
    pub max_cost_usd: f64,
    pub current_cost_usd: f64,
    pub max_duration_minutes: f64,
    pub start_time: DateTime<Utc>,
    pub max_iterations: u32,
}

impl RunBudget {
    pub fn new(max_cost_usd: f64, max_duration_minutes: f64, max_iterations: u32) -> Self {
        Self {
            max_cost_usd,
            current_cost_usd: 0.0,
            max_duration_minutes,
            start_time: Utc::now(),
            max_iterations,
        }
    }
}

/// Immutable per-iteration state passed between phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub session_id: Uuid,
    /// Completed-iteration counter; strictly increasing across the run.
    pub iteration: u32,
    pub objective: String,
    /// Absent means "any files in the working directory".
    pub target_file: Option<PathBuf>,
    pub working_directory: PathBuf,
    pub test_command: String,
    pub test_framework: TestFramework,
    pub budget: RunBudget,
    pub librarian_context: Option<LibrarianReport>,
    pub artisan_code: Option<ArtisanOutput>,
    pub critic_review: Option<CriticReview>,
    pub test_result: Option<TestResult>,
    /// Prior-attempt history carried into later phases/tiers. Once set it
    /// may only be replaced, never cleared, within a run.
    pub escalation_context: Option<String>,
}

impl AgentContext {
    pub fn new(
        objective: impl Into<String>,
        target_file: Option<PathBuf>,
        working_directory: PathBuf,
        test_command: impl Into<String>,
        test_framework: TestFramework,
        budget: RunBudget,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            iteration: 0,
            objective: objective.into(),
            target_file,
            working_directory,
            test_command: test_command.into(),
            test_framework,
            budget,
            librarian_context: None,
            artisan_code: None,
            critic_review: None,
            test_result: None,
            escalation_context: None,
        }
    }

    /// New snapshot at the given iteration number.
    pub fn with_iteration(&self, iteration: u32) -> Self {
        let mut next = self.clone();
        next.iteration = iteration;
        next
    }

    /// New snapshot with `delta_usd` added to the running cost.
    pub fn with_recorded_cost(&self, delta_usd: f64) -> Self {
        let mut next = self.clone();
        next.budget.current_cost_usd += delta_usd.max(0.0);
        next
    }

    pub fn with_librarian_context(&self, report: LibrarianReport) -> Self {
        let mut next = self.clone();
        next.librarian_context = Some(report);
        next
    }

    pub fn with_artisan_code(&self, output: ArtisanOutput) -> Self {
        let mut next = self.clone();
        next.artisan_code = Some(output);
        next
    }

    pub fn with_critic_review(&self, review: CriticReview) -> Self {
        let mut next = self.clone();
        next.critic_review = Some(review);
        next
    }

    pub fn with_test_result(&self, result: TestResult) -> Self {
        let mut next = self.clone();
        next.test_result = Some(result);
        next
    }

    /// New snapshot carrying prior-attempt history.
    ///
    /// Pure and idempotent: the receiver is unchanged, and applying the
    /// same summary twice yields an equal field. Empty summaries are
    /// ignored so an existing escalation context can never be cleared.
    pub fn with_escalation_context(&self, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        let mut next = self.clone();
        if !summary.is_empty() {
            next.escalation_context = Some(summary);
        }
        next
    }

    /// Drop role outputs that are only valid for the phase that produced
    /// them. Called at iteration start so each pass begins from a clean
    /// snapshot.
    pub fn with_fresh_phase_outputs(&self) -> Self {
        let mut next = self.clone();
        next.librarian_context = None;
        next.artisan_code = None;
        next.critic_review = None;
        next.test_result = None;
        next
    }
}
