//! Failure-history compression.
//!
//! Late phases and tiers learn from earlier ones through bounded
//! natural-language summaries: 2000 characters for the simple-mode
//! history, 4000 for the accumulated multi-tier history. The caps are
//! hard — prompts must never grow with the number of failed attempts.

use serde::{Deserialize, Serialize};

use crate::entropy::normalize_signature;
use crate::records::{SimpleIterationRecord, TierRunResult};

/// Hard cap on the simple-mode failure summary.
pub const FAILURE_SUMMARY_CAP: usize = 2000;
/// Hard cap on the accumulated multi-tier summary.
pub const ACCUMULATED_SUMMARY_CAP: usize = 4000;
/// Appended whenever content had to be dropped to fit a cap.
pub const TRUNCATION_MARKER: &str = "\n[summary truncated for context efficiency]";

/// Failed tests and error output of the final attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalTestState {
    pub failed_tests: Vec<String>,
    pub last_error_messages: Vec<String>,
}

/// Compressed history of a failed simple-mode phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub total_iterations: u32,
    pub total_cost_usd: f64,
    pub unique_error_signatures: Vec<String>,
    pub final_test_state: FinalTestState,
    /// Bounded by [`FAILURE_SUMMARY_CAP`].
    pub natural_language_summary: String,
}

/// One line per attempt, shared by both summary shapes.
fn iteration_line(record: &SimpleIterationRecord) -> String {
    let errors = if record.error_messages.is_empty() {
        record.test_status.to_string()
    } else {
        record
            .error_messages
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
    };
    format!(
        "Iteration {}: {}. Tests: {}",
        record.iteration_index, record.code_change_summary, errors
    )
}

/// First raw message per distinct normalized signature, in order of first
/// appearance.
fn unique_error_messages(records: &[SimpleIterationRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for record in records {
        for message in &record.error_messages {
            if seen.insert(normalize_signature(message)) {
                unique.push(message.clone());
            }
        }
    }
    unique
}

fn patterns_line(unique: &[String]) -> String {
    format!(
        "Unique error patterns: {}",
        unique.iter().take(5).cloned().collect::<Vec<_>>().join(" | ")
    )
}

/// Build the Phase-B failure summary from simple-mode records.
pub fn build_failure_summary(records: &[SimpleIterationRecord]) -> FailureSummary {
    let unique = unique_error_messages(records);
    let last = records.last();

    let header = format!(
        "SIMPLE MODE HISTORY ({} iterations, all failed):",
        records.len()
    );
    let lines: Vec<String> = records.iter().map(iteration_line).collect();
    let natural_language_summary =
        compose_capped(&header, &lines, &patterns_line(&unique), FAILURE_SUMMARY_CAP);

    FailureSummary {
        total_iterations: records.len() as u32,
        total_cost_usd: records.iter().map(|r| r.cost_usd).sum(),
        unique_error_signatures: unique.iter().map(|m| normalize_signature(m)).collect(),
        final_test_state: FinalTestState {
            failed_tests: last.map(|r| r.failed_tests.clone()).unwrap_or_default(),
            last_error_messages: last.map(|r| r.error_messages.clone()).unwrap_or_default(),
        },
        natural_language_summary,
    }
}

/// Assemble header + per-iteration lines + patterns line under `cap`
/// characters. The header and the patterns line survive truncation;
/// iteration lines are dropped from the bottom up, and the marker is
/// appended whenever anything was dropped.
fn compose_capped(header: &str, lines: &[String], patterns: &str, cap: usize) -> String {
    let full = {
        let mut parts = Vec::with_capacity(lines.len() + 2);
        parts.push(header.to_string());
        parts.extend(lines.iter().cloned());
        parts.push(patterns.to_string());
        parts.join("\n")
    };
    if char_len(&full) <= cap {
        return full;
    }

    let marker_len = char_len(TRUNCATION_MARKER);
    let budget = cap.saturating_sub(marker_len);

    let mut kept: Vec<&str> = vec![header, patterns];
    let mut used = char_len(header) + 1 + char_len(patterns);
    let mut insert_at = 1;
    for line in lines {
        let needed = char_len(line) + 1;
        if used + needed > budget {
            break;
        }
        kept.insert(insert_at, line);
        insert_at += 1;
        used += needed;
    }

    let mut out = kept.join("\n");
    if char_len(&out) > budget {
        // Pathologically long header or patterns line: hard slice.
        out = char_slice(&out, budget);
    }
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Build the escalation string fed into the next tier: per-tier failure
/// blocks plus a totals footer, capped at [`ACCUMULATED_SUMMARY_CAP`].
/// Oldest tier blocks are dropped first when over the cap; a lone
/// over-cap block is hard-sliced.
pub fn build_accumulated_summary(results: &[TierRunResult]) -> String {
    let blocks: Vec<String> = results.iter().map(tier_block).collect();

    let total_iterations: u32 = results.iter().map(|r| r.iterations_ran).sum();
    let total_cost: f64 = results.iter().map(|r| r.total_cost_usd).sum();
    let footer = format!(
        "[total accumulated across {} tier(s): {} iterations, ${:.2}]",
        results.len(),
        total_iterations,
        total_cost
    );

    let assemble = |blocks: &[String]| {
        let mut out = blocks.join("\n\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&footer);
        out
    };

    let mut start = 0;
    let mut truncated = false;
    let marker_len = char_len(TRUNCATION_MARKER);

    loop {
        let candidate = assemble(&blocks[start..]);
        let cap = if truncated || start > 0 {
            ACCUMULATED_SUMMARY_CAP.saturating_sub(marker_len)
        } else {
            ACCUMULATED_SUMMARY_CAP
        };

        if char_len(&candidate) <= cap {
            let mut out = candidate;
            if truncated || start > 0 {
                out.push_str(TRUNCATION_MARKER);
            }
            return out;
        }

        if start + 1 < blocks.len() {
            start += 1;
            truncated = true;
        } else {
            // Even the newest block alone is over cap: hard slice.
            let budget = ACCUMULATED_SUMMARY_CAP.saturating_sub(marker_len);
            let mut out = char_slice(&candidate, budget);
            out.push_str(TRUNCATION_MARKER);
            return out;
        }
    }
}

fn tier_block(result: &TierRunResult) -> String {
    let simple = result.as_simple_records();
    let unique = unique_error_messages(&simple);

    let mut block = format!(
        "=== TIER {} FAILURES: {} ({} iterations) ===",
        result.tier_index + 1,
        result.tier_name,
        result.iterations_ran
    );
    for record in &simple {
        block.push('\n');
        block.push_str(&iteration_line(record));
    }
    block.push('\n');
    block.push_str(&patterns_line(&unique));
    block
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn char_slice(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestStatus;
    use crate::records::ExitReason;

    fn record(index: u32, error: &str) -> SimpleIterationRecord {
        SimpleIterationRecord {
            iteration_index: index,
            code_change_summary: format!("changed operator in attempt {}", index),
            test_status: TestStatus::Failed,
            failed_tests: vec!["test_multiply".to_string()],
            error_messages: vec![error.to_string()],
            duration_ms: 40,
            cost_usd: 0.01,
        }
    }

    #[test]
    fn test_summary_header_and_lines() {
        let records: Vec<_> = (1..=5)
            .map(|i| record(i, "AssertionError: expected 12 got 7"))
            .collect();
        let summary = build_failure_summary(&records);

        assert!(summary
            .natural_language_summary
            .starts_with("SIMPLE MODE HISTORY (5 iterations, all failed):"));
        assert!(summary
            .natural_language_summary
            .contains("Iteration 1: changed operator in attempt 1. Tests: AssertionError"));
        assert!(summary
            .natural_language_summary
            .contains("Unique error patterns: AssertionError: expected 12 got 7"));
        assert_eq!(summary.total_iterations, 5);
        assert_eq!(summary.unique_error_signatures.len(), 1);
    }

    #[test]
    fn test_summary_respects_hard_cap() {
        let records: Vec<_> = (1..=200)
            .map(|i| record(i, &format!("Error {}: {}", i, "x".repeat(100))))
            .collect();
        let summary = build_failure_summary(&records);

        assert!(summary.natural_language_summary.chars().count() <= FAILURE_SUMMARY_CAP);
        assert!(summary
            .natural_language_summary
            .ends_with("[summary truncated for context efficiency]"));
        // Header survives truncation.
        assert!(summary
            .natural_language_summary
            .starts_with("SIMPLE MODE HISTORY (200 iterations, all failed):"));
    }

    #[test]
    fn test_unique_signatures_deduplicate_positions() {
        let records = vec![
            record(1, "TypeError at app.ts:3:1"),
            record(2, "TypeError at app.ts:19:4"),
            record(3, "ReferenceError: y is not defined"),
        ];
        let summary = build_failure_summary(&records);
        assert_eq!(summary.unique_error_signatures.len(), 2);
    }

    fn tier_result(index: u32, name: &str, iterations: u32) -> TierRunResult {
        TierRunResult {
            tier_name: name.to_string(),
            tier_index: index,
            success: false,
            iterations_ran: iterations,
            total_cost_usd: 0.05 * iterations as f64,
            records: Vec::new(),
            exit_reason: ExitReason::IterationsExhausted,
        }
    }

    #[test]
    fn test_accumulated_summary_blocks_and_footer() {
        let results = vec![tier_result(0, "cheap", 2), tier_result(1, "mid", 2)];
        let summary = build_accumulated_summary(&results);

        assert!(summary.contains("=== TIER 1 FAILURES: cheap (2 iterations) ==="));
        assert!(summary.contains("=== TIER 2 FAILURES: mid (2 iterations) ==="));
        assert!(summary.contains("[total accumulated across 2 tier(s): 4 iterations, $0.20]"));
    }

    #[test]
    fn test_accumulated_summary_drops_oldest_first() {
        let mut results = Vec::new();
        for i in 0..6 {
            let mut result = tier_result(i, &format!("tier{}", i), 10);
            result.records = (1..=10)
                .map(|n| crate::records::TierAttemptRecord {
                    run_id: uuid::Uuid::nil(),
                    tier_index: i,
                    tier_name: result.tier_name.clone(),
                    tier_mode: crate::tiers::TierMode::Simple,
                    model_artisan: "m".to_string(),
                    model_librarian: None,
                    model_critic: None,
                    iteration: n,
                    code_change_summary: "s".repeat(150),
                    test_status: TestStatus::Failed,
                    failed_tests: vec![],
                    error_messages: vec![format!("tier {} error {}", i, "e".repeat(80))],
                    cost_usd: 0.01,
                    duration_ms: 5,
                    timestamp: chrono::Utc::now(),
                })
                .collect();
            results.push(result);
        }

        let summary = build_accumulated_summary(&results);
        assert!(summary.chars().count() <= ACCUMULATED_SUMMARY_CAP);
        // Newest tier block survives; the oldest is gone.
        assert!(summary.contains("tier5"));
        assert!(!summary.contains("=== TIER 1 FAILURES"));
        assert!(summary.contains("[summary truncated for context efficiency]"));
    }

    #[test]
    fn test_accumulated_single_oversized_block_is_sliced() {
        let mut result = tier_result(0, "solo", 1);
        result.records = vec![crate::records::TierAttemptRecord {
            run_id: uuid::Uuid::nil(),
            tier_index: 0,
            tier_name: "solo".to_string(),
            tier_mode: crate::tiers::TierMode::Simple,
            model_artisan: "m".to_string(),
            model_librarian: None,
            model_critic: None,
            iteration: 1,
            code_change_summary: "s".repeat(200),
            test_status: TestStatus::Failed,
            failed_tests: vec![],
            error_messages: vec!["e".repeat(6000)],
            cost_usd: 0.01,
            duration_ms: 5,
            timestamp: chrono::Utc::now(),
        }];

        let summary = build_accumulated_summary(&[result]);
        assert!(summary.chars().count() <= ACCUMULATED_SUMMARY_CAP);
        assert!(summary.ends_with("[summary truncated for context efficiency]"));
    }
}
