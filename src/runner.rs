//! External test-runner invocation.
//!
//! The control plane only consumes the narrow `run_tests` function:
//! spawn the user's test command, wait with a timeout, and distill the
//! output into a [`TestResult`]. Full framework-specific result-JSON
//! parsing lives outside this crate; the extraction here is a line
//! heuristic keyed on the framework tag.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::context::{TestFramework, TestResult, TestStatus};

/// Default subprocess timeout.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum failed-test names / error messages kept per run.
const MAX_EXTRACTED_LINES: usize = 20;

/// Run the test command in `cwd` and distill the outcome.
///
/// Never returns an error: a crashed or timed-out runner becomes
/// `TestStatus::Error` and the loop carries on (the entropy detector
/// handles a runner that is stuck for good).
pub async fn run_tests(
    cwd: &Path,
    command: &str,
    framework: TestFramework,
    timeout: Duration,
) -> TestResult {
    let started = Instant::now();

    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, spawned).await {
        Err(_) => {
            tracing::warn!(command, timeout_secs = timeout.as_secs(), "Test runner timed out");
            return TestResult {
                status: TestStatus::Error,
                failed_tests: Vec::new(),
                error_messages: vec![format!(
                    "test runner timed out after {}s",
                    timeout.as_secs()
                )],
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }
        Ok(Err(e)) => {
            tracing::warn!(command, error = %e, "Test runner failed to start");
            return TestResult {
                status: TestStatus::Error,
                failed_tests: Vec::new(),
                error_messages: vec![format!("test runner failed to start: {}", e)],
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }
        Ok(Ok(output)) => output,
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}\n{}", stdout, stderr);

    if output.status.success() {
        return TestResult {
            status: TestStatus::Passed,
            failed_tests: Vec::new(),
            error_messages: Vec::new(),
            duration_ms,
        };
    }

    let failed_tests = extract_failed_tests(&combined, framework);
    let error_messages = extract_error_messages(&combined);

    // Non-zero exit with no recognizable test output usually means the
    // command itself blew up (syntax error, missing binary).
    let status = if failed_tests.is_empty() && error_messages.is_empty() {
        TestStatus::Error
    } else {
        TestStatus::Failed
    };

    let error_messages = if error_messages.is_empty() {
        vec![last_nonempty_line(&combined)
            .unwrap_or_else(|| format!("test command exited with {}", output.status))]
    } else {
        error_messages
    };

    TestResult {
        status,
        failed_tests,
        error_messages,
        duration_ms,
    }
}

/// Pull failed-test names out of runner output.
pub fn extract_failed_tests(output: &str, framework: TestFramework) -> Vec<String> {
    let mut names = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim();
        let name = match framework {
            TestFramework::Pytest => trimmed
                .strip_prefix("FAILED ")
                .map(|rest| rest.split(" - ").next().unwrap_or(rest)),
            TestFramework::Cargo => trimmed
                .strip_prefix("test ")
                .and_then(|rest| rest.strip_suffix("... FAILED")),
            // vitest / jest / mocha mark failures with ✕ or ✗ or "FAIL"
            TestFramework::Vitest | TestFramework::Jest | TestFramework::Mocha => trimmed
                .strip_prefix("✕ ")
                .or_else(|| trimmed.strip_prefix("✗ "))
                .or_else(|| trimmed.strip_prefix("× ")),
            TestFramework::Rspec => {
                if trimmed.starts_with("rspec ./") {
                    Some(trimmed)
                } else {
                    None
                }
            }
            TestFramework::Custom => None,
        };

        if let Some(name) = name {
            let name = name.trim().to_string();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        if names.len() >= MAX_EXTRACTED_LINES {
            break;
        }
    }

    names
}

/// Pull error lines out of runner output (assertion and exception text).
pub fn extract_error_messages(output: &str) -> Vec<String> {
    let mut messages = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        let looks_like_error = trimmed.contains("Error")
            || trimmed.contains("error:")
            || trimmed.contains("assert")
            || trimmed.contains("Assertion")
            || trimmed.contains("Expected")
            || trimmed.contains("expected");
        if looks_like_error && !trimmed.is_empty() {
            let message = trimmed.to_string();
            if !messages.contains(&message) {
                messages.push(message);
            }
        }
        if messages.len() >= MAX_EXTRACTED_LINES {
            break;
        }
    }
    messages
}

fn last_nonempty_line(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
