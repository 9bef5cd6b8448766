//! Entropy detection (circuit breaker) for stuck fix loops.
//!
//! Tracks normalized error signatures across iterations. A signature that
//! repeats `threshold` times consecutively means the agent keeps producing
//! the same failure and the loop should stop burning budget.
//!
//! Only unit-test failures and uncategorized loop errors feed this
//! detector; adversarial/chaos results are informational and must never
//! be tracked here.

use std::sync::OnceLock;

use regex::Regex;

/// Default number of consecutive identical signatures that triggers.
pub const DEFAULT_ENTROPY_THRESHOLD: u32 = 3;

fn position_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // line:col suffixes (file.ts:12:5) and "line 12" / "line 12, col 4" phrasing
    RE.get_or_init(|| Regex::new(r"(:\d+)+|line \d+(, col(umn)? \d+)?").expect("valid regex"))
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[t ]\d{2}:\d{2}:\d{2}(\.\d+)?(z|[+-]\d{2}:?\d{2})?")
            .expect("valid regex")
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(\.\d+)?\b").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Normalize an error message into a stable signature.
///
/// Lowercases, then strips position markers, timestamps, and numeric
/// literals so that cosmetic drift between iterations (shifted line
/// numbers, new timestamps) does not mask a repeating failure.
pub fn normalize_signature(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let no_ts = timestamp_re().replace_all(&lowered, "<ts>");
    let no_pos = position_re().replace_all(&no_ts, "");
    let no_num = number_re().replace_all(&no_pos, "<n>");
    whitespace_re()
        .replace_all(no_num.trim(), " ")
        .into_owned()
}

/// Consecutive-identical-signature counter.
#[derive(Debug)]
pub struct EntropyDetector {
    threshold: u32,
    last_signature: Option<String>,
    consecutive: u32,
}

impl EntropyDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_signature: None,
            consecutive: 0,
        }
    }

    /// Feed one raw error message. Returns true when entropy triggers.
    pub fn track(&mut self, raw_error: &str) -> bool {
        let signature = normalize_signature(raw_error);

        if self.last_signature.as_deref() == Some(signature.as_str()) {
            self.consecutive += 1;
        } else {
            self.last_signature = Some(signature);
            self.consecutive = 1;
        }

        if self.consecutive >= self.threshold {
            tracing::info!(
                consecutive = self.consecutive,
                threshold = self.threshold,
                "Entropy detected: identical error signature repeating"
            );
            true
        } else {
            false
        }
    }

    /// Number of times the current signature has repeated.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Forget all tracked state (used when agents are reset between tiers).
    pub fn reset(&mut self) {
        self.last_signature = None;
        self.consecutive = 0;
    }
}

impl Default for EntropyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ENTROPY_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_strips_positions_numbers_timestamps() {
        let a = normalize_signature("Error at src/math.py:12:5: expected 12 got 7");
        let b = normalize_signature("error at src/math.py:99:1: expected 3 got 4");
        assert_eq!(a, b);

        let c = normalize_signature("[2026-08-01T10:11:12Z] AssertionError line 4");
        let d = normalize_signature("[2026-08-01T23:59:59Z] assertionerror line 19");
        assert_eq!(c, d);
    }

    #[test]
    fn test_fires_exactly_at_threshold() {
        let mut detector = EntropyDetector::new(3);
        assert!(!detector.track("same failure"));
        assert!(!detector.track("same failure"));
        assert!(detector.track("same failure"));
    }

    #[test]
    fn test_different_signature_resets_counter() {
        let mut detector = EntropyDetector::new(3);
        assert!(!detector.track("failure A"));
        assert!(!detector.track("failure A"));
        assert!(!detector.track("failure B"));
        assert_eq!(detector.consecutive(), 1);
        assert!(!detector.track("failure B"));
        assert!(detector.track("failure B"));
    }

    #[test]
    fn test_positions_do_not_break_the_streak() {
        let mut detector = EntropyDetector::new(3);
        assert!(!detector.track("TypeError at app.ts:3:1"));
        assert!(!detector.track("TypeError at app.ts:17:9"));
        assert!(detector.track("TypeError at app.ts:40:2"));
    }

    #[test]
    fn test_reset_clears_streak() {
        let mut detector = EntropyDetector::new(2);
        assert!(!detector.track("x"));
        detector.reset();
        assert!(!detector.track("x"));
        assert!(detector.track("x"));
    }
}
