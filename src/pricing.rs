//! Cost calculation from token usage and model pricing.
//!
//! Single source of truth for computing API costs across all provider
//! adapters. The router calls into this module; agents and loops never
//! compute cost themselves.

/// Per-token pricing for a model, in dollars per 1M tokens.
#[derive(Debug, Clone, Copy)]
pub struct ModelRates {
    /// Cost per 1M input tokens in dollars
    pub input_per_million: f64,
    /// Cost per 1M output tokens in dollars
    pub output_per_million: f64,
}

impl ModelRates {
    /// Dollar cost for the given token counts.
    ///
    /// `cost == input_tokens * input_rate + output_tokens * output_rate`
    /// where the per-token rates are the per-million rates divided by 1M.
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64) * self.input_per_million / 1_000_000.0
            + (output_tokens as f64) * self.output_per_million / 1_000_000.0
    }
}

/// Conservative fallback applied to models missing from the table.
///
/// Deliberately priced like a flagship model so budget checks stay safe
/// when the table lags behind a provider's catalog.
pub const FALLBACK_RATES: ModelRates = ModelRates {
    input_per_million: 15.0,
    output_per_million: 75.0,
};

/// Normalize model names to canonical form for pricing lookup.
fn normalize_model(model: &str) -> &str {
    let trimmed = model.trim();

    match trimmed {
        // Claude models - normalize to base names
        s if s.contains("claude-3-5-sonnet") || s.contains("claude-3.5-sonnet") => {
            "claude-3-5-sonnet"
        }
        s if s.contains("claude-sonnet-4") || s.contains("claude-4-sonnet") => "claude-sonnet-4",
        s if s.contains("claude-3-5-haiku") || s.contains("claude-3.5-haiku") => "claude-3-5-haiku",
        s if s.contains("claude-haiku-4") => "claude-haiku-4",
        s if s.contains("claude-opus-4") || s.contains("claude-4-opus") => "claude-opus-4",

        // GPT models
        s if s.contains("gpt-4o-mini") => "gpt-4o-mini",
        s if s.contains("gpt-4o") => "gpt-4o",
        s if s.contains("gpt-4-turbo") => "gpt-4-turbo",
        s if s.contains("gpt-5") => "gpt-5",
        s if s.contains("o3-mini") => "o3-mini",
        s if s.contains("o4-mini") => "o4-mini",

        // Gemini models
        s if s.contains("gemini-2.5-pro") || s.contains("gemini-2-5-pro") => "gemini-2.5-pro",
        s if s.contains("gemini-2.5-flash") || s.contains("gemini-2-5-flash") => "gemini-2.5-flash",
        s if s.contains("gemini-2.0-flash") || s.contains("gemini-2-0-flash") => "gemini-2.0-flash",
        s if s.contains("gemini-1.5-pro") || s.contains("gemini-1-5-pro") => "gemini-1.5-pro",
        s if s.contains("gemini-1.5-flash") || s.contains("gemini-1-5-flash") => "gemini-1.5-flash",

        _ => trimmed,
    }
}

/// Get pricing for a model. Returns None if the model is unknown.
pub fn rates_for_model(model: &str) -> Option<ModelRates> {
    let normalized = normalize_model(model);

    // Published list prices, $ per 1M tokens.
    let rates = match normalized {
        "claude-3-5-sonnet" => (3.00, 15.00),
        "claude-sonnet-4" => (3.00, 15.00),
        "claude-3-5-haiku" => (0.80, 4.00),
        "claude-haiku-4" => (0.80, 4.00),
        "claude-opus-4" => (15.00, 75.00),

        "gpt-4o" => (2.50, 10.00),
        "gpt-4o-mini" => (0.15, 0.60),
        "gpt-4-turbo" => (10.00, 30.00),
        "gpt-5" => (5.00, 15.00),
        "o3-mini" => (1.10, 4.40),
        "o4-mini" => (1.10, 4.40),

        "gemini-2.5-pro" => (1.25, 10.00),
        "gemini-2.5-flash" => (0.15, 0.60),
        "gemini-2.0-flash" => (0.10, 0.40),
        "gemini-1.5-pro" => (1.25, 5.00),
        "gemini-1.5-flash" => (0.075, 0.30),

        _ => return None,
    };

    Some(ModelRates {
        input_per_million: rates.0,
        output_per_million: rates.1,
    })
}

/// Dollar cost for a call, falling back to conservative rates for unknown
/// models (logged once per call at warn level).
pub fn cost_usd_for_usage(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match rates_for_model(model) {
        Some(rates) => rates.cost_usd(input_tokens, output_tokens),
        None => {
            tracing::warn!(
                model = %model,
                "Unknown model for cost calculation, applying conservative fallback rates"
            );
            FALLBACK_RATES.cost_usd(input_tokens, output_tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_model() {
        assert_eq!(
            normalize_model("claude-3-5-sonnet-20241022"),
            "claude-3-5-sonnet"
        );
        assert_eq!(
            normalize_model("claude-3.5-sonnet-latest"),
            "claude-3-5-sonnet"
        );
        assert_eq!(normalize_model("gpt-4o-2024-08-06"), "gpt-4o");
        assert_eq!(normalize_model("gemini-2.5-pro-preview"), "gemini-2.5-pro");
    }

    #[test]
    fn test_rates_for_known_models() {
        assert!(rates_for_model("claude-3-5-sonnet").is_some());
        assert!(rates_for_model("gpt-4o").is_some());
        assert!(rates_for_model("gemini-2.5-pro").is_some());
    }

    #[test]
    fn test_rates_for_unknown_model() {
        assert!(rates_for_model("completely-unknown-model").is_none());
    }

    #[test]
    fn test_cost_is_linear_in_tokens() {
        // Claude 3.5 Sonnet: $3/1M input, $15/1M output
        let rates = rates_for_model("claude-3-5-sonnet").unwrap();
        let cost = rates.cost_usd(1000, 500);
        let expected = 1000.0 * 3.0 / 1e6 + 500.0 * 15.0 / 1e6;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cost_zero_for_no_usage() {
        let rates = rates_for_model("gpt-4o").unwrap();
        assert_eq!(rates.cost_usd(0, 0), 0.0);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let cost = cost_usd_for_usage("mystery-model-v9", 1_000_000, 0);
        assert!((cost - FALLBACK_RATES.input_per_million).abs() < 1e-9);
    }
}
