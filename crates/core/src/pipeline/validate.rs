//! Output validation for untrusted model responses. Gates run in a fixed
//! order (schema, universe, numeric) and the first failure aborts with its
//! specific reason; nothing is ever repaired or renormalized on the model's
//! behalf.

use crate::domain::contract::ModelAdvice;
use crate::domain::recommendation::{Constraints, Explanation, TargetPosition};
use crate::pipeline::error::{PipelineError, RejectReason};
use crate::pipeline::gateway::snippet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// Tunable floor for `explanation.summary` after trimming.
pub const MIN_SUMMARY_CHARS: usize = 1;

static TICKER_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,5}\b").expect("ticker pattern"));

// Finance shorthand that looks like a ticker but never is one. Keeps the
// prose scan from crying wolf on ordinary commentary.
const KNOWN_ACRONYMS: &[&str] = &[
    "ETF", "GDP", "EPS", "USD", "USA", "CPI", "CAGR", "FCF", "ROIC", "LLC", "INC",
];

/// Advice that has passed every gate. Immutable by convention: downstream
/// code only reads it.
#[derive(Debug, Clone)]
pub struct ValidatedAdvice {
    pub positions: Vec<TargetPosition>,
    pub explanation: Explanation,
    /// Ticker-shaped tokens found in the prose that are neither in the
    /// universe nor allowlisted. Surfaced for audit, never grounds for
    /// rejection on their own.
    pub flagged_tokens: Vec<String>,
}

pub fn validate(
    payload: &str,
    universe: &BTreeSet<String>,
    constraints: &Constraints,
) -> Result<ValidatedAdvice, PipelineError> {
    let advice = check_schema(payload, constraints)?;
    check_universe(&advice, universe)?;
    let flagged_tokens = scan_prose(&advice, universe, &constraints.benchmark_ticker);
    check_weights(&advice)?;

    let positions = advice
        .target_portfolio
        .into_iter()
        .map(|p| TargetPosition {
            ticker: p.ticker.trim().to_string(),
            weight: p.weight,
            rationale: p.rationale.trim().to_string(),
        })
        .collect();

    let explanation = Explanation {
        summary: advice.explanation.summary.trim().to_string(),
        bullets: advice.explanation.bullets,
        risks_to_watch: advice.explanation.risks_to_watch,
    };

    Ok(ValidatedAdvice {
        positions,
        explanation,
        flagged_tokens,
    })
}

fn check_schema(payload: &str, constraints: &Constraints) -> Result<ModelAdvice, PipelineError> {
    let advice = serde_json::from_str::<ModelAdvice>(payload).map_err(|e| schema_violation(format!("{e}")))?;

    if advice.target_portfolio.is_empty() {
        return Err(schema_violation("targetPortfolio must be non-empty".to_string()));
    }
    if advice.target_portfolio.len() > constraints.max_holdings {
        return Err(schema_violation(format!(
            "targetPortfolio has {} entries (max {})",
            advice.target_portfolio.len(),
            constraints.max_holdings
        )));
    }

    let mut seen = BTreeSet::new();
    for pos in &advice.target_portfolio {
        let ticker = pos.ticker.trim();
        if ticker.is_empty() {
            return Err(schema_violation("ticker must be non-empty".to_string()));
        }
        if !seen.insert(ticker.to_string()) {
            return Err(schema_violation(format!("duplicate ticker {ticker}")));
        }
        if pos.rationale.trim().is_empty() {
            return Err(schema_violation(format!("empty rationale for {ticker}")));
        }
    }

    if advice.explanation.summary.trim().chars().count() < MIN_SUMMARY_CHARS {
        return Err(schema_violation("explanation.summary is empty".to_string()));
    }
    if advice.explanation.bullets.is_empty() {
        return Err(schema_violation("explanation.bullets must have at least one entry".to_string()));
    }

    Ok(advice)
}

/// Hallucination Guard. A ticker the system never offered as context must
/// never reach a consumer as if it were vetted.
fn check_universe(advice: &ModelAdvice, universe: &BTreeSet<String>) -> Result<(), PipelineError> {
    for pos in &advice.target_portfolio {
        let ticker = pos.ticker.trim();
        if !universe.contains(ticker) {
            return Err(PipelineError::InvalidModelOutput {
                reason: RejectReason::UnknownTicker,
                detail: format!("{ticker} is not in the supplied universe"),
            });
        }
    }
    Ok(())
}

/// Soft companion to the guard: surface ticker-shaped tokens in the prose
/// that the structured check cannot see. Logged and reported, not rejected.
fn scan_prose(advice: &ModelAdvice, universe: &BTreeSet<String>, benchmark: &str) -> Vec<String> {
    let mut prose = String::new();
    prose.push_str(&advice.explanation.summary);
    for s in advice
        .explanation
        .bullets
        .iter()
        .chain(advice.explanation.risks_to_watch.iter())
        .chain(advice.target_portfolio.iter().map(|p| &p.rationale))
    {
        prose.push('\n');
        prose.push_str(s);
    }

    let mut flagged = BTreeSet::new();
    for m in TICKER_LIKE.find_iter(&prose) {
        let token = m.as_str();
        if KNOWN_ACRONYMS.contains(&token) || token == benchmark || universe.contains(token) {
            continue;
        }
        flagged.insert(token.to_string());
    }

    let flagged: Vec<String> = flagged.into_iter().collect();
    if !flagged.is_empty() {
        tracing::warn!(tokens = ?flagged, "possible hallucinated tickers in explanation prose");
    }
    flagged
}

fn check_weights(advice: &ModelAdvice) -> Result<(), PipelineError> {
    let mut sum = 0.0;
    for pos in &advice.target_portfolio {
        let w = pos.weight;
        if !w.is_finite() || w < 0.0 || w > 1.0 + WEIGHT_SUM_TOLERANCE {
            return Err(PipelineError::InvalidModelOutput {
                reason: RejectReason::WeightsUnnormalized,
                detail: format!("weight {w} for {} is out of [0, 1]", pos.ticker.trim()),
            });
        }
        sum += w;
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(PipelineError::InvalidModelOutput {
            reason: RejectReason::WeightsUnnormalized,
            detail: format!("weights sum to {sum:.6}, expected 1.0 +/- {WEIGHT_SUM_TOLERANCE}"),
        });
    }
    Ok(())
}

fn schema_violation(detail: String) -> PipelineError {
    PipelineError::InvalidModelOutput {
        reason: RejectReason::SchemaViolation,
        detail: snippet(&detail, 240),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn universe(tickers: &[&str]) -> BTreeSet<String> {
        tickers.iter().map(|s| s.to_string()).collect()
    }

    fn constraints() -> Constraints {
        Constraints {
            max_holdings: 40,
            payout_ceiling: 0.8,
            leverage_ceiling: 2.0,
            benchmark_ticker: "VIG".to_string(),
            watchlist: vec![],
        }
    }

    fn advice_json(portfolio: serde_json::Value) -> String {
        json!({
            "targetPortfolio": portfolio,
            "explanation": {
                "summary": "Hold quality dividend payers.",
                "bullets": ["stable cash flows"],
                "risksToWatch": ["rate hikes"]
            }
        })
        .to_string()
    }

    fn reason_of(err: PipelineError) -> RejectReason {
        match err {
            PipelineError::InvalidModelOutput { reason, .. } => reason,
            other => panic!("expected InvalidModelOutput, got {other}"),
        }
    }

    #[test]
    fn accepts_clean_advice() {
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.6, "rationale": "core holding"},
            {"ticker": "JNJ", "weight": 0.4, "rationale": "defensive"}
        ]));
        let out = validate(&payload, &universe(&["MSFT", "JNJ"]), &constraints()).unwrap();
        assert_eq!(out.positions.len(), 2);
        assert_eq!(out.positions[0].ticker, "MSFT");
        assert!(out.flagged_tokens.is_empty());
    }

    #[test]
    fn rejects_ticker_outside_universe() {
        let payload = advice_json(json!([
            {"ticker": "TSLA", "weight": 1.0, "rationale": "growth"}
        ]));
        let err = validate(&payload, &universe(&["AAPL", "MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::UnknownTicker);
    }

    #[test]
    fn rejects_unnormalized_weight_sum() {
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.5, "rationale": "a"},
            {"ticker": "JNJ", "weight": 0.3, "rationale": "b"}
        ]));
        let err = validate(&payload, &universe(&["MSFT", "JNJ"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::WeightsUnnormalized);
    }

    #[test]
    fn accepts_weights_summing_to_one() {
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.6, "rationale": "a"},
            {"ticker": "JNJ", "weight": 0.4, "rationale": "b"}
        ]));
        assert!(validate(&payload, &universe(&["MSFT", "JNJ"]), &constraints()).is_ok());
    }

    #[test]
    fn rejects_negative_weight() {
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": -0.1, "rationale": "a"},
            {"ticker": "JNJ", "weight": 1.1, "rationale": "b"}
        ]));
        let err = validate(&payload, &universe(&["MSFT", "JNJ"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::WeightsUnnormalized);
    }

    #[test]
    fn never_renormalizes_close_misses() {
        // 0.99 is materially different from what was explained; fail closed.
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.99, "rationale": "a"}
        ]));
        let err = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::WeightsUnnormalized);
    }

    #[test]
    fn tolerance_admits_rounding_noise() {
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.3334, "rationale": "a"},
            {"ticker": "JNJ", "weight": 0.3333, "rationale": "b"},
            {"ticker": "KO", "weight": 0.3333, "rationale": "c"}
        ]));
        assert!(validate(&payload, &universe(&["MSFT", "JNJ", "KO"]), &constraints()).is_ok());
    }

    #[test]
    fn rejects_missing_field_as_schema_violation() {
        let payload = json!({
            "targetPortfolio": [{"ticker": "MSFT", "weight": 1.0, "rationale": "a"}]
        })
        .to_string();
        let err = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::SchemaViolation);
    }

    #[test]
    fn rejects_empty_portfolio() {
        let payload = advice_json(json!([]));
        let err = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::SchemaViolation);
    }

    #[test]
    fn rejects_portfolio_over_max_holdings() {
        let mut cons = constraints();
        cons.max_holdings = 1;
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.5, "rationale": "a"},
            {"ticker": "JNJ", "weight": 0.5, "rationale": "b"}
        ]));
        let err = validate(&payload, &universe(&["MSFT", "JNJ"]), &cons).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::SchemaViolation);
    }

    #[test]
    fn rejects_duplicate_tickers() {
        let payload = advice_json(json!([
            {"ticker": "MSFT", "weight": 0.5, "rationale": "a"},
            {"ticker": "MSFT", "weight": 0.5, "rationale": "b"}
        ]));
        let err = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::SchemaViolation);
    }

    #[test]
    fn rejects_empty_summary() {
        let payload = json!({
            "targetPortfolio": [{"ticker": "MSFT", "weight": 1.0, "rationale": "a"}],
            "explanation": {"summary": "  ", "bullets": ["b"], "risksToWatch": []}
        })
        .to_string();
        let err = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::SchemaViolation);
    }

    #[test]
    fn schema_gate_runs_before_universe_gate() {
        // Both violations present; the schema one must win.
        let payload = json!({
            "targetPortfolio": [{"ticker": "TSLA", "weight": 1.0, "rationale": "a"}],
            "explanation": {"summary": "s", "bullets": [], "risksToWatch": []}
        })
        .to_string();
        let err = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap_err();
        assert_eq!(reason_of(err), RejectReason::SchemaViolation);
    }

    #[test]
    fn prose_scan_flags_unknown_tokens_without_rejecting() {
        let payload = json!({
            "targetPortfolio": [{"ticker": "MSFT", "weight": 1.0, "rationale": "beats NVDA on yield"}],
            "explanation": {
                "summary": "Prefer MSFT over AMD here.",
                "bullets": ["the ETF wrapper and GDP trends are tailwinds"],
                "risksToWatch": ["VIG tracking drift"]
            }
        })
        .to_string();
        let out = validate(&payload, &universe(&["MSFT"]), &constraints()).unwrap();
        assert_eq!(out.flagged_tokens, vec!["AMD".to_string(), "NVDA".to_string()]);
    }
}
