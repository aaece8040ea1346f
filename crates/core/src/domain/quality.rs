use crate::domain::market::FundamentalRecord;
use serde::{Deserialize, Serialize};

// Safety-gate policy constants. A payout ratio above the ceiling marks a
// likely yield trap; leverage above the ceiling marks balance-sheet risk.
pub const PAYOUT_RATIO_THRESHOLD: f64 = 0.8;
pub const PAYOUT_PENALTY: i32 = 40;
pub const DEBT_TO_EQUITY_THRESHOLD: f64 = 2.0;
pub const LEVERAGE_PENALTY: i32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub ticker: String,
    pub quality_score: i32,
    pub leverage_flag: bool,
    pub yield_trap_flag: bool,
    pub dividend_cut_flag: bool,
}

/// Derives safety/quality metrics from one fundamental record. Total over all
/// inputs: non-finite ratios score as zero instead of poisoning the result.
pub fn score(record: &FundamentalRecord) -> QualityMetrics {
    let payout_ratio = finite_or_zero(record.payout_ratio);
    let debt_to_equity = finite_or_zero(record.debt_to_equity);

    let yield_trap_flag = payout_ratio > PAYOUT_RATIO_THRESHOLD;
    let leverage_flag = debt_to_equity > DEBT_TO_EQUITY_THRESHOLD;

    let mut quality_score = 100;
    if yield_trap_flag {
        quality_score -= PAYOUT_PENALTY;
    }
    if leverage_flag {
        quality_score -= LEVERAGE_PENALTY;
    }

    QualityMetrics {
        ticker: record.ticker.clone(),
        quality_score: quality_score.max(0),
        leverage_flag,
        yield_trap_flag,
        // The cut detector runs ingestion-side; pass its verdict through.
        dividend_cut_flag: record.dividend_cut,
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(payout_ratio: f64, debt_to_equity: f64) -> FundamentalRecord {
        FundamentalRecord {
            ticker: "MSFT".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            payout_ratio,
            debt_to_equity,
            dividend_yield: 0.01,
            beta: None,
            dividend_cut: false,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn healthy_company_scores_full() {
        let m = score(&record(0.3, 0.5));
        assert_eq!(m.quality_score, 100);
        assert!(!m.leverage_flag);
        assert!(!m.yield_trap_flag);
    }

    #[test]
    fn flags_yield_trap() {
        let m = score(&record(0.95, 0.5));
        assert_eq!(m.quality_score, 60);
        assert!(m.yield_trap_flag);
        assert!(!m.leverage_flag);
    }

    #[test]
    fn flags_high_leverage() {
        let m = score(&record(0.3, 2.5));
        assert_eq!(m.quality_score, 70);
        assert!(m.leverage_flag);
    }

    #[test]
    fn both_penalties_stack() {
        let m = score(&record(0.95, 2.5));
        assert_eq!(m.quality_score, 30);
        assert!(m.leverage_flag);
        assert!(m.yield_trap_flag);
    }

    #[test]
    fn score_stays_within_bounds() {
        for payout in [0.0, 0.5, 0.8, 0.81, 10.0, f64::INFINITY, f64::NAN] {
            for dte in [0.0, 1.0, 2.0, 2.01, 100.0, f64::INFINITY, f64::NAN] {
                let m = score(&record(payout, dte));
                assert!((0..=100).contains(&m.quality_score), "payout={payout} dte={dte}");
            }
        }
    }

    #[test]
    fn thresholds_are_exclusive() {
        // Exactly at the ceiling is still acceptable.
        let m = score(&record(0.8, 2.0));
        assert_eq!(m.quality_score, 100);
    }

    #[test]
    fn scoring_is_idempotent() {
        let r = record(0.9, 1.0);
        assert_eq!(score(&r), score(&r));
    }

    #[test]
    fn cut_flag_passes_through() {
        let mut r = record(0.3, 0.5);
        r.dividend_cut = true;
        assert!(score(&r).dividend_cut_flag);
        // The flag does not feed the score.
        assert_eq!(score(&r).quality_score, 100);
    }
}
