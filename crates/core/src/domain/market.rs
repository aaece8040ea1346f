use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Latest-known fundamentals for one ticker. Rows are immutable once written;
/// a newer `as_of_date` supersedes rather than overwrites, and the active
/// record is always latest-by-date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalRecord {
    pub ticker: String,
    pub as_of_date: NaiveDate,

    // Providers omit these fields for tickers with no dividend program or no
    // reported balance sheet; absent values score as zero, not as null.
    #[serde(default)]
    pub payout_ratio: f64,
    #[serde(default)]
    pub debt_to_equity: f64,
    #[serde(default)]
    pub dividend_yield: f64,

    #[serde(default)]
    pub beta: Option<f64>,

    /// Set by the ingestion-side dividend-history detector, carried through
    /// scoring unchanged.
    #[serde(default)]
    pub dividend_cut: bool,

    /// Opaque provider payload kept for audit/debugging.
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub owner: String,
    pub ticker: String,
    pub shares: f64,
    pub cost_basis: f64,
    pub purchase_date: NaiveDate,
}

/// Exchange symbols are 1-5 uppercase ASCII letters.
pub fn is_valid_ticker(s: &str) -> bool {
    let len = s.len();
    (1..=5).contains(&len) && s.bytes().all(|b| b.is_ascii_uppercase())
}
