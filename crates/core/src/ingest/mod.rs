pub mod alpha_vantage;

use anyhow::Result;
use chrono::NaiveDate;
use std::time::Duration;

use crate::domain::market::FundamentalRecord;

/// Explicit retry policy for provider fetches. Replaces sleep loops scattered
/// through handlers with one object the caller configures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Ok(s) = std::env::var("MARKET_DATA_RETRIES") {
            if let Ok(n) = s.parse::<u32>() {
                out.max_attempts = n.max(1);
            }
        }
        if let Ok(s) = std::env::var("MARKET_DATA_BACKOFF_MS") {
            if let Ok(n) = s.parse::<u64>() {
                out.base_backoff = Duration::from_millis(n);
            }
        }
        out
    }

    /// Doubling backoff: base, 2*base, 4*base, ...
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DividendPayment {
    pub ex_date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

#[async_trait::async_trait]
pub trait FundamentalsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_fundamentals(
        &self,
        ticker: &str,
        as_of_date: NaiveDate,
    ) -> Result<FundamentalRecord>;

    /// Daily close history plus dividend payments, both oldest-first. One
    /// provider call serves both.
    async fn fetch_daily_series(
        &self,
        ticker: &str,
    ) -> Result<(Vec<DailyClose>, Vec<DividendPayment>)>;
}

/// Ingestion-side cut detector: any payment strictly below its predecessor
/// (chronologically) marks a cut. The scorer downstream only reads the flag.
pub fn detect_dividend_cut(history: &[DividendPayment]) -> bool {
    let mut sorted: Vec<&DividendPayment> = history.iter().collect();
    sorted.sort_by_key(|p| p.ex_date);

    sorted.windows(2).any(|w| w[1].amount < w[0].amount)
}
