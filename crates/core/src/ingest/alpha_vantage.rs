use crate::config::Settings;
use crate::domain::market::FundamentalRecord;
use crate::ingest::{DailyClose, DividendPayment, FundamentalsProvider, RetryPolicy};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AlphaVantageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl AlphaVantageClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_market_data_base_url()?.to_string();
        let api_key = settings
            .market_data_api_key
            .clone()
            .context("MARKET_DATA_API_KEY is required")?;

        let timeout_secs = std::env::var("MARKET_DATA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retry: RetryPolicy::from_env(),
        })
    }

    async fn query_once(&self, function: &str, symbol: &str) -> Result<Value> {
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .get(url)
            .query(&[
                ("function", function),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("market data request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read market data response")?;
        let raw = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("market data response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("market data HTTP {status}: {raw}");
        }
        // The provider reports throttling and bad symbols inside a 200 body.
        if let Some(note) = raw.get("Note").and_then(Value::as_str) {
            anyhow::bail!("market data throttled: {note}");
        }
        if let Some(msg) = raw.get("Error Message").and_then(Value::as_str) {
            anyhow::bail!("market data error for {symbol}: {msg}");
        }

        Ok(raw)
    }

    async fn query(&self, function: &str, symbol: &str) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.query_once(function, symbol).await {
                Ok(raw) => return Ok(raw),
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let backoff = self.retry.backoff_for(attempt);
                    tracing::warn!(attempt, ?backoff, %symbol, error = %err, "market data fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl FundamentalsProvider for AlphaVantageClient {
    fn provider_name(&self) -> &'static str {
        "alpha_vantage"
    }

    async fn fetch_fundamentals(
        &self,
        ticker: &str,
        as_of_date: NaiveDate,
    ) -> Result<FundamentalRecord> {
        let raw = self.query("OVERVIEW", ticker).await?;
        Ok(parse_overview(ticker, as_of_date, raw))
    }

    async fn fetch_daily_series(
        &self,
        ticker: &str,
    ) -> Result<(Vec<DailyClose>, Vec<DividendPayment>)> {
        let raw = self.query("TIME_SERIES_DAILY_ADJUSTED", ticker).await?;
        Ok(parse_daily_series(&raw))
    }
}

/// OVERVIEW payloads carry numbers as strings ("0.2456"), "None" for absent
/// values, and occasionally real numbers; read all three.
fn num_field(raw: &Value, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn parse_overview(ticker: &str, as_of_date: NaiveDate, raw: Value) -> FundamentalRecord {
    FundamentalRecord {
        ticker: ticker.to_string(),
        as_of_date,
        payout_ratio: num_field(&raw, "PayoutRatio").unwrap_or(0.0),
        debt_to_equity: num_field(&raw, "DebtToEquityRatioTTM").unwrap_or(0.0),
        dividend_yield: num_field(&raw, "DividendYield").unwrap_or(0.0),
        beta: num_field(&raw, "Beta"),
        // The cut detector runs over dividend history, not this payload.
        dividend_cut: false,
        raw,
    }
}

pub fn parse_daily_series(raw: &Value) -> (Vec<DailyClose>, Vec<DividendPayment>) {
    let mut closes = Vec::new();
    let mut dividends = Vec::new();

    let Some(series) = raw.get("Time Series (Daily)").and_then(Value::as_object) else {
        return (closes, dividends);
    };

    for (date_str, bar) in series {
        let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        if let Some(close) = num_field(bar, "4. close") {
            closes.push(DailyClose { date, close });
        }
        if let Some(amount) = num_field(bar, "7. dividend amount") {
            if amount > 0.0 {
                dividends.push(DividendPayment {
                    ex_date: date,
                    amount,
                });
            }
        }
    }

    closes.sort_by_key(|c| c.date);
    dividends.sort_by_key(|d| d.ex_date);
    (closes, dividends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_overview_string_numbers() {
        let as_of = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let raw = json!({
            "Symbol": "MSFT",
            "PayoutRatio": "0.2456",
            "DebtToEquityRatioTTM": "0.42",
            "DividendYield": "0.0081",
            "Beta": "0.89"
        });

        let rec = parse_overview("MSFT", as_of, raw);
        assert_eq!(rec.ticker, "MSFT");
        assert!((rec.payout_ratio - 0.2456).abs() < 1e-12);
        assert!((rec.debt_to_equity - 0.42).abs() < 1e-12);
        assert_eq!(rec.beta, Some(0.89));
        assert!(!rec.dividend_cut);
    }

    #[test]
    fn absent_or_none_fields_become_zero() {
        let as_of = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let raw = json!({
            "Symbol": "NEWCO",
            "PayoutRatio": "None",
            "Beta": "None"
        });

        let rec = parse_overview("NEWCO", as_of, raw);
        assert_eq!(rec.payout_ratio, 0.0);
        assert_eq!(rec.debt_to_equity, 0.0);
        assert_eq!(rec.dividend_yield, 0.0);
        assert_eq!(rec.beta, None);
    }

    #[test]
    fn parses_daily_series_closes_and_dividends() {
        let raw = json!({
            "Time Series (Daily)": {
                "2026-07-30": {"4. close": "418.20", "7. dividend amount": "0.0000"},
                "2026-07-31": {"4. close": "420.00", "7. dividend amount": "0.7500"},
                "not-a-date": {"4. close": "1.0"}
            }
        });

        let (closes, dividends) = parse_daily_series(&raw);
        assert_eq!(closes.len(), 2);
        assert_eq!(closes[1].close, 420.0);
        assert_eq!(dividends.len(), 1);
        assert_eq!(
            dividends[0].ex_date,
            NaiveDate::from_ymd_opt(2026, 7, 31).unwrap()
        );
    }

    #[test]
    fn missing_series_yields_empty_results() {
        let raw = json!({"Note": "rate limited"});
        let (closes, dividends) = parse_daily_series(&raw);
        assert!(closes.is_empty());
        assert!(dividends.is_empty());
    }
}
