use crate::domain::market::FundamentalRecord;
use crate::domain::quality::{self, QualityMetrics};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;

/// Read-only lookups over the shared market store. Implementations must
/// answer `Ok(None)` for tickers they have no data for; `Err` is reserved for
/// transport/storage failures.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn latest_fundamental(&self, ticker: &str) -> Result<Option<FundamentalRecord>>;
    async fn latest_price(&self, ticker: &str) -> Result<Option<f64>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub ticker: String,
    pub price: Option<f64>,
    pub quality: Option<QualityMetrics>,
    pub dividend_yield: Option<f64>,
    pub beta: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl MarketSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tickers(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.ticker.clone()).collect()
    }
}

/// Aggregates quality metrics and latest prices for a set of tickers.
///
/// Tickers without fundamental data stay in the snapshot with `quality: None`
/// so the reasoning step sees the gap instead of a silently shrunken
/// universe. An empty ticker set yields an empty snapshot; whether that is
/// fatal is the caller's call.
pub async fn build_snapshot(
    tickers: &BTreeSet<String>,
    source: &dyn MarketDataSource,
) -> Result<MarketSnapshot> {
    let mut entries = Vec::with_capacity(tickers.len());

    for ticker in tickers {
        let fundamental = source.latest_fundamental(ticker).await?;
        let price = source.latest_price(ticker).await?;

        let (quality, dividend_yield, beta) = match &fundamental {
            Some(rec) => (
                Some(quality::score(rec)),
                Some(rec.dividend_yield),
                rec.beta,
            ),
            None => {
                tracing::debug!(%ticker, "no fundamental data; including as gap");
                (None, None, None)
            }
        };

        entries.push(SnapshotEntry {
            ticker: ticker.clone(),
            price,
            quality,
            dividend_yield,
            beta,
        });
    }

    Ok(MarketSnapshot { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    struct FakeSource {
        fundamentals: BTreeMap<String, FundamentalRecord>,
        prices: BTreeMap<String, f64>,
    }

    #[async_trait::async_trait]
    impl MarketDataSource for FakeSource {
        async fn latest_fundamental(&self, ticker: &str) -> Result<Option<FundamentalRecord>> {
            Ok(self.fundamentals.get(ticker).cloned())
        }

        async fn latest_price(&self, ticker: &str) -> Result<Option<f64>> {
            Ok(self.prices.get(ticker).copied())
        }
    }

    fn fundamental(ticker: &str) -> FundamentalRecord {
        FundamentalRecord {
            ticker: ticker.to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            payout_ratio: 0.3,
            debt_to_equity: 0.5,
            dividend_yield: 0.02,
            beta: Some(0.9),
            dividend_cut: false,
            raw: serde_json::Value::Null,
        }
    }

    fn tickers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn includes_data_gaps_instead_of_dropping() {
        let source = FakeSource {
            fundamentals: [("MSFT".to_string(), fundamental("MSFT"))].into(),
            prices: [("MSFT".to_string(), 420.0)].into(),
        };

        let snapshot = build_snapshot(&tickers(&["MSFT", "XYZ"]), &source)
            .await
            .unwrap();

        assert_eq!(snapshot.entries.len(), 2);
        let xyz = snapshot.entries.iter().find(|e| e.ticker == "XYZ").unwrap();
        assert!(xyz.quality.is_none());
        assert!(xyz.price.is_none());
        let msft = snapshot.entries.iter().find(|e| e.ticker == "MSFT").unwrap();
        assert_eq!(msft.quality.as_ref().unwrap().quality_score, 100);
        assert_eq!(msft.price, Some(420.0));
    }

    #[tokio::test]
    async fn empty_ticker_set_yields_empty_snapshot() {
        let source = FakeSource {
            fundamentals: BTreeMap::new(),
            prices: BTreeMap::new(),
        };
        let snapshot = build_snapshot(&BTreeSet::new(), &source).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn entries_follow_ticker_order() {
        let source = FakeSource {
            fundamentals: BTreeMap::new(),
            prices: BTreeMap::new(),
        };
        let snapshot = build_snapshot(&tickers(&["JNJ", "AAPL", "MSFT"]), &source)
            .await
            .unwrap();
        let order: Vec<_> = snapshot.entries.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(order, vec!["AAPL", "JNJ", "MSFT"]);
    }
}
