use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User-supplied knobs for one advisory run. `max_holdings` is additionally
/// capped by [`crate::pipeline::MAX_HOLDINGS_CEILING`] at the pipeline
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    pub max_holdings: usize,
    pub payout_ceiling: f64,
    pub leverage_ceiling: f64,
    pub benchmark_ticker: String,
    #[serde(default)]
    pub watchlist: Vec<String>,
}

/// Canonical persisted shape. Field names are the wire contract shared with
/// already-persisted rows; keep them stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationPacket {
    pub as_of_date: NaiveDate,
    pub benchmark_ticker: String,
    pub target_portfolio: Vec<TargetPosition>,
    pub metrics: PortfolioMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPosition {
    pub ticker: String,
    pub weight: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    #[serde(rename = "yield")]
    pub portfolio_yield: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub summary: String,
    pub bullets: Vec<String>,
    pub risks_to_watch: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Pending,
    Completed,
    Failed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Terminal advisory artifact. Never mutated after reaching COMPLETED or
/// FAILED; a retry creates a new row under a fresh correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub owner: String,
    pub status: RecommendationStatus,
    pub as_of_date: NaiveDate,
    pub packet: Option<RecommendationPacket>,
    pub explanation: Option<Explanation>,
    pub error_detail: Option<String>,
    pub correlation_id: String,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_serializes_with_contract_field_names() {
        let packet = RecommendationPacket {
            as_of_date: NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            benchmark_ticker: "VIG".to_string(),
            target_portfolio: vec![TargetPosition {
                ticker: "MSFT".to_string(),
                weight: 1.0,
                rationale: "core holding".to_string(),
            }],
            metrics: PortfolioMetrics {
                portfolio_yield: 0.028,
                beta: 0.85,
            },
        };

        let v = serde_json::to_value(&packet).unwrap();
        assert!(v.get("targetPortfolio").is_some());
        assert!(v.get("benchmarkTicker").is_some());
        assert!(v["metrics"].get("yield").is_some());
        assert_eq!(v["targetPortfolio"][0]["ticker"], "MSFT");
    }

    #[test]
    fn status_round_trips_as_screaming_case() {
        let s = serde_json::to_string(&RecommendationStatus::Completed).unwrap();
        assert_eq!(s, "\"COMPLETED\"");
        let back: RecommendationStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(back, RecommendationStatus::Failed);
    }
}
