use crate::domain::recommendation::{
    Explanation, PortfolioMetrics, Recommendation, RecommendationPacket, RecommendationStatus,
    TargetPosition,
};
use crate::market::MarketSnapshot;
use crate::pipeline::error::PipelineError;
use crate::pipeline::validate::ValidatedAdvice;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

/// What to attach when the reasoning step fails. Substituting model output
/// with a rule-based ranking is an explicit, auditable caller choice, never a
/// silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    #[default]
    None,
    /// Attach a mechanically computed top-N-by-quality-score explanation to
    /// the failed recommendation.
    QualityTopN,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: String,
    pub correlation_id: String,
    pub details: serde_json::Value,
}

pub fn success(
    owner: &str,
    correlation_id: &str,
    as_of_date: NaiveDate,
    benchmark_ticker: &str,
    advice: &ValidatedAdvice,
    snapshot: &MarketSnapshot,
) -> Recommendation {
    let packet = RecommendationPacket {
        as_of_date,
        benchmark_ticker: benchmark_ticker.to_string(),
        target_portfolio: advice.positions.clone(),
        metrics: portfolio_metrics(&advice.positions, snapshot),
    };

    Recommendation {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        status: RecommendationStatus::Completed,
        as_of_date,
        packet: Some(packet),
        explanation: Some(advice.explanation.clone()),
        error_detail: None,
        correlation_id: correlation_id.to_string(),
        generated_at: Utc::now(),
    }
}

pub fn failure(
    owner: &str,
    correlation_id: &str,
    as_of_date: NaiveDate,
    err: &PipelineError,
    fallback: FallbackPolicy,
    snapshot: Option<&MarketSnapshot>,
    max_holdings: usize,
) -> Recommendation {
    let explanation = match (fallback, snapshot) {
        (FallbackPolicy::QualityTopN, Some(snap)) if !snap.is_empty() => {
            Some(quality_top_n(snap, max_holdings))
        }
        _ => None,
    };

    Recommendation {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        status: RecommendationStatus::Failed,
        as_of_date,
        packet: None,
        explanation,
        error_detail: Some(err.to_string()),
        correlation_id: correlation_id.to_string(),
        generated_at: Utc::now(),
    }
}

pub fn audit_event(
    rec: &Recommendation,
    err: Option<&PipelineError>,
    flagged_tokens: &[String],
) -> AuditEvent {
    let action = match rec.status {
        RecommendationStatus::Completed => "recommendation_completed",
        _ => "recommendation_failed",
    };

    let mut details = serde_json::json!({
        "owner": rec.owner,
        "asOfDate": rec.as_of_date,
        "status": rec.status.as_str(),
        "recommendationId": rec.id,
    });
    if let Some(err) = err {
        details["errorCode"] = serde_json::Value::String(err.code().to_string());
        details["errorDetail"] = serde_json::Value::String(err.to_string());
    }
    if !flagged_tokens.is_empty() {
        details["flaggedTickers"] = serde_json::json!(flagged_tokens);
    }

    AuditEvent {
        action: action.to_string(),
        correlation_id: rec.correlation_id.clone(),
        details,
    }
}

/// Weight-weighted portfolio yield and beta from snapshot data. Missing
/// yields contribute zero; a missing beta falls back to the market's 1.0.
fn portfolio_metrics(positions: &[TargetPosition], snapshot: &MarketSnapshot) -> PortfolioMetrics {
    let mut portfolio_yield = 0.0;
    let mut beta = 0.0;
    for pos in positions {
        let entry = snapshot.entries.iter().find(|e| e.ticker == pos.ticker);
        portfolio_yield += pos.weight * entry.and_then(|e| e.dividend_yield).unwrap_or(0.0);
        beta += pos.weight * entry.and_then(|e| e.beta).unwrap_or(1.0);
    }
    PortfolioMetrics {
        portfolio_yield,
        beta,
    }
}

fn quality_top_n(snapshot: &MarketSnapshot, n: usize) -> Explanation {
    let mut scored: Vec<_> = snapshot
        .entries
        .iter()
        .filter_map(|e| e.quality.as_ref().map(|q| (q.quality_score, e.ticker.as_str())))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let bullets: Vec<String> = scored
        .iter()
        .take(n.max(1))
        .map(|(score, ticker)| format!("{ticker}: quality score {score}"))
        .collect();

    let bullets = if bullets.is_empty() {
        vec!["No fundamental data was available for any candidate.".to_string()]
    } else {
        bullets
    };

    Explanation {
        summary: "Rule-based ranking by computed quality score; the reasoning step did not produce a usable recommendation.".to_string(),
        bullets,
        risks_to_watch: vec![
            "This list is mechanical and ignores diversification and valuation.".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::QualityMetrics;
    use crate::market::SnapshotEntry;
    use crate::pipeline::error::{PipelineError, RejectReason};

    fn entry(ticker: &str, score: i32, dividend_yield: f64, beta: Option<f64>) -> SnapshotEntry {
        SnapshotEntry {
            ticker: ticker.to_string(),
            price: Some(100.0),
            quality: Some(QualityMetrics {
                ticker: ticker.to_string(),
                quality_score: score,
                leverage_flag: false,
                yield_trap_flag: false,
                dividend_cut_flag: false,
            }),
            dividend_yield: Some(dividend_yield),
            beta,
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            entries: vec![
                entry("JNJ", 100, 0.03, Some(0.5)),
                entry("MSFT", 70, 0.01, Some(0.9)),
                entry("T", 30, 0.06, None),
            ],
        }
    }

    fn advice() -> ValidatedAdvice {
        ValidatedAdvice {
            positions: vec![
                TargetPosition {
                    ticker: "JNJ".to_string(),
                    weight: 0.5,
                    rationale: "defensive".to_string(),
                },
                TargetPosition {
                    ticker: "MSFT".to_string(),
                    weight: 0.5,
                    rationale: "growth".to_string(),
                },
            ],
            explanation: Explanation {
                summary: "Balanced.".to_string(),
                bullets: vec!["half defensive".to_string()],
                risks_to_watch: vec![],
            },
            flagged_tokens: vec![],
        }
    }

    #[test]
    fn success_populates_packet_and_metrics() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let rec = success("user-1", "corr-1", date, "VIG", &advice(), &snapshot());

        assert_eq!(rec.status, RecommendationStatus::Completed);
        assert!(rec.error_detail.is_none());
        let packet = rec.packet.unwrap();
        assert_eq!(packet.benchmark_ticker, "VIG");
        assert_eq!(packet.target_portfolio.len(), 2);
        assert!((packet.metrics.portfolio_yield - 0.02).abs() < 1e-12);
        assert!((packet.metrics.beta - 0.7).abs() < 1e-12);
    }

    #[test]
    fn missing_beta_defaults_to_market() {
        let positions = vec![TargetPosition {
            ticker: "T".to_string(),
            weight: 1.0,
            rationale: "income".to_string(),
        }];
        let metrics = portfolio_metrics(&positions, &snapshot());
        assert!((metrics.beta - 1.0).abs() < 1e-12);
        assert!((metrics.portfolio_yield - 0.06).abs() < 1e-12);
    }

    #[test]
    fn failure_carries_error_code_in_detail() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let err = PipelineError::UpstreamUnavailable("HTTP 529".to_string());
        let rec = failure("user-1", "corr-1", date, &err, FallbackPolicy::None, None, 40);

        assert_eq!(rec.status, RecommendationStatus::Failed);
        assert!(rec.packet.is_none());
        assert!(rec.explanation.is_none());
        assert!(rec.error_detail.unwrap().contains("UpstreamUnavailable"));
    }

    #[test]
    fn fallback_ranks_by_quality_score() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let err = PipelineError::NoStructuredOutput {
            snippet: "sorry".to_string(),
        };
        let rec = failure(
            "user-1",
            "corr-1",
            date,
            &err,
            FallbackPolicy::QualityTopN,
            Some(&snapshot()),
            2,
        );

        let explanation = rec.explanation.unwrap();
        assert_eq!(explanation.bullets.len(), 2);
        assert!(explanation.bullets[0].starts_with("JNJ"));
        assert!(explanation.bullets[1].starts_with("MSFT"));
        assert!(rec.packet.is_none());
    }

    #[test]
    fn audit_event_reflects_outcome() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let rec = success("user-1", "corr-1", date, "VIG", &advice(), &snapshot());
        let event = audit_event(&rec, None, &["NVDA".to_string()]);
        assert_eq!(event.action, "recommendation_completed");
        assert_eq!(event.correlation_id, "corr-1");
        assert_eq!(event.details["flaggedTickers"][0], "NVDA");

        let err = PipelineError::InvalidModelOutput {
            reason: RejectReason::UnknownTicker,
            detail: "TSLA".to_string(),
        };
        let failed = failure("user-1", "corr-1", date, &err, FallbackPolicy::None, None, 40);
        let event = audit_event(&failed, Some(&err), &[]);
        assert_eq!(event.action, "recommendation_failed");
        assert_eq!(event.details["errorCode"], "InvalidModelOutput");
    }
}
