pub mod assemble;
pub mod error;
pub mod gateway;
pub mod prompt;
pub mod validate;

pub use assemble::{AuditEvent, FallbackPolicy};
pub use error::{PipelineError, RejectReason};

use crate::domain::market::{is_valid_ticker, Holding};
use crate::domain::recommendation::{Constraints, Recommendation};
use crate::llm::ReasoningClient;
use crate::market::{self, MarketDataSource, MarketSnapshot};
use crate::pipeline::prompt::PromptRequest;
use crate::pipeline::validate::ValidatedAdvice;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

pub const MAX_HOLDINGS_CEILING: usize = 100;

// Persisting the result is the one step retried locally: losing it would make
// the whole run unobservable.
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BASE_BACKOFF_MS: u64 = 200;

#[async_trait::async_trait]
pub trait HoldingsSource: Send + Sync {
    async fn fetch_holdings(&self, owner: &str) -> anyhow::Result<Vec<Holding>>;
}

#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn persist(&self, rec: &Recommendation) -> anyhow::Result<Uuid>;
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Explicitly constructed collaborators, injected per run. No module-level
/// clients: tests substitute fakes without process-wide state.
pub struct PipelineDeps<'a> {
    pub market: &'a dyn MarketDataSource,
    pub holdings: &'a dyn HoldingsSource,
    pub reasoning: &'a dyn ReasoningClient,
    pub store: &'a dyn RecommendationStore,
    pub audit: &'a dyn AuditSink,
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub owner: String,
    pub constraints: Constraints,
    pub correlation_id: String,
    pub as_of_date: NaiveDate,
    pub fallback: FallbackPolicy,
}

/// Runs one advisory attempt end to end. The reasoning model is invoked at
/// most once; callers wanting a retry start a fresh run under a new
/// correlation id so the prompt reflects current market data.
///
/// `Err` is returned only when the request never started
/// (`InvalidConstraints`) or when the terminal record could not be written
/// (`PersistenceFailure`). Every other failure still yields a persisted
/// FAILED recommendation plus one audit event.
pub async fn run_recommendation_pipeline(
    deps: &PipelineDeps<'_>,
    req: &PipelineRequest,
) -> Result<Recommendation, PipelineError> {
    check_constraints(&req.constraints)?;

    let (rec, stage_err, flagged) = match run_stages(deps, req).await {
        Ok(Staged { snapshot, advice }) => {
            let flagged = advice.flagged_tokens.clone();
            let rec = assemble::success(
                &req.owner,
                &req.correlation_id,
                req.as_of_date,
                &req.constraints.benchmark_ticker,
                &advice,
                &snapshot,
            );
            (rec, None, flagged)
        }
        Err(StageFailure { error, snapshot }) => {
            tracing::warn!(
                correlation_id = %req.correlation_id,
                code = error.code(),
                error = %error,
                "pipeline stage failed"
            );
            let rec = assemble::failure(
                &req.owner,
                &req.correlation_id,
                req.as_of_date,
                &error,
                req.fallback,
                snapshot.as_ref(),
                req.constraints.max_holdings,
            );
            (rec, Some(error), Vec::new())
        }
    };

    // Exactly one audit event per invocation, attempted even when persistence
    // itself is the thing that failed.
    match persist_with_retry(deps.store, &rec).await {
        Ok(id) => {
            emit_audit(deps.audit, &assemble::audit_event(&rec, stage_err.as_ref(), &flagged)).await;
            tracing::info!(
                correlation_id = %req.correlation_id,
                recommendation_id = %id,
                status = rec.status.as_str(),
                "recommendation persisted"
            );
            Ok(rec)
        }
        Err(persist_err) => {
            let event = AuditEvent {
                action: "recommendation_failed".to_string(),
                correlation_id: rec.correlation_id.clone(),
                details: serde_json::json!({
                    "owner": rec.owner,
                    "asOfDate": rec.as_of_date,
                    "errorCode": persist_err.code(),
                    "errorDetail": persist_err.to_string(),
                }),
            };
            emit_audit(deps.audit, &event).await;
            Err(persist_err)
        }
    }
}

struct Staged {
    snapshot: MarketSnapshot,
    advice: ValidatedAdvice,
}

struct StageFailure {
    error: PipelineError,
    snapshot: Option<MarketSnapshot>,
}

async fn run_stages(
    deps: &PipelineDeps<'_>,
    req: &PipelineRequest,
) -> Result<Staged, StageFailure> {
    let holdings = deps
        .holdings
        .fetch_holdings(&req.owner)
        .await
        .map_err(|e| StageFailure {
            error: PipelineError::UpstreamUnavailable(format!("holdings lookup: {e:#}")),
            snapshot: None,
        })?;

    let tickers = ticker_set(&holdings, &req.constraints);
    if tickers.is_empty() {
        return Err(StageFailure {
            error: PipelineError::InvalidConstraints(
                "nothing to analyze: owner has no holdings and no watchlist".to_string(),
            ),
            snapshot: None,
        });
    }

    let snapshot = market::build_snapshot(&tickers, deps.market)
        .await
        .map_err(|e| StageFailure {
            error: PipelineError::Timeout(format!("market lookup: {e:#}")),
            snapshot: None,
        })?;

    let prompt = PromptRequest::build(&holdings, &snapshot, &req.constraints, req.as_of_date);

    let payload = gateway::request_advice(deps.reasoning, &prompt, gateway::DEFAULT_MAX_TOKENS)
        .await
        .map_err(|error| StageFailure {
            error,
            snapshot: Some(snapshot.clone()),
        })?;

    let advice =
        validate::validate(&payload, &prompt.universe, &req.constraints).map_err(|error| {
            StageFailure {
                error,
                snapshot: Some(snapshot.clone()),
            }
        })?;

    Ok(Staged { snapshot, advice })
}

fn ticker_set(holdings: &[Holding], constraints: &Constraints) -> BTreeSet<String> {
    holdings
        .iter()
        .map(|h| h.ticker.clone())
        .chain(constraints.watchlist.iter().cloned())
        .collect()
}

fn check_constraints(c: &Constraints) -> Result<(), PipelineError> {
    if c.max_holdings == 0 || c.max_holdings > MAX_HOLDINGS_CEILING {
        return Err(PipelineError::InvalidConstraints(format!(
            "maxHoldings must be in 1..={MAX_HOLDINGS_CEILING} (got {})",
            c.max_holdings
        )));
    }
    if !(c.payout_ceiling > 0.0 && c.payout_ceiling <= 1.0) {
        return Err(PipelineError::InvalidConstraints(format!(
            "payoutCeiling must be in (0, 1] (got {})",
            c.payout_ceiling
        )));
    }
    if !(c.leverage_ceiling > 0.0 && c.leverage_ceiling.is_finite()) {
        return Err(PipelineError::InvalidConstraints(format!(
            "leverageCeiling must be a positive number (got {})",
            c.leverage_ceiling
        )));
    }
    if !is_valid_ticker(&c.benchmark_ticker) {
        return Err(PipelineError::InvalidConstraints(format!(
            "benchmarkTicker {:?} is not a valid ticker",
            c.benchmark_ticker
        )));
    }
    for t in &c.watchlist {
        if !is_valid_ticker(t) {
            return Err(PipelineError::InvalidConstraints(format!(
                "watchlist entry {t:?} is not a valid ticker"
            )));
        }
    }
    Ok(())
}

async fn persist_with_retry(
    store: &dyn RecommendationStore,
    rec: &Recommendation,
) -> Result<Uuid, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match store.persist(rec).await {
            Ok(id) => return Ok(id),
            Err(err) => {
                if attempt >= PERSIST_ATTEMPTS {
                    return Err(PipelineError::PersistenceFailure(format!("{err:#}")));
                }
                let backoff = Duration::from_millis(PERSIST_BASE_BACKOFF_MS << (attempt - 1));
                tracing::warn!(attempt, ?backoff, error = %err, "recommendation persist failed; retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn emit_audit(audit: &dyn AuditSink, event: &AuditEvent) {
    if let Err(err) = audit.emit(event).await {
        // Best-effort by contract: never let the audit path mask the result.
        tracing::warn!(
            action = %event.action,
            correlation_id = %event.correlation_id,
            error = %err,
            "audit emit failed; continuing"
        );
    }
}
