use anyhow::Context;
use clap::{Parser, Subcommand};
use divvy_core::domain::recommendation::Constraints;
use divvy_core::ingest::FundamentalsProvider;
use divvy_core::pipeline::{
    self, FallbackPolicy, PipelineDeps, PipelineError, PipelineRequest,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "divvy_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one advisory pipeline attempt for a user.
    Recommend {
        #[arg(long)]
        owner: String,

        /// Market as-of date (YYYY-MM-DD). Defaults to the last US close.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Correlation id threading this run through logs, audit events and
        /// the persisted record. Generated when omitted.
        #[arg(long)]
        correlation_id: Option<String>,

        #[arg(long, default_value_t = 40)]
        max_holdings: usize,

        #[arg(long, default_value_t = 0.8)]
        payout_ceiling: f64,

        #[arg(long, default_value_t = 2.0)]
        leverage_ceiling: f64,

        #[arg(long, default_value = "VIG")]
        benchmark: String,

        /// Extra tickers to consider beyond current holdings (comma-separated).
        #[arg(long)]
        watchlist: Option<String>,

        /// Attach a mechanical quality ranking to the record when the
        /// reasoning step fails.
        #[arg(long)]
        fallback_top_n: bool,

        /// Build the snapshot and prompt, then stop before invoking the model
        /// or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Refresh fundamentals and price history for tickers (default: every
    /// ticker held by any user).
    Refresh {
        /// Comma-separated tickers.
        #[arg(long)]
        tickers: Option<String>,

        #[arg(long)]
        as_of_date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = divvy_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Recommend {
            owner,
            as_of_date,
            correlation_id,
            max_holdings,
            payout_ceiling,
            leverage_ceiling,
            benchmark,
            watchlist,
            fallback_top_n,
            dry_run,
        } => {
            let as_of_date = divvy_core::time::us_market::resolve_as_of_date(
                as_of_date.as_deref(),
                chrono::Utc::now(),
            )?;
            let constraints = Constraints {
                max_holdings,
                payout_ceiling,
                leverage_ceiling,
                benchmark_ticker: benchmark,
                watchlist: split_csv(watchlist.as_deref()),
            };
            let correlation_id =
                correlation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            run_recommend(
                &settings,
                PipelineRequest {
                    owner,
                    constraints,
                    correlation_id,
                    as_of_date,
                    fallback: if fallback_top_n {
                        FallbackPolicy::QualityTopN
                    } else {
                        FallbackPolicy::None
                    },
                },
                dry_run,
            )
            .await
        }
        Command::Refresh {
            tickers,
            as_of_date,
        } => {
            let as_of_date = divvy_core::time::us_market::resolve_as_of_date(
                as_of_date.as_deref(),
                chrono::Utc::now(),
            )?;
            run_refresh(&settings, split_csv(tickers.as_deref()), as_of_date).await
        }
    }
}

async fn run_recommend(
    settings: &divvy_core::config::Settings,
    req: PipelineRequest,
    dry_run: bool,
) -> anyhow::Result<()> {
    let pool = connect(settings).await?;
    divvy_core::storage::migrate(&pool).await?;
    let store = divvy_core::storage::PgStore::new(pool.clone());

    if dry_run {
        let holdings =
            divvy_core::storage::holdings::fetch_holdings(&pool, &req.owner).await?;
        let tickers: std::collections::BTreeSet<String> = holdings
            .iter()
            .map(|h| h.ticker.clone())
            .chain(req.constraints.watchlist.iter().cloned())
            .collect();
        let snapshot = divvy_core::market::build_snapshot(&tickers, &store).await?;
        let prompt = divvy_core::pipeline::prompt::PromptRequest::build(
            &holdings,
            &snapshot,
            &req.constraints,
            req.as_of_date,
        );
        tracing::info!(
            %req.as_of_date,
            dry_run = true,
            universe_len = prompt.universe.len(),
            prompt_bytes = prompt.text.len(),
            "dry run: stopped before model invocation"
        );
        return Ok(());
    }

    let acquired =
        divvy_core::storage::lock::try_acquire_run_lock(&pool, &req.owner, req.as_of_date).await?;
    if !acquired {
        tracing::warn!(
            owner = %req.owner,
            %req.as_of_date,
            "run lock not acquired; another attempt in progress"
        );
        return Ok(());
    }

    let llm = divvy_core::llm::anthropic::AnthropicClient::from_settings(settings)?;
    let deps = PipelineDeps {
        market: &store,
        holdings: &store,
        reasoning: &llm,
        store: &store,
        audit: &store,
    };

    let result = pipeline::run_recommendation_pipeline(&deps, &req).await;

    let _ =
        divvy_core::storage::lock::release_run_lock(&pool, &req.owner, req.as_of_date).await;

    match result {
        Ok(rec) => {
            tracing::info!(
                correlation_id = %req.correlation_id,
                recommendation_id = %rec.id,
                status = rec.status.as_str(),
                "advisory run finished"
            );
            Ok(())
        }
        Err(err @ PipelineError::InvalidConstraints(_)) => {
            tracing::error!(error = %err, "rejected before start");
            Err(err.into())
        }
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "advisory run could not be recorded");
            Err(err)
        }
    }
}

async fn run_refresh(
    settings: &divvy_core::config::Settings,
    tickers: Vec<String>,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let pool = connect(settings).await?;
    divvy_core::storage::migrate(&pool).await?;

    let tickers = if tickers.is_empty() {
        divvy_core::storage::holdings::distinct_tickers(&pool).await?
    } else {
        tickers
    };
    if tickers.is_empty() {
        tracing::info!("nothing to refresh: no tickers held and none supplied");
        return Ok(());
    }

    let provider =
        divvy_core::ingest::alpha_vantage::AlphaVantageClient::from_settings(settings)?;

    let mut failures: usize = 0;
    for ticker in &tickers {
        if let Err(err) = refresh_one(&pool, &provider, ticker, as_of_date).await {
            failures += 1;
            sentry_anyhow::capture_anyhow(&err);
            tracing::warn!(%ticker, error = %err, "ticker refresh failed; continuing");
        }
    }

    tracing::info!(
        %as_of_date,
        total = tickers.len(),
        failures,
        "market refresh finished"
    );
    anyhow::ensure!(
        failures < tickers.len(),
        "every ticker refresh failed ({failures}/{})",
        tickers.len()
    );
    Ok(())
}

async fn refresh_one(
    pool: &sqlx::PgPool,
    provider: &divvy_core::ingest::alpha_vantage::AlphaVantageClient,
    ticker: &str,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let mut record = provider.fetch_fundamentals(ticker, as_of_date).await?;
    let (closes, dividends) = provider.fetch_daily_series(ticker).await?;

    record.dividend_cut = divvy_core::ingest::detect_dividend_cut(&dividends);

    let inserted = divvy_core::storage::market::insert_fundamental(pool, &record).await?;
    let priced = divvy_core::storage::market::upsert_prices(pool, ticker, &closes).await?;

    tracing::info!(
        %ticker,
        %as_of_date,
        fundamental_rows = inserted,
        price_rows = priced,
        dividend_cut = record.dividend_cut,
        "ticker refreshed"
    );
    Ok(())
}

async fn connect(settings: &divvy_core::config::Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn init_sentry(settings: &divvy_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
