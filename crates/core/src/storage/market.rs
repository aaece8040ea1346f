use crate::domain::market::FundamentalRecord;
use crate::ingest::DailyClose;
use anyhow::Context;
use chrono::NaiveDate;
use serde_json::Value;

pub async fn latest_fundamental(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<Option<FundamentalRecord>> {
    let row = sqlx::query_as::<_, (NaiveDate, f64, f64, f64, Option<f64>, bool, Value)>(
        "SELECT as_of_date, payout_ratio, debt_to_equity, dividend_yield, beta, dividend_cut, raw \
         FROM market_fundamentals \
         WHERE ticker = $1 \
         ORDER BY as_of_date DESC \
         LIMIT 1",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .context("select latest fundamental failed")?;

    Ok(row.map(
        |(as_of_date, payout_ratio, debt_to_equity, dividend_yield, beta, dividend_cut, raw)| {
            FundamentalRecord {
                ticker: ticker.to_string(),
                as_of_date,
                payout_ratio,
                debt_to_equity,
                dividend_yield,
                beta,
                dividend_cut,
                raw,
            }
        },
    ))
}

pub async fn latest_price(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<Option<f64>> {
    let row = sqlx::query_as::<_, (f64,)>(
        "SELECT close FROM market_prices \
         WHERE ticker = $1 \
         ORDER BY date DESC \
         LIMIT 1",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .context("select latest price failed")?;

    Ok(row.map(|(close,)| close))
}

/// Fundamental rows are immutable; a re-run for the same (ticker, date) is a
/// no-op and newer dates supersede rather than overwrite.
pub async fn insert_fundamental(
    pool: &sqlx::PgPool,
    rec: &FundamentalRecord,
) -> anyhow::Result<u64> {
    let res = sqlx::query(
        "INSERT INTO market_fundamentals \
           (ticker, as_of_date, payout_ratio, debt_to_equity, dividend_yield, beta, dividend_cut, raw) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (ticker, as_of_date) DO NOTHING",
    )
    .bind(&rec.ticker)
    .bind(rec.as_of_date)
    .bind(rec.payout_ratio)
    .bind(rec.debt_to_equity)
    .bind(rec.dividend_yield)
    .bind(rec.beta)
    .bind(rec.dividend_cut)
    .bind(&rec.raw)
    .execute(pool)
    .await
    .context("insert market_fundamentals failed")?;

    Ok(res.rows_affected())
}

/// Prices do get corrected retroactively (splits, adjustments), so conflicts
/// update in place. Transactional per ticker.
pub async fn upsert_prices(
    pool: &sqlx::PgPool,
    ticker: &str,
    closes: &[DailyClose],
) -> anyhow::Result<u64> {
    if closes.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    for bar in closes {
        let res = sqlx::query(
            "INSERT INTO market_prices (ticker, date, close) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (ticker, date) DO UPDATE SET close = EXCLUDED.close",
        )
        .bind(ticker)
        .bind(bar.date)
        .bind(bar.close)
        .execute(&mut *tx)
        .await
        .context("upsert market_prices failed")?;
        affected += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}
