use crate::domain::market::Holding;
use anyhow::Context;
use chrono::NaiveDate;

pub async fn fetch_holdings(pool: &sqlx::PgPool, owner: &str) -> anyhow::Result<Vec<Holding>> {
    let rows = sqlx::query_as::<_, (String, String, f64, f64, NaiveDate)>(
        "SELECT owner, ticker, shares, cost_basis, purchase_date \
         FROM holdings \
         WHERE owner = $1 \
         ORDER BY ticker ASC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .context("select holdings failed")?;

    Ok(rows
        .into_iter()
        .map(|(owner, ticker, shares, cost_basis, purchase_date)| Holding {
            owner,
            ticker,
            shares,
            cost_basis,
            purchase_date,
        })
        .collect())
}

/// Distinct tickers across every user's holdings; the refresh job's default
/// work list.
pub async fn distinct_tickers(pool: &sqlx::PgPool) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT DISTINCT ticker FROM holdings ORDER BY ticker ASC",
    )
    .fetch_all(pool)
    .await
    .context("select distinct holding tickers failed")?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}
