use crate::domain::recommendation::{
    Explanation, Recommendation, RecommendationPacket, RecommendationStatus,
};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

pub async fn persist(pool: &sqlx::PgPool, rec: &Recommendation) -> anyhow::Result<Uuid> {
    let packet = rec
        .packet
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("serialize recommendation packet failed")?;
    let explanation = rec
        .explanation
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("serialize explanation failed")?;

    sqlx::query(
        "INSERT INTO recommendations \
           (id, owner, status, as_of_date, packet, explanation, error_detail, correlation_id, generated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(rec.id)
    .bind(&rec.owner)
    .bind(rec.status.as_str())
    .bind(rec.as_of_date)
    .bind(packet)
    .bind(explanation)
    .bind(&rec.error_detail)
    .bind(&rec.correlation_id)
    .bind(rec.generated_at)
    .execute(pool)
    .await
    .context("insert recommendations failed")?;

    Ok(rec.id)
}

pub async fn fetch_latest(
    pool: &sqlx::PgPool,
    owner: &str,
) -> anyhow::Result<Option<Recommendation>> {
    let row = sqlx::query_as::<_, RecommendationRow>(
        "SELECT id, owner, status, as_of_date, packet, explanation, error_detail, correlation_id, generated_at \
         FROM recommendations \
         WHERE owner = $1 \
         ORDER BY generated_at DESC \
         LIMIT 1",
    )
    .bind(owner)
    .fetch_optional(pool)
    .await
    .context("select latest recommendation failed")?;

    row.map(into_recommendation).transpose()
}

pub async fn fetch_by_id(pool: &sqlx::PgPool, id: Uuid) -> anyhow::Result<Option<Recommendation>> {
    let row = sqlx::query_as::<_, RecommendationRow>(
        "SELECT id, owner, status, as_of_date, packet, explanation, error_detail, correlation_id, generated_at \
         FROM recommendations \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("select recommendation by id failed")?;

    row.map(into_recommendation).transpose()
}

type RecommendationRow = (
    Uuid,
    String,
    String,
    NaiveDate,
    Option<Value>,
    Option<Value>,
    Option<String>,
    String,
    DateTime<Utc>,
);

fn into_recommendation(row: RecommendationRow) -> anyhow::Result<Recommendation> {
    let (id, owner, status, as_of_date, packet, explanation, error_detail, correlation_id, generated_at) =
        row;

    let status = match status.as_str() {
        "PENDING" => RecommendationStatus::Pending,
        "COMPLETED" => RecommendationStatus::Completed,
        "FAILED" => RecommendationStatus::Failed,
        other => anyhow::bail!("unknown recommendation status in DB: {other}"),
    };

    let packet = packet
        .map(serde_json::from_value::<RecommendationPacket>)
        .transpose()
        .context("decode recommendation packet failed")?;
    let explanation = explanation
        .map(serde_json::from_value::<Explanation>)
        .transpose()
        .context("decode explanation failed")?;

    Ok(Recommendation {
        id,
        owner,
        status,
        as_of_date,
        packet,
        explanation,
        error_detail,
        correlation_id,
        generated_at,
    })
}
