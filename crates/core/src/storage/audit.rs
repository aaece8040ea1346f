use crate::pipeline::AuditEvent;
use anyhow::Context;
use uuid::Uuid;

pub async fn insert_event(pool: &sqlx::PgPool, event: &AuditEvent) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO audit_events (id, action, correlation_id, details, created_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(&event.action)
    .bind(&event.correlation_id)
    .bind(&event.details)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await
    .context("insert audit_events failed")?;

    Ok(id)
}
