use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// Advisory locks are scoped to the Postgres session. Best-effort guard
// against the queue delivering the same (owner, as-of-date) job twice
// concurrently.
const LOCK_NAMESPACE: i64 = 0x4449_5656_59; // "DIVVY" as hex-ish namespace.

fn lock_key(owner: &str, as_of_date: NaiveDate) -> i64 {
    let mut hasher = DefaultHasher::new();
    owner.hash(&mut hasher);
    (hasher.finish() as i64) ^ LOCK_NAMESPACE ^ (as_of_date.num_days_from_ce() as i64)
}

pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    owner: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = lock_key(owner, as_of_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_run_lock(
    pool: &sqlx::PgPool,
    owner: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key(owner, as_of_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_distinct_per_owner_and_date() {
        let d1 = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 8, 4).unwrap();

        assert_eq!(lock_key("user-1", d1), lock_key("user-1", d1));
        assert_ne!(lock_key("user-1", d1), lock_key("user-1", d2));
        assert_ne!(lock_key("user-1", d1), lock_key("user-2", d1));
    }
}
