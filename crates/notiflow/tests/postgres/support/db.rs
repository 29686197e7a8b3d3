//! Direct SQL against the notiflow schema, for setting up and checking state.

use anyhow::Result;
use notiflow::BatchId;
use sqlx::PgPool;
use time::OffsetDateTime;

/// Make every unprocessed wake-up due now.
pub async fn fast_forward_wakeups(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE notiflow.wakeups
        SET fire_at = now()
        WHERE processed_at IS NULL AND fire_at > now()
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Due instants of a batch's unprocessed wake-ups.
pub async fn pending_wakeups(pool: &PgPool, batch_id: BatchId) -> Result<Vec<OffsetDateTime>> {
    let rows = sqlx::query_scalar(
        "SELECT fire_at FROM notiflow.wakeups
         WHERE batch_id = $1 AND processed_at IS NULL
         ORDER BY fire_at",
    )
    .bind(batch_id.as_uuid())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_pending_steps(pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notiflow.steps WHERE processed_at IS NULL AND parked_at IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn batch_outcome(pool: &PgPool, batch_id: BatchId) -> Result<Option<String>> {
    let outcome = sqlx::query_scalar("SELECT outcome FROM notiflow.batches WHERE batch_id = $1")
        .bind(batch_id.as_uuid())
        .fetch_one(pool)
        .await?;
    Ok(outcome)
}
