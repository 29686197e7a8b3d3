//! PostgreSQL store.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::outbox::{OutboxItem, OutboxStore, ParkedStep};
use super::{BatchQueryStore, BatchSummary, BeginResult, Store, StoredEvent, UnitOfWork};
use crate::batch::{BatchId, BatchOutcome};
use crate::error::Result;
use crate::wakeup::Wakeup;

/// PostgreSQL-backed store.
///
/// Inputs for one batch are serialized with `SELECT ... FOR UPDATE` on its
/// `notiflow.batches` row, held until the unit of work commits. Workers
/// claim steps and wake-ups with `FOR UPDATE SKIP LOCKED`, and lock
/// expiry is computed by the database so app clocks do not matter.
///
/// | Table | Purpose |
/// |-------|---------|
/// | `batches` | Lock row, outcome and listing metadata |
/// | `batch_events` | Append-only journal |
/// | `steps` | Outbox of deliveries and outcome records |
/// | `wakeups` | Suspensions, due at `fire_at` |
///
/// Apply `crates/notiflow/migrations` before use, e.g. with
/// `sqlx::migrate!`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct EventRow {
    batch_id: Uuid,
    sequence: i64,
    payload: Value,
    created_at: OffsetDateTime,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent {
            batch_id: BatchId::from_uuid(row.batch_id),
            sequence: row.sequence,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct BatchRow {
    batch_id: Uuid,
    created_at: OffsetDateTime,
    event_count: i64,
    last_event_at: Option<OffsetDateTime>,
    outcome: Option<String>,
    finished_at: Option<OffsetDateTime>,
}

#[derive(FromRow)]
struct ClaimRow {
    id: Uuid,
    batch_id: Uuid,
    payload: Value,
    attempts: i32,
    created_at: OffsetDateTime,
}

impl From<ClaimRow> for OutboxItem {
    fn from(row: ClaimRow) -> Self {
        OutboxItem {
            id: row.id,
            batch_id: BatchId::from_uuid(row.batch_id),
            payload: row.payload,
            attempts: row.attempts.max(0) as u32,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ParkedRow {
    id: Uuid,
    batch_id: Uuid,
    payload: Value,
    attempts: i32,
    last_error: Option<String>,
    created_at: OffsetDateTime,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_events(
        tx: &mut Transaction<'_, Postgres>,
        batch_id: BatchId,
    ) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT batch_id, sequence, payload, created_at
            FROM notiflow.batch_events
            WHERE batch_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(batch_id.as_uuid())
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }
}

impl Store for PgStore {
    type UnitOfWork<'a> = PgUnitOfWork;

    async fn begin<'a>(&'a self, batch_id: BatchId) -> Result<BeginResult<Self::UnitOfWork<'a>>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO notiflow.batches (batch_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(batch_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let finished: Option<OffsetDateTime> = sqlx::query_scalar(
            "SELECT finished_at FROM notiflow.batches WHERE batch_id = $1 FOR UPDATE",
        )
        .bind(batch_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        if finished.is_some() {
            // Rolled back on drop.
            return Ok(BeginResult::Finished);
        }

        let events = Self::load_events(&mut tx, batch_id).await?;
        let next_sequence = events.len() as i64 + 1;

        Ok(BeginResult::Active {
            events: events.into_iter().map(|e| e.payload).collect(),
            uow: PgUnitOfWork {
                tx,
                batch_id,
                next_sequence,
                events_appended: 0,
                outcome: None,
            },
        })
    }
}

/// PostgreSQL unit of work: a transaction holding the batch row lock.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    batch_id: BatchId,
    next_sequence: i64,
    events_appended: i64,
    outcome: Option<BatchOutcome>,
}

impl UnitOfWork for PgUnitOfWork {
    async fn append_events<E, I>(&mut self, events: I) -> Result<()>
    where
        E: Serialize + Send,
        I: IntoIterator<Item = E> + Send,
    {
        let payloads = events
            .into_iter()
            .map(|e| serde_json::to_value(&e))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for payload in payloads {
            sqlx::query(
                r#"
                INSERT INTO notiflow.batch_events (batch_id, sequence, payload)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(self.batch_id.as_uuid())
            .bind(self.next_sequence)
            .bind(payload)
            .execute(&mut *self.tx)
            .await?;

            self.next_sequence += 1;
            self.events_appended += 1;
        }
        Ok(())
    }

    async fn enqueue_steps<S, I>(&mut self, steps: I) -> Result<()>
    where
        S: Serialize + Send,
        I: IntoIterator<Item = S> + Send,
    {
        let payloads = steps
            .into_iter()
            .map(|s| serde_json::to_value(&s))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for payload in payloads {
            sqlx::query("INSERT INTO notiflow.steps (id, batch_id, payload) VALUES ($1, $2, $3)")
                .bind(Uuid::now_v7())
                .bind(self.batch_id.as_uuid())
                .bind(payload)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn schedule_wakeups<T>(&mut self, wakeups: T) -> Result<()>
    where
        T: IntoIterator<Item = Wakeup<Value>> + Send,
    {
        let wakeups: Vec<_> = wakeups.into_iter().collect();
        for wakeup in wakeups {
            sqlx::query(
                r#"
                INSERT INTO notiflow.wakeups (id, batch_id, fire_at, input)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(self.batch_id.as_uuid())
            .bind(wakeup.fire_at)
            .bind(wakeup.input)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    fn mark_finished(&mut self, outcome: BatchOutcome) {
        self.outcome = Some(outcome);
    }

    async fn commit(mut self) -> Result<()> {
        let outcome = self.outcome.map(|o| o.as_str());
        sqlx::query(
            r#"
            UPDATE notiflow.batches
            SET event_count = event_count + $2,
                last_event_at = CASE WHEN $2 > 0 THEN now() ELSE last_event_at END,
                outcome = COALESCE($3, outcome),
                finished_at = CASE WHEN $3 IS NULL THEN finished_at ELSE now() END
            WHERE batch_id = $1
            "#,
        )
        .bind(self.batch_id.as_uuid())
        .bind(self.events_appended)
        .bind(outcome)
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(())
    }
}

impl OutboxStore for PgStore {
    async fn claim_step(
        &self,
        worker_id: &str,
        lock_duration: Duration,
    ) -> Result<Option<OutboxItem>> {
        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            UPDATE notiflow.steps
            SET locked_until = now() + ($1 * interval '1 second'),
                locked_by = $2
            WHERE id = (
                SELECT id FROM notiflow.steps
                WHERE processed_at IS NULL
                  AND parked_at IS NULL
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, batch_id, payload, attempts, created_at
            "#,
        )
        .bind(lock_duration.as_secs_f64())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OutboxItem::from))
    }

    async fn mark_step_processed(&self, step_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notiflow.steps
            SET processed_at = now(), locked_until = NULL, locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(step_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_step_failure(
        &self,
        step_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notiflow.steps
            SET attempts = attempts + 1,
                last_error = $2,
                locked_until = now() + ($3 * interval '1 second'),
                locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(step_id)
        .bind(error)
        .bind(retry_after.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park_step(&self, step_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notiflow.steps
            SET attempts = attempts + 1,
                last_error = $2,
                parked_at = now(),
                locked_until = NULL,
                locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(step_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_parked_steps(&self, limit: u32) -> Result<Vec<ParkedStep>> {
        let rows = sqlx::query_as::<_, ParkedRow>(
            r#"
            SELECT id, batch_id, payload, attempts, last_error, created_at
            FROM notiflow.steps
            WHERE parked_at IS NOT NULL
            ORDER BY parked_at DESC, seq DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ParkedStep {
                id: row.id,
                batch_id: BatchId::from_uuid(row.batch_id),
                payload: row.payload,
                attempts: row.attempts.max(0) as u32,
                last_error: row.last_error,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn claim_wakeup(
        &self,
        worker_id: &str,
        lock_duration: Duration,
    ) -> Result<Option<OutboxItem>> {
        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            UPDATE notiflow.wakeups
            SET locked_until = now() + ($1 * interval '1 second'),
                locked_by = $2
            WHERE id = (
                SELECT id FROM notiflow.wakeups
                WHERE processed_at IS NULL
                  AND fire_at <= now()
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY fire_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, batch_id, input AS payload, attempts, created_at
            "#,
        )
        .bind(lock_duration.as_secs_f64())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OutboxItem::from))
    }

    async fn mark_wakeup_processed(&self, wakeup_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notiflow.wakeups
            SET processed_at = now(), locked_until = NULL, locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(wakeup_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_wakeup_failure(
        &self,
        wakeup_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notiflow.wakeups
            SET attempts = attempts + 1,
                last_error = $2,
                locked_until = now() + ($3 * interval '1 second'),
                locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(wakeup_id)
        .bind(error)
        .bind(retry_after.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BatchQueryStore for PgStore {
    async fn list_batches(&self, limit: u32, offset: u32) -> Result<Vec<BatchSummary>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT batch_id, created_at, event_count, last_event_at, outcome, finished_at
            FROM notiflow.batches
            ORDER BY last_event_at DESC NULLS LAST, created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BatchSummary {
                batch_id: BatchId::from_uuid(row.batch_id),
                created_at: row.created_at,
                event_count: row.event_count,
                last_event_at: row.last_event_at,
                status: row.outcome.unwrap_or_else(|| "running".to_string()),
                finished_at: row.finished_at,
            })
            .collect())
    }

    async fn fetch_batch_events(&self, batch_id: BatchId) -> Result<Vec<StoredEvent>> {
        let mut tx = self.pool.begin().await?;
        let events = Self::load_events(&mut tx, batch_id).await?;
        Ok(events.into_iter().map(StoredEvent::from).collect())
    }
}
