//! Outbox operations polled by the runtime workers.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::batch::BatchId;

/// A claimed step or wake-up.
#[derive(Debug, Clone)]
pub struct OutboxItem {
    /// Row id (UUID v7).
    pub id: Uuid,
    pub batch_id: BatchId,
    /// The step, or the wake-up's input, as JSON.
    pub payload: Value,
    /// Previous failed attempts (0 on the first claim).
    pub attempts: u32,
    pub created_at: OffsetDateTime,
}

/// A step set aside because it cannot be executed.
#[derive(Debug, Clone)]
pub struct ParkedStep {
    pub id: Uuid,
    pub batch_id: BatchId,
    pub payload: Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Claim-and-acknowledge access to steps and wake-ups.
///
/// # Locking
///
/// 1. `claim_*` atomically picks the oldest available item and locks it for
///    `lock_duration`
/// 2. the worker acknowledges with `mark_*_processed`, `record_*_failure` or
///    `park_step` before the lock expires
/// 3. if the worker dies, the lock expires and the item is claimed again
///
/// Delivery is therefore at-least-once; the batch state machine ignores
/// inputs it has already seen.
pub trait OutboxStore: Send + Sync + Clone + 'static {
    /// Claim the oldest pending step.
    fn claim_step(
        &self,
        worker_id: &str,
        lock_duration: Duration,
    ) -> impl Future<Output = crate::Result<Option<OutboxItem>>> + Send;

    fn mark_step_processed(&self, step_id: Uuid) -> impl Future<Output = crate::Result<()>> + Send;

    /// Record an infrastructure failure; the step is claimable again after `retry_after`.
    fn record_step_failure(
        &self,
        step_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> impl Future<Output = crate::Result<()>> + Send;

    /// Take a step out of circulation, keeping it for inspection.
    fn park_step(
        &self,
        step_id: Uuid,
        error: &str,
    ) -> impl Future<Output = crate::Result<()>> + Send;

    /// Parked steps, newest first.
    fn fetch_parked_steps(
        &self,
        limit: u32,
    ) -> impl Future<Output = crate::Result<Vec<ParkedStep>>> + Send;

    /// Claim the earliest due wake-up (`fire_at <= now`).
    fn claim_wakeup(
        &self,
        worker_id: &str,
        lock_duration: Duration,
    ) -> impl Future<Output = crate::Result<Option<OutboxItem>>> + Send;

    fn mark_wakeup_processed(
        &self,
        wakeup_id: Uuid,
    ) -> impl Future<Output = crate::Result<()>> + Send;

    /// Record a failure delivering the wake-up; it is claimable again after `retry_after`.
    fn record_wakeup_failure(
        &self,
        wakeup_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> impl Future<Output = crate::Result<()>> + Send;
}
