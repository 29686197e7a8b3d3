use time::OffsetDateTime;
use uuid::Uuid;

use crate::batch::BatchId;

/// Metadata handed to adapters with every step.
///
/// Steps are delivered at least once. Adapters that talk to services with
/// idempotency support should pass [`idempotency_key`](Self::idempotency_key)
/// along; it is stable across redeliveries of the same step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub batch_id: BatchId,
    /// Outbox row id (UUID v7).
    pub step_id: Uuid,
    /// 1 on the first delivery.
    pub attempt: u32,
    /// When the step was enqueued.
    pub created_at: OffsetDateTime,
}

impl StepContext {
    pub fn new(batch_id: BatchId, step_id: Uuid, attempt: u32, created_at: OffsetDateTime) -> Self {
        Self {
            batch_id,
            step_id,
            attempt,
            created_at,
        }
    }

    /// `{batch_id}:{step_id}`
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.batch_id, self.step_id)
    }
}
