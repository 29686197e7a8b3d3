//! Batch service entrypoint.

use async_trait::async_trait;
use serde_json::Value;

use crate::batch::{BatchId, BatchInput, decider};
use crate::dispatch::{BatchStarter, NewBatch};
use crate::error::Result;
use crate::store::Store;

/// App-facing entrypoint for driving batches.
///
/// Every input, whether it comes from a caller, a wake-up or a finished step,
/// goes through [`execute`](Self::execute).
#[derive(Clone)]
pub struct BatchService<S> {
    store: S,
}

impl<S: Store> BatchService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decide and persist one input.
    pub async fn execute(&self, input: &BatchInput) -> Result<()> {
        decider::execute(&self.store, input).await
    }

    /// Execute an input read back from the outbox or wake-up table.
    pub async fn execute_json(&self, payload: Value) -> Result<()> {
        let input: BatchInput = serde_json::from_value(payload)?;
        self.execute(&input).await
    }

    /// Begin a durable batch and return its id.
    ///
    /// Effects due now are queued for delivery immediately; the first future
    /// one suspends the batch.
    pub async fn start(&self, batch: NewBatch) -> Result<BatchId> {
        let batch_id = batch.batch_id;
        tracing::info!(
            %batch_id,
            event_type = %batch.event_type,
            effects = batch.effects.len(),
            execution_id = batch.execution_id.as_deref(),
            "Starting batch"
        );

        self.execute(&BatchInput::Start {
            batch_id,
            event_type: batch.event_type,
            effects: batch.effects,
            execution_id: batch.execution_id,
        })
        .await?;

        Ok(batch_id)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: Store> BatchStarter for BatchService<S> {
    async fn start_batch(&self, batch: NewBatch) -> Result<BatchId> {
        self.start(batch).await
    }
}
