//! Step worker: runs outbox steps against the channel adapters.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::RuntimeConfig;
use crate::batch::BatchStep;
use crate::channel::{DeliveryHandler, StepContext};
use crate::service::BatchService;
use crate::store::{OutboxItem, OutboxStore, Store};

/// Polls the outbox and executes steps one at a time.
///
/// 1. claim a step (locked for `step_lock_duration`)
/// 2. decode it; an undecodable payload is parked
/// 3. run it through the [`DeliveryHandler`]
/// 4. route the resulting input back through the [`BatchService`]
/// 5. mark it processed; a routing failure leaves it for another try
///    after `retry_delay`, a tracker failure parks it
pub(crate) struct StepWorker<S> {
    store: S,
    service: Arc<BatchService<S>>,
    handler: DeliveryHandler,
    config: RuntimeConfig,
    worker_id: String,
}

impl<S> StepWorker<S>
where
    S: Store + OutboxStore,
{
    pub fn new(
        store: S,
        service: Arc<BatchService<S>>,
        handler: DeliveryHandler,
        config: RuntimeConfig,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            service,
            handler,
            config,
            worker_id,
        }
    }

    /// Poll until `shutdown` flips to `true`, finishing the current step first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.step_poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(worker_id = %self.worker_id, "Step worker started");

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.process_one().await {
                        error!(worker_id = %self.worker_id, error = %e, "Error processing step");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = %self.worker_id, "Step worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and process one step. Returns `false` if none was available.
    pub async fn process_one(&self) -> crate::Result<bool> {
        let Some(item) = self
            .store
            .claim_step(&self.worker_id, self.config.step_lock_duration)
            .await?
        else {
            return Ok(false);
        };

        debug!(
            step_id = %item.id,
            batch_id = %item.batch_id,
            attempt = item.attempts + 1,
            "Processing step"
        );

        let step: BatchStep = match serde_json::from_value(item.payload.clone()) {
            Ok(step) => step,
            Err(e) => {
                let message = format!("undecodable step: {e}");
                warn!(
                    step_id = %item.id,
                    batch_id = %item.batch_id,
                    error = %message,
                    "Step parked"
                );
                self.store.park_step(item.id, &message).await?;
                return Ok(true);
            }
        };

        let ctx = StepContext::new(item.batch_id, item.id, item.attempts + 1, item.created_at);

        match self.handler.handle(&step, &ctx).await {
            Ok(Some(input)) => {
                // Not atomic with `mark_step_processed`; a retried step may
                // call its adapter again.
                if let Err(e) = self.service.execute(&input).await {
                    let message = format!("failed to route step result: {e}");
                    warn!(
                        step_id = %item.id,
                        batch_id = %item.batch_id,
                        error = %message,
                        "Step result routing failed"
                    );
                    self.retry_later(&item, &message).await?;
                    return Ok(true);
                }
                self.store.mark_step_processed(item.id).await?;
            }
            Ok(None) => self.store.mark_step_processed(item.id).await?,
            Err(e) => {
                warn!(step_id = %item.id, batch_id = %item.batch_id, error = %e, "Step parked");
                self.store.park_step(item.id, &e.to_string()).await?;
                return Ok(true);
            }
        }

        debug!(step_id = %item.id, "Step processed");
        Ok(true)
    }

    async fn retry_later(&self, item: &OutboxItem, error: &str) -> crate::Result<()> {
        self.store
            .record_step_failure(item.id, error, self.config.retry_delay)
            .await
    }
}
