//! Wake worker: resumes suspended batches once their wake-up is due.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::RuntimeConfig;
use crate::service::BatchService;
use crate::store::{OutboxStore, Store};

/// Polls the wake-up table and routes each due wake-up's input back to its
/// batch.
///
/// A wake-up for a batch that has already finished is simply marked
/// processed; the decider drops the input.
pub(crate) struct WakeWorker<S> {
    store: S,
    service: Arc<BatchService<S>>,
    config: RuntimeConfig,
    worker_id: String,
}

impl<S> WakeWorker<S>
where
    S: Store + OutboxStore,
{
    pub fn new(
        store: S,
        service: Arc<BatchService<S>>,
        config: RuntimeConfig,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            service,
            config,
            worker_id,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.wakeup_poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(worker_id = %self.worker_id, "Wake worker started");

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.process_one().await {
                        error!(worker_id = %self.worker_id, error = %e, "Error processing wake-up");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = %self.worker_id, "Wake worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and process one due wake-up. Returns `false` if none was due.
    pub async fn process_one(&self) -> crate::Result<bool> {
        let Some(wakeup) = self
            .store
            .claim_wakeup(&self.worker_id, self.config.wakeup_lock_duration)
            .await?
        else {
            return Ok(false);
        };

        debug!(
            wakeup_id = %wakeup.id,
            batch_id = %wakeup.batch_id,
            attempt = wakeup.attempts + 1,
            "Processing wake-up"
        );

        match self.service.execute_json(wakeup.payload).await {
            Ok(()) => {
                self.store.mark_wakeup_processed(wakeup.id).await?;
                debug!(wakeup_id = %wakeup.id, "Wake-up processed");
            }
            Err(e) => {
                let message = format!("failed to execute wake-up input: {e}");
                warn!(
                    wakeup_id = %wakeup.id,
                    batch_id = %wakeup.batch_id,
                    error = %message,
                    "Wake-up failed"
                );
                self.store
                    .record_wakeup_failure(wakeup.id, &message, self.config.retry_delay)
                    .await?;
            }
        }

        Ok(true)
    }
}
