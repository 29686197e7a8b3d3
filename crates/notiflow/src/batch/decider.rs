//! One decider cycle for a batch input.

use serde_json::Value;
use time::OffsetDateTime;

use super::{BatchEvent, BatchId, BatchInput, BatchState, DeliveryBatch};
use crate::error::{Error, Result};
use crate::store::{BeginResult, Store, UnitOfWork};
use crate::wakeup::Wakeup;

/// Decide `input` against its batch and persist the outcome.
///
/// 1. lock the batch and load its journal (finished batches return early,
///    as do inputs other than `Start` for a batch with no journal)
/// 2. replay the journal into a [`BatchState`]
/// 3. call [`DeliveryBatch::decide`]
/// 4. append events, enqueue steps and schedule wake-ups
/// 5. mark the batch finished if the new state is terminal
/// 6. commit
///
/// Nothing is persisted if any of these fail.
pub(crate) async fn execute<S: Store>(store: &S, input: &BatchInput) -> Result<()> {
    let batch_id = input.batch_id();

    let (payloads, mut uow) = match store.begin(batch_id).await? {
        BeginResult::Active { events, uow } => (events, uow),
        BeginResult::Finished => {
            tracing::debug!(%batch_id, "Input for finished batch dropped");
            return Ok(());
        }
    };

    if payloads.is_empty() && !matches!(input, BatchInput::Start { .. }) {
        tracing::warn!(%batch_id, "Input for unknown batch dropped");
        return Ok(());
    }

    let state = replay(batch_id, payloads)?;
    let decision = DeliveryBatch::decide(OffsetDateTime::now_utc(), &state, input);
    let (events, steps, wakeups) = decision.into_parts();

    let final_state = events.iter().cloned().fold(state, DeliveryBatch::evolve);

    uow.append_events(events).await?;
    uow.enqueue_steps(steps).await?;

    let wakeups = wakeups
        .into_iter()
        .map(|w| w.try_map(|input| serde_json::to_value(&input)))
        .collect::<std::result::Result<Vec<Wakeup<Value>>, _>>()?;
    uow.schedule_wakeups(wakeups).await?;

    if let Some(outcome) = final_state.outcome() {
        uow.mark_finished(outcome);
        tracing::debug!(%batch_id, outcome = outcome.as_str(), "Batch finished");
    }

    uow.commit().await
}

fn replay(batch_id: BatchId, payloads: Vec<Value>) -> Result<BatchState> {
    payloads
        .into_iter()
        .enumerate()
        .try_fold(BatchState::default(), |state, (sequence, payload)| {
            let event: BatchEvent = serde_json::from_value(payload)
                .map_err(|e| Error::event_deserialization(batch_id, sequence, e))?;
            Ok(DeliveryBatch::evolve(state, event))
        })
}
