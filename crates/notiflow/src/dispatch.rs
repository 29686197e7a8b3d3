//! The emission entry point.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::batch::BatchId;
use crate::context::EventContext;
use crate::effect::Effect;
use crate::error::Result;
use crate::expander::EffectExpander;
use crate::recipient::Directory;
use crate::rule::RuleRegistry;

/// A batch waiting to be started.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub batch_id: BatchId,
    pub event_type: String,
    /// Ordered; delivered strictly in this order.
    pub effects: Vec<Effect>,
    pub execution_id: Option<String>,
}

impl NewBatch {
    /// A batch with a fresh id.
    pub fn new(
        event_type: impl Into<String>,
        effects: Vec<Effect>,
        execution_id: Option<String>,
    ) -> Self {
        Self {
            batch_id: BatchId::new(),
            event_type: event_type.into(),
            effects,
            execution_id,
        }
    }
}

/// Starts durable batches.
///
/// Implemented by [`BatchService`](crate::BatchService). Starting must be
/// durable: once this returns `Ok`, the batch runs to completion even if the
/// process stops.
#[async_trait]
pub trait BatchStarter: Send + Sync + 'static {
    async fn start_batch(&self, batch: NewBatch) -> Result<BatchId>;
}

/// Turns domain events into delivery batches.
///
/// ```no_run
/// # async fn demo(dispatcher: notiflow::Dispatcher) -> notiflow::Result<()> {
/// use notiflow::EventContext;
///
/// let ctx = EventContext::new()
///     .with("tenantId", "t1")
///     .with("obra", serde_json::json!({ "id": "o1", "name": "Puente" }));
/// if let Some(batch_id) = dispatcher.emit("obra.completed", &ctx).await? {
///     println!("batch {batch_id} started");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    expander: Arc<EffectExpander>,
    starter: Arc<dyn BatchStarter>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RuleRegistry>,
        directory: Arc<dyn Directory>,
        starter: Arc<dyn BatchStarter>,
    ) -> Self {
        Self {
            expander: Arc::new(EffectExpander::new(registry, directory)),
            starter,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        self.expander.registry()
    }

    /// Expand `event_type` against its rule and start one batch with the result.
    ///
    /// Returns `Ok(None)` when nothing is to be delivered: the event type has
    /// no rule, no recipients resolved, or every guard declined. The only
    /// error is a failure to start the batch.
    pub async fn emit(&self, event_type: &str, ctx: &EventContext) -> Result<Option<BatchId>> {
        let effects = self.expander.expand(event_type, ctx).await;
        if effects.is_empty() {
            tracing::debug!(event_type, "No effects for event");
            return Ok(None);
        }

        let recipients = effects
            .iter()
            .map(|e| e.recipient_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let count = effects.len();

        let batch = NewBatch::new(
            event_type,
            effects,
            ctx.execution_id().map(str::to_string),
        );
        let batch_id = self.starter.start_batch(batch).await?;

        tracing::debug!(%batch_id, event_type, recipients, effects = count, "Event dispatched");
        Ok(Some(batch_id))
    }
}
