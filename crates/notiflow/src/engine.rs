//! Engine bundle.

use std::sync::Arc;

use crate::batch::BatchId;
use crate::context::EventContext;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::runtime::{EngineBuilder, NotificationRuntime};
use crate::service::BatchService;
use crate::store::{OutboxStore, Store};

/// A dispatcher and a runtime sharing one batch service.
#[derive(Clone)]
pub struct NotificationEngine<S> {
    pub dispatcher: Dispatcher,
    pub service: Arc<BatchService<S>>,
    pub runtime: NotificationRuntime<S>,
}

impl<S> NotificationEngine<S>
where
    S: Store + OutboxStore,
{
    pub fn builder(store: S) -> EngineBuilder<S> {
        EngineBuilder::new(store)
    }

    /// Shorthand for [`Dispatcher::emit`].
    pub async fn emit(&self, event_type: &str, ctx: &EventContext) -> Result<Option<BatchId>> {
        self.dispatcher.emit(event_type, ctx).await
    }
}
