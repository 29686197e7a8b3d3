//! Channel adapters and the handler that runs outbox steps against them.
//!
//! - [`NotificationSink`]: persists in-app notification rows
//! - [`Mailer`]: sends email ([`SmtpMailer`] with the `smtp` feature)
//! - [`ExecutionTracker`]: updates the host's execution record
//!
//! [`DeliveryHandler`] turns a [`BatchStep`] into adapter calls and reports
//! the result back as a [`BatchInput`].

mod context;
pub mod memory;
#[cfg(feature = "smtp")]
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use context::StepContext;
#[cfg(feature = "smtp")]
pub use smtp::{SmtpConfig, SmtpMailer};

use crate::batch::{BatchId, BatchInput, BatchStep};
use crate::effect::Effect;
use crate::rule::Channel;

/// Context key holding the id of the linked pendiente, if any.
pub const RELATED_ENTITY_KEY: &str = "pendienteId";

const DEFAULT_NOTIFICATION_TYPE: &str = "info";
const DEFAULT_SUBJECT: &str = "Notificación";

/// Errors raised by channel adapters.
///
/// The `Display` text is what ends up as the execution's error message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("notification insert failed: {0}")]
    Notification(String),

    #[error("email send failed: {0}")]
    Email(String),

    #[error("execution update failed: {0}")]
    Execution(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Status of an external execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// An in-app notification row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub action_url: Option<String>,
    pub related_entity_id: Option<String>,
    pub data: Option<Value>,
}

impl NotificationRow {
    pub fn from_effect(effect: &Effect) -> Self {
        Self {
            user_id: effect.recipient_id.clone(),
            tenant_id: effect.tenant_id().map(str::to_string),
            title: effect.title.clone(),
            body: effect.body.clone(),
            notification_type: effect
                .notification_type
                .clone()
                .unwrap_or_else(|| DEFAULT_NOTIFICATION_TYPE.to_string()),
            action_url: effect.action_url.clone(),
            related_entity_id: effect.context.get_str(RELATED_ENTITY_KEY).map(str::to_string),
            data: effect.data.clone(),
        }
    }
}

/// An email ready to hand to a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    /// Build the email for `effect`, or `None` if the recipient has no address.
    ///
    /// The subject falls back to the title, then to a fixed default; the
    /// HTML falls back to the title and body as two paragraphs.
    pub fn from_effect(effect: &Effect) -> Option<Self> {
        let to = effect.recipient_address.clone()?;
        let subject = effect
            .subject
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(effect.title.clone()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let html = effect
            .html
            .clone()
            .unwrap_or_else(|| format!("<p>{}</p><p>{}</p>", effect.title, effect.body));

        Some(Self { to, subject, html })
    }
}

/// Final status for an execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub id: String,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn insert(&self, row: &NotificationRow, ctx: &StepContext) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &OutgoingEmail, ctx: &StepContext) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait ExecutionTracker: Send + Sync + 'static {
    async fn mark(&self, update: &ExecutionUpdate, ctx: &StepContext) -> Result<(), ChannelError>;
}

/// Executes outbox steps against the channel adapters.
///
/// | Step | Adapter result | Returned |
/// |------|----------------|----------|
/// | `Deliver` | `Ok` | `Ok(Some(StepSucceeded))` |
/// | `Deliver` | `Err(e)` | `Ok(Some(StepFailed { error: e.to_string() }))` |
/// | `RecordOutcome` | `Ok` | `Ok(None)` |
/// | `RecordOutcome` | `Err(e)` | `Err(e)` |
///
/// A delivery failure is a batch input, not an error: the batch records it
/// and stops. Only the tracker's own failure is returned as an error.
#[derive(Clone)]
pub struct DeliveryHandler {
    sink: Arc<dyn NotificationSink>,
    mailer: Arc<dyn Mailer>,
    tracker: Arc<dyn ExecutionTracker>,
}

impl DeliveryHandler {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        mailer: Arc<dyn Mailer>,
        tracker: Arc<dyn ExecutionTracker>,
    ) -> Self {
        Self {
            sink,
            mailer,
            tracker,
        }
    }

    pub async fn handle(
        &self,
        step: &BatchStep,
        ctx: &StepContext,
    ) -> Result<Option<BatchInput>, ChannelError> {
        match step {
            BatchStep::Deliver {
                batch_id,
                index,
                effect,
            } => Ok(Some(self.deliver(*batch_id, *index, effect, ctx).await)),
            BatchStep::RecordOutcome {
                execution_id,
                status,
                error_message,
                ..
            } => {
                let update = ExecutionUpdate {
                    id: execution_id.clone(),
                    status: *status,
                    error_message: error_message.clone(),
                };
                self.tracker.mark(&update, ctx).await?;
                tracing::debug!(
                    batch_id = %ctx.batch_id,
                    execution_id = %execution_id,
                    status = status.as_str(),
                    "Execution marked"
                );
                Ok(None)
            }
        }
    }

    async fn deliver(
        &self,
        batch_id: BatchId,
        index: usize,
        effect: &Effect,
        ctx: &StepContext,
    ) -> BatchInput {
        let result = match effect.channel {
            Channel::InApp => self.sink.insert(&NotificationRow::from_effect(effect), ctx).await,
            Channel::Email => match OutgoingEmail::from_effect(effect) {
                Some(email) => self.mailer.send(&email, ctx).await,
                None => {
                    tracing::debug!(
                        %batch_id,
                        index,
                        recipient = %effect.recipient_id,
                        "No address for recipient, email skipped"
                    );
                    Ok(())
                }
            },
        };

        match result {
            Ok(()) => {
                tracing::debug!(%batch_id, index, channel = %effect.channel, "Effect delivered");
                BatchInput::StepSucceeded { batch_id, index }
            }
            Err(e) => {
                tracing::warn!(
                    %batch_id,
                    index,
                    channel = %effect.channel,
                    error = %e,
                    "Effect delivery failed"
                );
                BatchInput::StepFailed {
                    batch_id,
                    index,
                    error: e.to_string(),
                }
            }
        }
    }
}
