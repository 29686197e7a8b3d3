//! Expanded effects: one concrete unit of delivery work.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::EventContext;
use crate::rule::Channel;
use crate::schedule::Delivery;

/// One notification for one recipient on one channel.
///
/// Every template of the originating definition has already been evaluated,
/// so an effect is plain data. Effects are journaled with their batch and
/// travel through the outbox as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub channel: Channel,
    /// Resolved timing. `Immediate` never suspends.
    pub delivery: Delivery,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    pub recipient_id: String,
    /// `None` when the directory has no usable address for the recipient.
    pub recipient_address: Option<String>,
    /// The emission context, tagged with `eventType`.
    pub context: EventContext,
    /// Result of the definition's guard. Effects that must not be sent are
    /// dropped before batching, so a batch normally holds only `true` here.
    pub send: bool,
    pub execution_id: Option<String>,
}

impl Effect {
    /// Tenant of the emitting event.
    pub fn tenant_id(&self) -> Option<&str> {
        self.context.tenant_id()
    }
}
