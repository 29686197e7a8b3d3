//! Delivery batches: the durable, sequential walk over one emission's effects.
//!
//! A batch is driven by [`BatchInput`]s. Each input is decided against the
//! state rebuilt from the batch journal ([`BatchEvent`]s), producing new
//! journal events, outbox [`BatchStep`]s and wake-ups. See
//! [`DeliveryBatch`] for the state machine.

pub(crate) mod decider;
mod machine;

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use machine::{BatchDecision, BatchOutcome, BatchState, DeliveryBatch, Phase, Step, next_step};

use crate::channel::ExecutionStatus;
use crate::effect::Effect;

/// Identifies one batch (UUID v7, so ids sort by creation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// A fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for BatchId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Inputs that drive a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchInput {
    /// Begin walking a freshly emitted list of effects.
    Start {
        batch_id: BatchId,
        event_type: String,
        effects: Vec<Effect>,
        execution_id: Option<String>,
    },
    /// The suspension before effect `index` has elapsed.
    Wake { batch_id: BatchId, index: usize },
    /// The channel step for effect `index` went through.
    StepSucceeded { batch_id: BatchId, index: usize },
    /// The channel step for effect `index` raised an error.
    StepFailed {
        batch_id: BatchId,
        index: usize,
        error: String,
    },
}

impl BatchInput {
    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchInput::Start { batch_id, .. }
            | BatchInput::Wake { batch_id, .. }
            | BatchInput::StepSucceeded { batch_id, .. }
            | BatchInput::StepFailed { batch_id, .. } => *batch_id,
        }
    }
}

/// Journal entries of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        event_type: String,
        effects: Vec<Effect>,
        execution_id: Option<String>,
    },
    /// Effect `index` was not meant to be sent.
    Skipped { index: usize },
    /// Waiting until `until` before delivering effect `index`.
    Suspended {
        index: usize,
        #[serde(with = "time::serde::rfc3339")]
        until: OffsetDateTime,
    },
    /// The wait before effect `index` ended at `at`.
    Resumed {
        index: usize,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    /// The channel step for effect `index` was queued.
    Dispatched { index: usize },
    Delivered { index: usize },
    /// Every effect was delivered or skipped.
    Completed,
    /// The channel step for effect `index` failed; the rest of the batch is abandoned.
    Failed { index: usize, error: String },
    /// An input that no longer applies, such as a redelivered wake-up.
    Ignored { reason: String },
}

/// Outbox work items produced by a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchStep {
    /// Hand effect `index` to its channel adapter.
    Deliver {
        batch_id: BatchId,
        index: usize,
        effect: Effect,
    },
    /// Update the external execution record with the batch's outcome.
    RecordOutcome {
        batch_id: BatchId,
        execution_id: String,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl BatchStep {
    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchStep::Deliver { batch_id, .. } | BatchStep::RecordOutcome { batch_id, .. } => {
                *batch_id
            }
        }
    }
}
