//! Wake-ups: inputs delivered back to a batch at an absolute instant.
//!
//! A wake-up is how a batch suspends. Instead of sleeping in a task, the
//! decider records a wake-up alongside its journal events; the wake worker
//! claims it once `fire_at` has passed and routes the embedded input back
//! through the decider.
//!
//! | Aspect | Step | Wake-up |
//! |--------|------|---------|
//! | When | As soon as a worker claims it | At or after `fire_at` |
//! | What | Side effect (notification, email, outcome) | Input to the batch |
//! | Handler | `DeliveryHandler` | decider, via `BatchService` |
//!
//! Wake-ups carry absolute instants only, so a process that is down past
//! `fire_at` resumes the batch as soon as it is back.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// An input to deliver to a batch once `fire_at` has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wakeup<I> {
    /// When the wake-up becomes due (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub fire_at: OffsetDateTime,

    /// The input to deliver.
    pub input: I,
}

impl<I> Wakeup<I> {
    /// A wake-up due at `fire_at`.
    pub fn at(fire_at: OffsetDateTime, input: I) -> Self {
        Self { fire_at, input }
    }

    /// Convert the embedded input, keeping the instant.
    pub fn try_map<J, E>(self, f: impl FnOnce(I) -> Result<J, E>) -> Result<Wakeup<J>, E> {
        Ok(Wakeup {
            fire_at: self.fire_at,
            input: f(self.input)?,
        })
    }
}
