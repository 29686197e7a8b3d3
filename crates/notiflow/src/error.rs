//! Error types for notiflow.

use thiserror::Error;

use crate::batch::BatchId;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine and substrate operations.
///
/// Resolution gaps (unknown event types, empty recipient sets, missing
/// addresses) are not errors and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize a journal event, step or input.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to deserialize a journal event during replay.
    ///
    /// Includes the batch and the event's position in its journal.
    #[error("failed to deserialize event at sequence {sequence} for batch {batch_id}: {source}")]
    EventDeserialization {
        /// The batch whose journal was being replayed.
        batch_id: BatchId,
        /// The event's position in the journal (0-indexed).
        sequence: usize,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// PostgreSQL storage error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A collaborator required by the runtime was not configured.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// An input could not be interpreted (e.g. a context that is not a JSON object).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create an event deserialization error with context.
    pub fn event_deserialization(
        batch_id: BatchId,
        sequence: usize,
        source: serde_json::Error,
    ) -> Self {
        Error::EventDeserialization {
            batch_id,
            sequence,
            source,
        }
    }
}
