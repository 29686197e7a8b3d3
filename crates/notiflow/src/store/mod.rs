//! Storage for batch journals, outbox steps and wake-ups.
//!
//! [`Store`] and [`UnitOfWork`] carry one decider cycle; [`OutboxStore`] is
//! what the runtime workers poll; [`BatchQueryStore`] is read-only
//! inspection. Two backends are provided:
//!
//! - [`MemoryStore`]: in-process, for tests and single-process embedding
//! - [`PgStore`]: PostgreSQL (requires the `postgres` feature)

mod memory;
mod outbox;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub use memory::MemoryStore;
pub use outbox::{OutboxItem, OutboxStore, ParkedStep};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use crate::batch::{BatchId, BatchOutcome};
use crate::error::Result;
use crate::wakeup::Wakeup;

/// A journal event with its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub batch_id: BatchId,
    /// Position in the batch journal, starting at 1.
    pub sequence: i64,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Overview of one batch for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub event_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_event_at: Option<OffsetDateTime>,
    /// `"running"`, `"completed"` or `"failed"`.
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

/// Result of beginning a unit of work.
pub enum BeginResult<U> {
    /// The batch accepts inputs.
    Active {
        /// Journal payloads for replay, oldest first.
        events: Vec<Value>,
        /// Unit of work holding the batch lock.
        uow: U,
    },
    /// The batch already completed or failed. No lock is held.
    Finished,
}

/// Storage backend for batches.
///
/// [`Store::begin`] takes an exclusive per-batch lock, so inputs for the same
/// batch are decided one at a time while different batches proceed in
/// parallel.
pub trait Store: Send + Sync + Clone + 'static {
    type UnitOfWork<'a>: UnitOfWork + Send
    where
        Self: 'a;

    /// Lock the batch and load its journal.
    ///
    /// Creates the batch record on first use. Returns
    /// [`BeginResult::Finished`] without loading anything once the batch is
    /// terminal. The lock is held until the unit of work is committed or dropped.
    fn begin<'a>(
        &'a self,
        batch_id: BatchId,
    ) -> impl Future<Output = Result<BeginResult<Self::UnitOfWork<'a>>>> + Send;
}

/// Changes produced by one decision, applied atomically on [`commit`](Self::commit).
///
/// Dropping a unit of work without committing discards everything.
pub trait UnitOfWork: Send {
    /// Append events to the journal with increasing sequence numbers.
    fn append_events<E, I>(&mut self, events: I) -> impl Future<Output = Result<()>> + Send
    where
        E: Serialize + Send,
        I: IntoIterator<Item = E> + Send;

    /// Enqueue steps to the outbox, in order.
    fn enqueue_steps<S, I>(&mut self, steps: I) -> impl Future<Output = Result<()>> + Send
    where
        S: Serialize + Send,
        I: IntoIterator<Item = S> + Send;

    /// Store wake-ups to be claimed once due.
    fn schedule_wakeups<T>(&mut self, wakeups: T) -> impl Future<Output = Result<()>> + Send
    where
        T: IntoIterator<Item = Wakeup<Value>> + Send;

    /// Record the batch as terminal. Later `begin` calls return `Finished`.
    fn mark_finished(&mut self, outcome: BatchOutcome);

    /// Persist all changes and release the lock.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

/// Read-only inspection of batches.
#[async_trait]
pub trait BatchQueryStore: Send + Sync + Clone + 'static {
    /// Batches, most recently active first.
    async fn list_batches(&self, limit: u32, offset: u32) -> Result<Vec<BatchSummary>>;

    /// The full journal of a batch, oldest first.
    async fn fetch_batch_events(&self, batch_id: BatchId) -> Result<Vec<StoredEvent>>;
}
