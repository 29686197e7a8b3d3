//! In-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::outbox::{OutboxItem, OutboxStore, ParkedStep};
use super::{BatchQueryStore, BatchSummary, BeginResult, Store, StoredEvent, UnitOfWork};
use crate::batch::{BatchId, BatchOutcome};
use crate::error::Result;
use crate::wakeup::Wakeup;

/// A [`Store`] and [`OutboxStore`] kept in process memory.
///
/// Clones share the same data, so a "restarted" runtime built over a clone
/// sees every batch, step and wake-up left behind by the previous one.
/// Processed steps and wake-ups are dropped; parked steps are kept.
///
/// Every suspension requested through [`UnitOfWork::schedule_wakeups`] is
/// recorded and can be inspected with [`suspensions`](Self::suspensions).
/// A store built with
/// [`resolve_suspensions_immediately`](Self::resolve_suspensions_immediately)
/// makes each wake-up due as soon as it is scheduled, which lets tests walk a
/// batch with multi-day waits without waiting.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    immediate_wakeups: bool,
}

type BatchLocks = HashMap<BatchId, Arc<tokio::sync::Mutex<()>>>;

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    locks: Mutex<BatchLocks>,
}

#[derive(Default)]
struct State {
    batches: HashMap<BatchId, BatchRecord>,
    steps: Vec<Entry>,
    parked_steps: Vec<Entry>,
    wakeups: Vec<Entry>,
    suspensions: Vec<(BatchId, OffsetDateTime)>,
}

struct BatchRecord {
    events: Vec<(Value, OffsetDateTime)>,
    created_at: OffsetDateTime,
    outcome: Option<BatchOutcome>,
    finished_at: Option<OffsetDateTime>,
}

impl BatchRecord {
    fn new(created_at: OffsetDateTime) -> Self {
        Self {
            events: Vec::new(),
            created_at,
            outcome: None,
            finished_at: None,
        }
    }
}

struct Entry {
    id: Uuid,
    batch_id: BatchId,
    payload: Value,
    attempts: u32,
    created_at: OffsetDateTime,
    /// Due time; steps are due when enqueued.
    fire_at: OffsetDateTime,
    locked_until: Option<OffsetDateTime>,
    locked_by: Option<String>,
    last_error: Option<String>,
}

impl Entry {
    fn new(batch_id: BatchId, payload: Value, fire_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            batch_id,
            payload,
            attempts: 0,
            created_at: OffsetDateTime::now_utc(),
            fire_at,
            locked_until: None,
            locked_by: None,
            last_error: None,
        }
    }

    fn is_claimable(&self, now: OffsetDateTime) -> bool {
        self.fire_at <= now && self.locked_until.is_none_or(|until| until < now)
    }

    fn claim(
        &mut self,
        worker_id: &str,
        lock_duration: Duration,
        now: OffsetDateTime,
    ) -> OutboxItem {
        self.locked_until = Some(now + lock_duration);
        self.locked_by = Some(worker_id.to_string());
        OutboxItem {
            id: self.id,
            batch_id: self.batch_id,
            payload: self.payload.clone(),
            attempts: self.attempts,
            created_at: self.created_at,
        }
    }

    fn release(&mut self) {
        self.locked_until = None;
        self.locked_by = None;
    }
}

/// Holds the per-batch mutex and drops its map entry once nobody else
/// is waiting on it.
struct BatchLock<'a> {
    store: &'a MemoryStore,
    batch_id: BatchId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> BatchLock<'a> {
    async fn acquire(store: &'a MemoryStore, batch_id: BatchId) -> Self {
        let mutex = Arc::clone(store.locks().entry(batch_id).or_default());
        let guard = mutex.lock_owned().await;
        Self {
            store,
            batch_id,
            guard: Some(guard),
        }
    }
}

impl Drop for BatchLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.store.locks();
        if locks
            .get(&self.batch_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.batch_id);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every scheduled wake-up due at once, while still recording the
    /// instant that was asked for.
    pub fn resolve_suspensions_immediately(mut self) -> Self {
        self.immediate_wakeups = true;
        self
    }

    /// Every suspension requested so far, in order: batch and absolute instant.
    pub fn suspensions(&self) -> Vec<(BatchId, OffsetDateTime)> {
        self.state().suspensions.clone()
    }

    /// Unprocessed wake-ups: batch and due instant.
    pub fn pending_wakeups(&self) -> Vec<(BatchId, OffsetDateTime)> {
        self.state()
            .wakeups
            .iter()
            .map(|w| (w.batch_id, w.fire_at))
            .collect()
    }

    /// Number of steps not yet processed or parked.
    pub fn pending_steps(&self) -> usize {
        self.state().steps.len()
    }

    /// Make every pending wake-up due now, as if the clock had moved past them.
    ///
    /// Returns how many wake-ups were brought forward.
    pub fn fast_forward(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state();
        let mut moved = 0;
        for wakeup in state.wakeups.iter_mut() {
            if wakeup.fire_at > now {
                wakeup.fire_at = now;
                moved += 1;
            }
        }
        moved
    }

    /// Terminal outcome of a batch, if it has one.
    pub fn outcome(&self, batch_id: BatchId) -> Option<BatchOutcome> {
        self.state()
            .batches
            .get(&batch_id)
            .and_then(|batch| batch.outcome)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locks(&self) -> MutexGuard<'_, BatchLocks> {
        self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F>(entries: &mut [Entry], id: Uuid, f: F)
    where
        F: FnOnce(&mut Entry),
    {
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            f(entry);
        }
    }

    fn take(entries: &mut Vec<Entry>, id: Uuid) -> Option<Entry> {
        let index = entries.iter().position(|e| e.id == id)?;
        Some(entries.remove(index))
    }
}

impl Store for MemoryStore {
    type UnitOfWork<'a> = MemoryUnitOfWork<'a>;

    async fn begin<'a>(&'a self, batch_id: BatchId) -> Result<BeginResult<Self::UnitOfWork<'a>>> {
        let lock = BatchLock::acquire(self, batch_id).await;

        let events = {
            let state = self.state();
            match state.batches.get(&batch_id) {
                Some(batch) if batch.outcome.is_some() => return Ok(BeginResult::Finished),
                Some(batch) => batch.events.iter().map(|(e, _)| e.clone()).collect(),
                None => Vec::new(),
            }
        };

        Ok(BeginResult::Active {
            events,
            uow: MemoryUnitOfWork {
                lock,
                events: Vec::new(),
                steps: Vec::new(),
                wakeups: Vec::new(),
                outcome: None,
            },
        })
    }
}

/// Unit of work for [`MemoryStore`]; buffers changes until commit.
///
/// The batch record is created by the first commit, so a unit of work that
/// is dropped leaves no trace.
pub struct MemoryUnitOfWork<'a> {
    lock: BatchLock<'a>,
    events: Vec<Value>,
    steps: Vec<Value>,
    wakeups: Vec<Wakeup<Value>>,
    outcome: Option<BatchOutcome>,
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    async fn append_events<E, I>(&mut self, events: I) -> Result<()>
    where
        E: Serialize + Send,
        I: IntoIterator<Item = E> + Send,
    {
        for event in events {
            self.events.push(serde_json::to_value(&event)?);
        }
        Ok(())
    }

    async fn enqueue_steps<S, I>(&mut self, steps: I) -> Result<()>
    where
        S: Serialize + Send,
        I: IntoIterator<Item = S> + Send,
    {
        for step in steps {
            self.steps.push(serde_json::to_value(&step)?);
        }
        Ok(())
    }

    async fn schedule_wakeups<T>(&mut self, wakeups: T) -> Result<()>
    where
        T: IntoIterator<Item = Wakeup<Value>> + Send,
    {
        self.wakeups.extend(wakeups);
        Ok(())
    }

    fn mark_finished(&mut self, outcome: BatchOutcome) {
        self.outcome = Some(outcome);
    }

    async fn commit(self) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let store = self.lock.store;
        let batch_id = self.lock.batch_id;
        let mut state = store.state();

        let batch = state
            .batches
            .entry(batch_id)
            .or_insert_with(|| BatchRecord::new(now));
        batch.events.extend(self.events.into_iter().map(|e| (e, now)));
        if let Some(outcome) = self.outcome {
            batch.outcome = Some(outcome);
            batch.finished_at = Some(now);
        }

        for payload in self.steps {
            state.steps.push(Entry::new(batch_id, payload, now));
        }

        for wakeup in self.wakeups {
            state.suspensions.push((batch_id, wakeup.fire_at));
            let fire_at = if store.immediate_wakeups { now } else { wakeup.fire_at };
            state.wakeups.push(Entry::new(batch_id, wakeup.input, fire_at));
        }

        Ok(())
    }
}

impl OutboxStore for MemoryStore {
    async fn claim_step(
        &self,
        worker_id: &str,
        lock_duration: Duration,
    ) -> Result<Option<OutboxItem>> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state();
        Ok(state
            .steps
            .iter_mut()
            .find(|s| s.is_claimable(now))
            .map(|s| s.claim(worker_id, lock_duration, now)))
    }

    async fn mark_step_processed(&self, step_id: Uuid) -> Result<()> {
        Self::take(&mut self.state().steps, step_id);
        Ok(())
    }

    async fn record_step_failure(
        &self,
        step_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        Self::update(&mut self.state().steps, step_id, |s| {
            s.attempts += 1;
            s.last_error = Some(error.to_string());
            s.locked_until = Some(now + retry_after);
            s.locked_by = None;
        });
        Ok(())
    }

    async fn park_step(&self, step_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(mut step) = Self::take(&mut state.steps, step_id) {
            step.attempts += 1;
            step.last_error = Some(error.to_string());
            step.release();
            state.parked_steps.push(step);
        }
        Ok(())
    }

    async fn fetch_parked_steps(&self, limit: u32) -> Result<Vec<ParkedStep>> {
        Ok(self
            .state()
            .parked_steps
            .iter()
            .rev()
            .take(limit as usize)
            .map(|s| ParkedStep {
                id: s.id,
                batch_id: s.batch_id,
                payload: s.payload.clone(),
                attempts: s.attempts,
                last_error: s.last_error.clone(),
                created_at: s.created_at,
            })
            .collect())
    }

    async fn claim_wakeup(
        &self,
        worker_id: &str,
        lock_duration: Duration,
    ) -> Result<Option<OutboxItem>> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state();
        Ok(state
            .wakeups
            .iter_mut()
            .filter(|w| w.is_claimable(now))
            .min_by_key(|w| w.fire_at)
            .map(|w| w.claim(worker_id, lock_duration, now)))
    }

    async fn mark_wakeup_processed(&self, wakeup_id: Uuid) -> Result<()> {
        Self::take(&mut self.state().wakeups, wakeup_id);
        Ok(())
    }

    async fn record_wakeup_failure(
        &self,
        wakeup_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        Self::update(&mut self.state().wakeups, wakeup_id, |w| {
            w.attempts += 1;
            w.last_error = Some(error.to_string());
            w.locked_until = Some(now + retry_after);
            w.locked_by = None;
        });
        Ok(())
    }
}

#[async_trait]
impl BatchQueryStore for MemoryStore {
    async fn list_batches(&self, limit: u32, offset: u32) -> Result<Vec<BatchSummary>> {
        let state = self.state();
        let mut summaries: Vec<_> = state
            .batches
            .iter()
            .map(|(batch_id, batch)| BatchSummary {
                batch_id: *batch_id,
                created_at: batch.created_at,
                event_count: batch.events.len() as i64,
                last_event_at: batch.events.last().map(|(_, at)| *at),
                status: batch
                    .outcome
                    .map_or("running", |outcome| outcome.as_str())
                    .to_string(),
                finished_at: batch.finished_at,
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.last_event_at
                .cmp(&a.last_event_at)
                .then_with(|| b.batch_id.cmp(&a.batch_id))
        });

        Ok(summaries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn fetch_batch_events(&self, batch_id: BatchId) -> Result<Vec<StoredEvent>> {
        let state = self.state();
        let Some(batch) = state.batches.get(&batch_id) else {
            return Ok(Vec::new());
        };

        Ok(batch
            .events
            .iter()
            .enumerate()
            .map(|(i, (payload, created_at))| StoredEvent {
                batch_id,
                sequence: i as i64 + 1,
                payload: payload.clone(),
                created_at: *created_at,
            })
            .collect())
    }
}
