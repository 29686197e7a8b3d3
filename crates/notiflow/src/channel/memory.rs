//! Recording adapters for tests and local runs.
//!
//! Each adapter keeps what it was asked to do behind a shared handle, so a
//! clone given to the runtime and a clone kept by the test see the same
//! records. `fail_with` makes every call fail with the given message.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{
    ChannelError, ExecutionTracker, ExecutionUpdate, Mailer, NotificationRow, NotificationSink,
    OutgoingEmail, StepContext,
};

#[derive(Debug)]
struct Recorder<T> {
    records: Mutex<Vec<T>>,
    attempts: AtomicUsize,
    failure: Option<String>,
}

impl<T: Clone> Recorder<T> {
    fn new(failure: Option<String>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failure,
        }
    }

    fn record(&self, item: &T) -> Result<(), String> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = &self.failure {
            return Err(message.clone());
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item.clone());
        Ok(())
    }

    fn records(&self) -> Vec<T> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

/// A [`NotificationSink`] that keeps inserted rows.
#[derive(Debug, Clone)]
pub struct RecordingSink(Arc<Recorder<NotificationRow>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self(Arc::new(Recorder::new(None)))
    }

    pub fn fail_with(self, message: impl Into<String>) -> Self {
        Self(Arc::new(Recorder::new(Some(message.into()))))
    }

    /// Rows inserted successfully, in order.
    pub fn rows(&self) -> Vec<NotificationRow> {
        self.0.records()
    }

    /// Calls made, failed ones included.
    pub fn attempts(&self) -> usize {
        self.0.attempts()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn insert(&self, row: &NotificationRow, _ctx: &StepContext) -> Result<(), ChannelError> {
        self.0.record(row).map_err(ChannelError::Notification)
    }
}

/// A [`Mailer`] that keeps sent emails.
#[derive(Debug, Clone)]
pub struct RecordingMailer(Arc<Recorder<OutgoingEmail>>);

impl RecordingMailer {
    pub fn new() -> Self {
        Self(Arc::new(Recorder::new(None)))
    }

    pub fn fail_with(self, message: impl Into<String>) -> Self {
        Self(Arc::new(Recorder::new(Some(message.into()))))
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.0.records()
    }

    pub fn attempts(&self) -> usize {
        self.0.attempts()
    }
}

impl Default for RecordingMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail, _ctx: &StepContext) -> Result<(), ChannelError> {
        self.0.record(email).map_err(ChannelError::Email)
    }
}

/// An [`ExecutionTracker`] that keeps status updates.
#[derive(Debug, Clone)]
pub struct RecordingTracker(Arc<Recorder<ExecutionUpdate>>);

impl RecordingTracker {
    pub fn new() -> Self {
        Self(Arc::new(Recorder::new(None)))
    }

    pub fn fail_with(self, message: impl Into<String>) -> Self {
        Self(Arc::new(Recorder::new(Some(message.into()))))
    }

    pub fn updates(&self) -> Vec<ExecutionUpdate> {
        self.0.records()
    }

    pub fn attempts(&self) -> usize {
        self.0.attempts()
    }
}

impl Default for RecordingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionTracker for RecordingTracker {
    async fn mark(&self, update: &ExecutionUpdate, _ctx: &StepContext) -> Result<(), ChannelError> {
        self.0.record(update).map_err(ChannelError::Execution)
    }
}
