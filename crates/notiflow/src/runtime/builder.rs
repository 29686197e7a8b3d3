//! Runtime and engine construction.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::config::RuntimeConfig;
use super::step_worker::StepWorker;
use super::wake_worker::WakeWorker;
use crate::channel::{DeliveryHandler, ExecutionTracker, Mailer, NotificationSink};
use crate::dispatch::Dispatcher;
use crate::engine::NotificationEngine;
use crate::error::{Error, Result};
use crate::recipient::Directory;
use crate::rule::RuleRegistry;
use crate::service::BatchService;
use crate::store::{OutboxStore, ParkedStep, Store};

/// Builder for a [`NotificationRuntime`] or a full [`NotificationEngine`].
///
/// ```ignore
/// let engine = NotificationEngine::builder(store)
///     .rules(notiflow::rules::standard_rules())
///     .directory(directory)
///     .sink(sink)
///     .mailer(mailer)
///     .tracker(tracker)
///     .config(RuntimeConfig { step_workers: 4, ..Default::default() })
///     .build_engine()?;
/// ```
///
/// Missing collaborators are reported at build time as
/// [`Error::MissingCollaborator`].
pub struct EngineBuilder<S> {
    store: S,
    rules: Option<Arc<RuleRegistry>>,
    directory: Option<Arc<dyn Directory>>,
    sink: Option<Arc<dyn NotificationSink>>,
    mailer: Option<Arc<dyn Mailer>>,
    tracker: Option<Arc<dyn ExecutionTracker>>,
    config: RuntimeConfig,
}

impl<S> EngineBuilder<S>
where
    S: Store + OutboxStore,
{
    pub(crate) fn new(store: S) -> Self {
        Self {
            store,
            rules: None,
            directory: None,
            sink: None,
            mailer: None,
            tracker: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn rules(mut self, rules: Arc<RuleRegistry>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn directory(mut self, directory: impl Directory) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    pub fn sink(mut self, sink: impl NotificationSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn mailer(mut self, mailer: impl Mailer) -> Self {
        self.mailer = Some(Arc::new(mailer));
        self
    }

    pub fn tracker(mut self, tracker: impl ExecutionTracker) -> Self {
        self.tracker = Some(Arc::new(tracker));
        self
    }

    /// If not called, [`RuntimeConfig::default()`] is used.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the dispatcher and runtime over one shared service.
    ///
    /// Requires rules and a directory on top of what
    /// [`build_runtime`](Self::build_runtime) needs.
    pub fn build_engine(mut self) -> Result<NotificationEngine<S>> {
        let rules = self.rules.take().ok_or(Error::MissingCollaborator("rule registry"))?;
        let directory = self
            .directory
            .take()
            .ok_or(Error::MissingCollaborator("directory"))?;

        let runtime = self.build_runtime()?;
        let dispatcher = Dispatcher::new(rules, directory, runtime.service.clone());

        Ok(NotificationEngine {
            dispatcher,
            service: Arc::clone(&runtime.service),
            runtime,
        })
    }

    /// Build the runtime alone, for processes that only run workers.
    pub fn build_runtime(self) -> Result<NotificationRuntime<S>> {
        let sink = self
            .sink
            .ok_or(Error::MissingCollaborator("notification sink"))?;
        let mailer = self.mailer.ok_or(Error::MissingCollaborator("mailer"))?;
        let tracker = self
            .tracker
            .ok_or(Error::MissingCollaborator("execution tracker"))?;

        let worker_id = self
            .config
            .worker_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(NotificationRuntime {
            service: Arc::new(BatchService::new(self.store.clone())),
            store: self.store,
            handler: DeliveryHandler::new(sink, mailer, tracker),
            config: self.config,
            worker_id,
        })
    }
}

/// Runs step and wake-up workers over a store.
///
/// # Lifecycle
///
/// 1. create with [`NotificationRuntime::builder`] (or through
///    [`NotificationEngine::builder`])
/// 2. [`run`](Self::run) until a shutdown future completes, or
///    [`drain`](Self::drain) whatever is due right now
#[derive(Clone)]
pub struct NotificationRuntime<S> {
    store: S,
    service: Arc<BatchService<S>>,
    handler: DeliveryHandler,
    config: RuntimeConfig,
    worker_id: String,
}

impl<S> NotificationRuntime<S>
where
    S: Store + OutboxStore,
{
    pub fn builder(store: S) -> EngineBuilder<S> {
        EngineBuilder::new(store)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn service(&self) -> &Arc<BatchService<S>> {
        &self.service
    }

    /// Run the workers until `shutdown` completes.
    ///
    /// On shutdown every worker finishes its current item and stops; the
    /// runtime waits up to `shutdown_timeout` for them.
    ///
    /// ```ignore
    /// runtime.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
    /// ```
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let step_workers = self.config.step_workers.max(1);
        let wakeup_workers = self.config.wakeup_workers.max(1);

        info!(
            worker_id = %self.worker_id,
            step_workers,
            wakeup_workers,
            "Runtime starting"
        );

        let mut handles = Vec::new();

        for i in 0..step_workers {
            let worker = self.step_worker(worker_name(&self.worker_id, "step", i, step_workers));
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move { worker.run(rx).await }));
        }

        for i in 0..wakeup_workers {
            let worker = self.wake_worker(worker_name(&self.worker_id, "wake", i, wakeup_workers));
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move { worker.run(rx).await }));
        }

        shutdown.await;
        let _ = shutdown_tx.send(true);

        let all_workers = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, all_workers).await {
            Ok(()) => info!(worker_id = %self.worker_id, "Runtime stopped gracefully"),
            Err(_) => tracing::warn!(
                worker_id = %self.worker_id,
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout exceeded, forcing stop"
            ),
        }

        Ok(())
    }

    /// Process due wake-ups and steps until none are left.
    ///
    /// Returns how many items were handled. Wake-ups that are not yet due
    /// stay where they are.
    pub async fn drain(&self) -> Result<usize> {
        let wake = self.wake_worker(format!("{}-drain", self.worker_id));
        let step = self.step_worker(format!("{}-drain", self.worker_id));

        let mut processed = 0;
        loop {
            let mut progressed = false;
            while step.process_one().await? {
                processed += 1;
                progressed = true;
            }
            if wake.process_one().await? {
                processed += 1;
                progressed = true;
            }
            if !progressed {
                return Ok(processed);
            }
        }
    }

    /// Steps set aside because they could not be executed, newest first.
    pub async fn fetch_parked_steps(&self, limit: u32) -> Result<Vec<ParkedStep>> {
        self.store.fetch_parked_steps(limit).await
    }

    fn step_worker(&self, worker_id: String) -> StepWorker<S> {
        StepWorker::new(
            self.store.clone(),
            Arc::clone(&self.service),
            self.handler.clone(),
            self.config.clone(),
            worker_id,
        )
    }

    fn wake_worker(&self, worker_id: String) -> WakeWorker<S> {
        WakeWorker::new(
            self.store.clone(),
            Arc::clone(&self.service),
            self.config.clone(),
            worker_id,
        )
    }
}

fn worker_name(base: &str, kind: &str, index: usize, count: usize) -> String {
    if count == 1 {
        format!("{base}-{kind}")
    } else {
        format!("{base}-{kind}-{index}")
    }
}
