use std::sync::Arc;
use std::time::Duration;

use notiflow::channel::memory::{RecordingMailer, RecordingSink, RecordingTracker};
use notiflow::{
    BatchId, BatchQueryStore, InMemoryDirectory, MemoryStore, NotificationEngine, RuleRegistry,
    RuntimeConfig,
};

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("notiflow=debug")
        .with_test_writer()
        .try_init();
}

/// u1 and u2 have addresses; u2 and u3 are foremen in t1.
pub fn directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_user("u1", "u1@example.com")
        .with_user("u2", "u2@example.com")
        .with_role_member("t1", "foreman", "u2")
        .with_role_member("t1", "foreman", "u3")
}

pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        step_poll_interval: Duration::from_millis(10),
        wakeup_poll_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(2),
        worker_id: Some("test".into()),
        ..Default::default()
    }
}

/// An engine over a [`MemoryStore`] with recording adapters.
pub struct TestApp {
    pub store: MemoryStore,
    pub engine: NotificationEngine<MemoryStore>,
    pub sink: RecordingSink,
    pub mailer: RecordingMailer,
    pub tracker: RecordingTracker,
    rules: Arc<RuleRegistry>,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            store: MemoryStore::new(),
            rules: notiflow::rules::standard_rules(),
            sink: RecordingSink::new(),
            mailer: RecordingMailer::new(),
            tracker: RecordingTracker::new(),
        }
    }

    /// A fresh engine over the same store and adapters, as after a process restart.
    pub fn restart(&self) -> TestApp {
        build(
            self.store.clone(),
            Arc::clone(&self.rules),
            self.sink.clone(),
            self.mailer.clone(),
            self.tracker.clone(),
        )
    }

    pub async fn drain(&self) -> usize {
        self.engine.runtime.drain().await.expect("drain failed")
    }

    /// Journal event types of a batch, in order.
    pub async fn event_types(&self, batch_id: BatchId) -> Vec<String> {
        self.store
            .fetch_batch_events(batch_id)
            .await
            .expect("fetch events")
            .into_iter()
            .map(|e| e.payload["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

pub struct TestAppBuilder {
    store: MemoryStore,
    rules: Arc<RuleRegistry>,
    sink: RecordingSink,
    mailer: RecordingMailer,
    tracker: RecordingTracker,
}

impl TestAppBuilder {
    pub fn store(mut self, store: MemoryStore) -> Self {
        self.store = store;
        self
    }

    pub fn rules(mut self, rules: Arc<RuleRegistry>) -> Self {
        self.rules = rules;
        self
    }

    pub fn sink(mut self, sink: RecordingSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn mailer(mut self, mailer: RecordingMailer) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn tracker(mut self, tracker: RecordingTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn build(self) -> TestApp {
        build(self.store, self.rules, self.sink, self.mailer, self.tracker)
    }
}

fn build(
    store: MemoryStore,
    rules: Arc<RuleRegistry>,
    sink: RecordingSink,
    mailer: RecordingMailer,
    tracker: RecordingTracker,
) -> TestApp {
    let engine = NotificationEngine::builder(store.clone())
        .rules(Arc::clone(&rules))
        .directory(directory())
        .sink(sink.clone())
        .mailer(mailer.clone())
        .tracker(tracker.clone())
        .config(test_runtime_config())
        .build_engine()
        .expect("engine should build");

    TestApp {
        store,
        engine,
        sink,
        mailer,
        tracker,
        rules,
    }
}
