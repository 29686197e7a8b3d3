use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use notiflow::channel::memory::{RecordingMailer, RecordingSink, RecordingTracker};
use notiflow::store::StoredEvent;
use notiflow::{InMemoryDirectory, NotificationEngine, PgStore, RuleRegistry, RuntimeConfig};
use sqlx::PgPool;

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("notiflow=debug")
        .try_init();
}

/// Assert that journal events match the expected types in order.
pub fn assert_event_types(events: &[StoredEvent], expected_types: &[&str]) {
    assert_eq!(
        events.len(),
        expected_types.len(),
        "event count mismatch: expected {}, got {}",
        expected_types.len(),
        events.len()
    );
    for (i, expected_type) in expected_types.iter().enumerate() {
        assert_eq!(
            events[i].payload["type"], *expected_type,
            "event {i} type mismatch: expected {expected_type}, got {}",
            events[i].payload["type"]
        );
    }
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const TEST_LOCK_DURATION: Duration = Duration::from_secs(30);

pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        step_poll_interval: Duration::from_millis(25),
        wakeup_poll_interval: Duration::from_millis(50),
        retry_delay: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(5),
        worker_id: Some("pg-test".into()),
        ..Default::default()
    }
}

pub fn directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_user("u1", "u1@example.com")
        .with_role_member("t1", "foreman", "u2")
        .with_role_member("t1", "foreman", "u3")
}

/// Poll `check` until it yields a value or `timeout` passes.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}

/// An engine over a [`PgStore`] with recording adapters.
pub struct TestApp {
    pub store: PgStore,
    pub engine: NotificationEngine<PgStore>,
    pub sink: RecordingSink,
    pub mailer: RecordingMailer,
    pub tracker: RecordingTracker,
}

impl TestApp {
    pub fn new(pool: &PgPool) -> Result<Self> {
        Self::with(
            pool,
            notiflow::rules::standard_rules(),
            RecordingMailer::new(),
            RecordingTracker::new(),
        )
    }

    pub fn with(
        pool: &PgPool,
        rules: Arc<RuleRegistry>,
        mailer: RecordingMailer,
        tracker: RecordingTracker,
    ) -> Result<Self> {
        let store = PgStore::new(pool.clone());
        let sink = RecordingSink::new();
        let engine = NotificationEngine::builder(store.clone())
            .rules(rules)
            .directory(directory())
            .sink(sink.clone())
            .mailer(mailer.clone())
            .tracker(tracker.clone())
            .config(test_runtime_config())
            .build_engine()?;

        Ok(Self {
            store,
            engine,
            sink,
            mailer,
            tracker,
        })
    }

    pub async fn drain(&self) -> Result<usize> {
        Ok(self.engine.runtime.drain().await?)
    }
}
