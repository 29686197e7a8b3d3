//! Runtime configuration.

use std::time::Duration;

/// Configuration for the step and wake-up workers.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use notiflow::runtime::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     step_poll_interval: Duration::from_millis(50),
///     step_workers: 4,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How often to poll for steps. Default: 100ms.
    pub step_poll_interval: Duration,

    /// How often to poll for due wake-ups.
    ///
    /// Suspensions end at most this late. Default: 1 second.
    pub wakeup_poll_interval: Duration,

    /// How long a claimed step stays locked.
    ///
    /// Should exceed the slowest adapter call; a step whose worker dies is
    /// claimable again afterwards. Default: 5 minutes.
    pub step_lock_duration: Duration,

    /// How long a claimed wake-up stays locked. Default: 5 minutes.
    pub wakeup_lock_duration: Duration,

    /// Delay before an item is retried after an infrastructure failure,
    /// such as a store error while routing a step's outcome.
    ///
    /// Adapter failures are never retried. Default: 5 seconds.
    pub retry_delay: Duration,

    /// Maximum wait for in-flight work on shutdown. Default: 30 seconds.
    pub shutdown_timeout: Duration,

    /// Worker identifier recorded on claims.
    ///
    /// A UUID is generated when `None`.
    pub worker_id: Option<String>,

    /// Number of step workers. Default: 1.
    pub step_workers: usize,

    /// Number of wake-up workers. Default: 1.
    pub wakeup_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            step_poll_interval: Duration::from_millis(100),
            wakeup_poll_interval: Duration::from_secs(1),
            step_lock_duration: Duration::from_secs(300),
            wakeup_lock_duration: Duration::from_secs(300),
            retry_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            worker_id: None,
            step_workers: 1,
            wakeup_workers: 1,
        }
    }
}
