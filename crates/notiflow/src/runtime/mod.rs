//! Workers that carry batches forward.
//!
//! - [`NotificationRuntime`]: runs step and wake-up workers
//! - [`EngineBuilder`]: wires store, adapters and rules together
//! - [`RuntimeConfig`]: polling intervals, lock durations, worker counts
//!
//! ```ignore
//! let runtime = NotificationRuntime::builder(store)
//!     .sink(sink)
//!     .mailer(mailer)
//!     .tracker(tracker)
//!     .build_runtime()?;
//!
//! runtime.run(shutdown_signal).await?;
//! ```

mod builder;
mod config;
mod step_worker;
mod wake_worker;

pub use builder::{EngineBuilder, NotificationRuntime};
pub use config::RuntimeConfig;
