//! Rule-driven notifications with durable, deferred delivery.
//!
//! A domain event is matched against a registered [`Rule`], expanded into one
//! [`Effect`] per (recipient × effect definition), and handed to a durable
//! delivery batch that walks the effects in order. An effect due in the
//! future suspends the batch until that instant; a suspended batch is just a
//! row in the wake-up table, so it survives restarts.
//!
//! # Architecture
//!
//! ```text
//! emit(event_type, ctx)
//!   └─ EffectExpander: rule → recipients → Vec<Effect>
//!       └─ BatchService::start ─ decider cycle:
//!            1. begin unit of work (per-batch lock)
//!            2. replay journal → BatchState
//!            3. DeliveryBatch::decide(now, state, input)
//!            4. append events, enqueue steps, schedule wake-ups
//!            5. commit
//!
//! StepWorker: Deliver step → channel adapter → StepSucceeded / StepFailed
//! WakeWorker: due wake-up  → Wake input
//! ```
//!
//! # Example
//!
//! ```
//! use notiflow::{EffectDefinition, EventContext, RecipientToken, Rule, RuleRegistry};
//!
//! let registry = RuleRegistry::builder()
//!     .register(
//!         "task.assigned",
//!         Rule::new(|ctx: &EventContext| {
//!             ctx.get_str("assignee")
//!                 .map(|id| vec![RecipientToken::User(id.to_string())])
//!                 .unwrap_or_default()
//!         })
//!         .effect(
//!             EffectDefinition::in_app()
//!                 .title("Nueva tarea")
//!                 .body_with(|ctx| {
//!                     format!("Se te asignó {}", ctx.get_str("task").unwrap_or("una tarea"))
//!                 }),
//!         ),
//!     )
//!     .build();
//!
//! assert!(registry.lookup("task.assigned").is_some());
//! ```
//!
//! # Feature Flags
//!
//! - `postgres`: [`PgStore`](store::PgStore), a PostgreSQL substrate
//! - `smtp`: [`SmtpMailer`](channel::SmtpMailer), an SMTP [`Mailer`](channel::Mailer)

pub mod batch;
pub mod channel;
mod context;
mod decision;
mod dispatch;
mod effect;
mod engine;
mod error;
mod expander;
mod recipient;
pub mod rule;
pub mod rules;
pub mod runtime;
mod schedule;
mod service;
pub mod store;
mod wakeup;

pub use batch::{BatchEvent, BatchId, BatchInput, BatchOutcome, BatchStep, DeliveryBatch};
pub use context::EventContext;
pub use decision::Decision;
pub use dispatch::{BatchStarter, Dispatcher, NewBatch};
pub use effect::Effect;
pub use engine::NotificationEngine;
pub use error::{Error, Result};
pub use expander::EffectExpander;
pub use nonempty::NonEmpty;
pub use recipient::{
    Directory, DirectoryError, InMemoryDirectory, RecipientResolver, RecipientToken,
};
pub use rule::{Channel, EffectDefinition, Rule, RuleRegistry, Template};
pub use runtime::{EngineBuilder, NotificationRuntime, RuntimeConfig};
pub use schedule::{Delivery, When, resolve_delivery};
pub use service::BatchService;
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use store::{BatchQueryStore, MemoryStore, OutboxStore, Store};
pub use wakeup::Wakeup;
