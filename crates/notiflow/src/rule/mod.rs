//! Rules: how an event type maps to recipients and effect definitions.
//!
//! A [`Rule`] pairs a recipient-selection function with an ordered list of
//! [`EffectDefinition`]s. Every field of a definition is a [`Template`],
//! either fixed when the rule is built or computed from the event context
//! when the event is expanded.
//!
//! # Example
//!
//! ```
//! use notiflow::{EffectDefinition, EventContext, RecipientToken, Rule};
//!
//! let rule = Rule::new(|ctx: &EventContext| {
//!     ctx.actor_id().map(RecipientToken::from).into_iter().collect()
//! })
//! .effect(
//!     EffectDefinition::in_app()
//!         .title("Obra completada")
//!         .body_with(|ctx| {
//!             format!("{} fue completada", ctx.path_str("obra.name").unwrap_or("La obra"))
//!         }),
//! );
//!
//! assert_eq!(rule.effects().len(), 1);
//! ```

mod registry;
mod template;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::{RuleRegistry, RuleRegistryBuilder};
pub use template::Template;

use crate::context::EventContext;
use crate::recipient::RecipientToken;
use crate::schedule::When;

/// Delivery channel of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// A notification row shown inside the application.
    InApp,
    /// An email sent to the recipient's contact address.
    Email,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::InApp => f.write_str("in-app"),
            Channel::Email => f.write_str("email"),
        }
    }
}

/// Declares one effect a rule produces for every recipient.
///
/// Built with consuming setters; each field has a `*_with` variant taking a
/// function of the event context. Unset text fields are empty, unset optional
/// fields are `None`, `when` defaults to [`When::Now`] and the guard to `true`.
#[derive(Debug, Clone)]
pub struct EffectDefinition {
    pub(crate) channel: Channel,
    pub(crate) when: Template<When>,
    pub(crate) title: Template<String>,
    pub(crate) body: Template<String>,
    pub(crate) subject: Template<Option<String>>,
    pub(crate) html: Template<Option<String>>,
    pub(crate) action_url: Template<Option<String>>,
    pub(crate) data: Template<Option<Value>>,
    pub(crate) notification_type: Template<Option<String>>,
    pub(crate) guard: Option<Template<bool>>,
}

impl EffectDefinition {
    /// A definition for the given channel with every field unset.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            when: Template::value(When::Now),
            title: Template::default(),
            body: Template::default(),
            subject: Template::default(),
            html: Template::default(),
            action_url: Template::default(),
            data: Template::default(),
            notification_type: Template::default(),
            guard: None,
        }
    }

    /// An in-app notification.
    pub fn in_app() -> Self {
        Self::new(Channel::InApp)
    }

    /// An email.
    pub fn email() -> Self {
        Self::new(Channel::Email)
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Fixed delivery timing.
    pub fn when(mut self, when: impl Into<When>) -> Self {
        self.when = Template::value(when.into());
        self
    }

    /// Delivery timing computed from the context.
    pub fn when_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> When + Send + Sync + 'static,
    {
        self.when = Template::computed(f);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Template::value(title.into());
        self
    }

    pub fn title_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> String + Send + Sync + 'static,
    {
        self.title = Template::computed(f);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Template::value(body.into());
        self
    }

    pub fn body_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> String + Send + Sync + 'static,
    {
        self.body = Template::computed(f);
        self
    }

    /// Email subject. Falls back to the title at delivery.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Template::value(Some(subject.into()));
        self
    }

    pub fn subject_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> Option<String> + Send + Sync + 'static,
    {
        self.subject = Template::computed(f);
        self
    }

    /// Email HTML body. Synthesized from title and body when unset.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Template::value(Some(html.into()));
        self
    }

    pub fn html_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> Option<String> + Send + Sync + 'static,
    {
        self.html = Template::computed(f);
        self
    }

    /// Link the notification points to.
    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Template::value(Some(url.into()));
        self
    }

    pub fn action_url_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> Option<String> + Send + Sync + 'static,
    {
        self.action_url = Template::computed(f);
        self
    }

    /// Structured payload stored with an in-app notification.
    pub fn data(mut self, data: Value) -> Self {
        self.data = Template::value(Some(data));
        self
    }

    pub fn data_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> Option<Value> + Send + Sync + 'static,
    {
        self.data = Template::computed(f);
        self
    }

    /// Notification type such as `"success"`. Defaults to `"info"` at delivery.
    pub fn notification_type(mut self, kind: impl Into<String>) -> Self {
        self.notification_type = Template::value(Some(kind.into()));
        self
    }

    pub fn notification_type_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventContext) -> Option<String> + Send + Sync + 'static,
    {
        self.notification_type = Template::computed(f);
        self
    }

    /// Only produce the effect when `guard` returns `true` for the context.
    pub fn only_if<F>(mut self, guard: F) -> Self
    where
        F: Fn(&EventContext) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Template::computed(guard));
        self
    }

    /// Evaluate the guard. A definition without one always sends.
    pub(crate) fn should_send(&self, ctx: &EventContext) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard.evaluate(ctx))
    }
}

type RecipientFn = dyn Fn(&EventContext) -> Vec<RecipientToken> + Send + Sync;

/// How one event type is turned into effects.
#[derive(Clone)]
pub struct Rule {
    recipients: Arc<RecipientFn>,
    effects: Vec<EffectDefinition>,
}

impl Rule {
    /// A rule selecting recipients with `recipients` and no effects yet.
    pub fn new<F>(recipients: F) -> Self
    where
        F: Fn(&EventContext) -> Vec<RecipientToken> + Send + Sync + 'static,
    {
        Self {
            recipients: Arc::new(recipients),
            effects: Vec::new(),
        }
    }

    /// Append an effect definition.
    pub fn effect(mut self, definition: EffectDefinition) -> Self {
        self.effects.push(definition);
        self
    }

    /// Append several effect definitions, keeping their order.
    pub fn with_effects(mut self, definitions: impl IntoIterator<Item = EffectDefinition>) -> Self {
        self.effects.extend(definitions);
        self
    }

    /// Recipient tokens for an event.
    pub fn recipients(&self, ctx: &EventContext) -> Vec<RecipientToken> {
        (self.recipients)(ctx)
    }

    pub fn effects(&self) -> &[EffectDefinition] {
        &self.effects
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("recipients", &"..")
            .field("effects", &self.effects)
            .finish()
    }
}
