//! Rule expansion: event type + context → ordered effects.

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::debug;

use crate::context::EventContext;
use crate::effect::Effect;
use crate::recipient::{Directory, RecipientResolver, RecipientToken};
use crate::rule::{EffectDefinition, RuleRegistry};
use crate::schedule::resolve_delivery;

/// Expands emitted events into per-recipient effects.
#[derive(Clone)]
pub struct EffectExpander {
    registry: Arc<RuleRegistry>,
    directory: Arc<dyn Directory>,
}

impl EffectExpander {
    pub fn new(registry: Arc<RuleRegistry>, directory: Arc<dyn Directory>) -> Self {
        Self {
            registry,
            directory,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Expand an event against the registered rules.
    ///
    /// Returns an empty list for an unregistered event type or an empty
    /// recipient set. Effects are ordered recipient-major, definition-minor,
    /// and those whose guard rejects the context are left out.
    pub async fn expand(&self, event_type: &str, ctx: &EventContext) -> Vec<Effect> {
        self.expand_at(event_type, ctx, OffsetDateTime::now_utc())
            .await
    }

    /// [`expand`](Self::expand) with an explicit "now" for `when` resolution.
    pub async fn expand_at(
        &self,
        event_type: &str,
        ctx: &EventContext,
        now: OffsetDateTime,
    ) -> Vec<Effect> {
        let Some(rule) = self.registry.lookup(event_type) else {
            debug!(event_type, "No rule registered for event type");
            return Vec::new();
        };

        let recipients = self.resolve_recipients(rule.recipients(ctx), ctx).await;
        if recipients.is_empty() {
            debug!(event_type, "Event resolved to no recipients");
            return Vec::new();
        }

        let resolver = RecipientResolver::new(self.directory.as_ref());
        let tagged = ctx.with_event_type(event_type);
        let execution_id = ctx.execution_id().map(str::to_string);

        let mut effects = Vec::with_capacity(recipients.len() * rule.effects().len());
        for recipient_id in recipients {
            let address = resolver.resolve_contact_address(&recipient_id).await;
            for definition in rule.effects() {
                effects.push(materialize(
                    definition,
                    ctx,
                    now,
                    &recipient_id,
                    address.clone(),
                    &tagged,
                    execution_id.clone(),
                ));
            }
        }

        effects.retain(|effect| effect.send);
        effects
    }

    /// Literal user ids first, then role members in token order; each user once.
    async fn resolve_recipients(
        &self,
        tokens: Vec<RecipientToken>,
        ctx: &EventContext,
    ) -> Vec<String> {
        let resolver = RecipientResolver::new(self.directory.as_ref());
        let (users, roles): (Vec<_>, Vec<_>) = tokens
            .into_iter()
            .partition(|token| matches!(token, RecipientToken::User(_)));

        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        let mut push = |user_id: String| {
            if !user_id.is_empty() && seen.insert(user_id.clone()) {
                recipients.push(user_id);
            }
        };

        for token in users {
            if let RecipientToken::User(user_id) = token {
                push(user_id);
            }
        }
        for token in roles {
            if let RecipientToken::Role(role_key) = token {
                for member in resolver
                    .resolve_role_members(&role_key, ctx.tenant_id())
                    .await
                {
                    push(member);
                }
            }
        }

        recipients
    }
}

fn materialize(
    definition: &EffectDefinition,
    ctx: &EventContext,
    now: OffsetDateTime,
    recipient_id: &str,
    recipient_address: Option<String>,
    tagged: &EventContext,
    execution_id: Option<String>,
) -> Effect {
    let when = definition.when.evaluate(ctx);
    Effect {
        channel: definition.channel,
        delivery: resolve_delivery(&when, now),
        title: definition.title.evaluate(ctx),
        body: definition.body.evaluate(ctx),
        subject: definition.subject.evaluate(ctx),
        html: definition.html.evaluate(ctx),
        action_url: definition.action_url.evaluate(ctx),
        data: definition.data.evaluate(ctx),
        notification_type: definition.notification_type.evaluate(ctx),
        recipient_id: recipient_id.to_string(),
        recipient_address,
        context: tagged.clone(),
        send: definition.should_send(ctx),
        execution_id,
    }
}
