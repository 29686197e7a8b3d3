//! Built-in rules.
//!
//! | Event type | Recipients | Effects |
//! |------------|------------|---------|
//! | `obra.completed` | `actorId` | in-app now, email two minutes later |
//! | `pendiente.due` | `userId` | in-app and email at `dueDate` |
//! | `custom.in_app.user` | `userId` | in-app, fields from the event |
//! | `custom.in_app.role` | `role:{roleKey}` | in-app, fields from the event |
//! | `custom.email.user` | `userId` | email, fields from the event |
//!
//! The `custom.*` rules read `title`, `body` (or `message`), `actionUrl`,
//! `type`, `data`, `when`, `subject` and `html` from the context, so callers
//! can send ad-hoc notifications without registering a rule of their own.

use std::sync::Arc;

use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};

use crate::context::EventContext;
use crate::recipient::RecipientToken;
use crate::rule::{EffectDefinition, Rule, RuleRegistry, RuleRegistryBuilder};
use crate::schedule::When;

pub const OBRA_COMPLETED: &str = "obra.completed";
pub const PENDIENTE_DUE: &str = "pendiente.due";
pub const CUSTOM_IN_APP_USER: &str = "custom.in_app.user";
pub const CUSTOM_IN_APP_ROLE: &str = "custom.in_app.role";
pub const CUSTOM_EMAIL_USER: &str = "custom.email.user";

/// Delay between the in-app notice and the email for a completed obra.
pub const OBRA_EMAIL_DELAY: Duration = Duration::minutes(2);

/// A registry holding every built-in rule.
pub fn standard_rules() -> Arc<RuleRegistry> {
    register_standard(RuleRegistry::builder()).build()
}

/// Add the built-in rules to `builder`.
///
/// Rules registered afterwards under the same event type replace these.
pub fn register_standard(builder: RuleRegistryBuilder) -> RuleRegistryBuilder {
    builder
        .register(OBRA_COMPLETED, obra_completed())
        .register(PENDIENTE_DUE, pendiente_due())
        .register(CUSTOM_IN_APP_USER, custom_in_app_user())
        .register(CUSTOM_IN_APP_ROLE, custom_in_app_role())
        .register(CUSTOM_EMAIL_USER, custom_email_user())
}

fn obra_name(ctx: &EventContext) -> String {
    ctx.path_str("obra.name").unwrap_or("sin nombre").to_string()
}

fn obra_body(ctx: &EventContext) -> String {
    format!("La obra \"{}\" fue marcada como completada.", obra_name(ctx))
}

pub fn obra_completed() -> Rule {
    Rule::new(|ctx| user_tokens(ctx.actor_id()))
        .effect(
            EffectDefinition::in_app()
                .title("Obra completada")
                .body_with(obra_body)
                .notification_type("success")
                .action_url_with(|ctx| ctx.path_str("obra.id").map(|id| format!("/excel/{id}")))
                .data_with(|ctx| {
                    Some(json!({
                        "obraId": ctx.get_path("obra.id").cloned().unwrap_or(Value::Null),
                        "obraName": ctx.get_path("obra.name").cloned().unwrap_or(Value::Null),
                    }))
                }),
        )
        .effect(
            EffectDefinition::email()
                .when_with(|_| When::At(OffsetDateTime::now_utc() + OBRA_EMAIL_DELAY))
                .title("Obra completada")
                .subject_with(|ctx| Some(format!("Obra completada: {}", obra_name(ctx))))
                .body_with(obra_body),
        )
}

pub fn pendiente_due() -> Rule {
    let title = |ctx: &EventContext| {
        format!(
            "Pendiente por vencer: {}",
            ctx.get_str("title").unwrap_or("sin título")
        )
    };
    let body = |ctx: &EventContext| {
        ctx.get_str("body")
            .unwrap_or("Un pendiente asignado a ti vence pronto.")
            .to_string()
    };

    Rule::new(|ctx| user_tokens(ctx.get_str("userId")))
        .effect(
            EffectDefinition::in_app()
                .when_with(|ctx| When::from_field(ctx.get("dueDate")))
                .title_with(title)
                .body_with(body)
                .notification_type("warning")
                .action_url_with(|ctx| ctx.get_str("actionUrl").map(str::to_string)),
        )
        .effect(
            EffectDefinition::email()
                .when_with(|ctx| When::from_field(ctx.get("dueDate")))
                .title_with(title)
                .body_with(body)
                .only_if(|ctx| ctx.get("sendEmail").and_then(Value::as_bool) != Some(false)),
        )
}

pub fn custom_in_app_user() -> Rule {
    Rule::new(|ctx| user_tokens(ctx.get_str("userId"))).effect(custom_in_app())
}

pub fn custom_in_app_role() -> Rule {
    Rule::new(|ctx| {
        ctx.get_str("roleKey")
            .map(|role| vec![RecipientToken::role(role)])
            .unwrap_or_default()
    })
    .effect(custom_in_app())
}

pub fn custom_email_user() -> Rule {
    Rule::new(|ctx| user_tokens(ctx.get_str("userId"))).effect(
        EffectDefinition::email()
            .when_with(custom_when)
            .title_with(|ctx| text(ctx, "title"))
            .body_with(custom_body)
            .subject_with(|ctx| ctx.get_str("subject").map(str::to_string))
            .html_with(|ctx| ctx.get_str("html").map(str::to_string)),
    )
}

fn custom_in_app() -> EffectDefinition {
    EffectDefinition::in_app()
        .when_with(custom_when)
        .title_with(|ctx| text(ctx, "title"))
        .body_with(custom_body)
        .action_url_with(|ctx| ctx.get_str("actionUrl").map(str::to_string))
        .notification_type_with(|ctx| ctx.get_str("type").map(str::to_string))
        .data_with(|ctx| ctx.get("data").filter(|d| !d.is_null()).cloned())
}

fn custom_when(ctx: &EventContext) -> When {
    When::from_field(ctx.get("when"))
}

fn custom_body(ctx: &EventContext) -> String {
    ctx.get_str("body")
        .or_else(|| ctx.get_str("message"))
        .unwrap_or_default()
        .to_string()
}

fn text(ctx: &EventContext, key: &str) -> String {
    ctx.get_str(key).unwrap_or_default().to_string()
}

fn user_tokens(user_id: Option<&str>) -> Vec<RecipientToken> {
    user_id.map(|id| vec![RecipientToken::User(id.to_string())]).unwrap_or_default()
}
