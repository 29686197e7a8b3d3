//! Immutable event-type to rule map.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::Rule;

/// Rules keyed by event type.
///
/// Assembled once with [`RuleRegistry::builder`] and shared behind an `Arc`;
/// there is no way to add or remove rules afterwards, so lookups need no lock.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, Rule>,
}

impl RuleRegistry {
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder::default()
    }

    /// The rule registered for `event_type`, if any.
    pub fn lookup(&self, event_type: &str) -> Option<&Rule> {
        self.rules.get(event_type)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Registered event types, in no particular order.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }
}

/// Builder for a [`RuleRegistry`].
#[derive(Debug, Default)]
pub struct RuleRegistryBuilder {
    rules: HashMap<String, Rule>,
}

impl RuleRegistryBuilder {
    /// Register `rule` for `event_type`.
    ///
    /// Registering the same event type again replaces the earlier rule.
    pub fn register(mut self, event_type: impl Into<String>, rule: Rule) -> Self {
        let event_type = event_type.into();
        if self.rules.insert(event_type.clone(), rule).is_some() {
            debug!(event_type = %event_type, "Replacing previously registered rule");
        }
        self
    }

    /// Register every `(event_type, rule)` pair, in order.
    pub fn extend<K>(self, rules: impl IntoIterator<Item = (K, Rule)>) -> Self
    where
        K: Into<String>,
    {
        rules
            .into_iter()
            .fold(self, |builder, (event_type, rule)| builder.register(event_type, rule))
    }

    pub fn build(self) -> Arc<RuleRegistry> {
        Arc::new(RuleRegistry { rules: self.rules })
    }
}
