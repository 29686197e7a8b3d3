//! Event context: the open key/value bag handed to every template.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Key holding the tenant the event belongs to.
pub const TENANT_ID: &str = "tenantId";
/// Key holding the user that caused the event.
pub const ACTOR_ID: &str = "actorId";
/// Key holding the external execution record correlated with the emission.
pub const EXECUTION_ID: &str = "executionId";
/// Key the expander adds to each effect's context copy.
pub const EVENT_TYPE: &str = "eventType";

/// Untyped key/value data describing one emitted event.
///
/// Besides the well-known `tenantId`, `actorId` and `executionId` keys (all
/// optional), a context carries arbitrary event-specific fields such as
/// `obraId`, `dueDate` or nested objects.
///
/// A context is assembled once per emission with the consuming [`with`](Self::with)
/// builder and is only read afterwards.
///
/// # Example
///
/// ```
/// use notiflow::EventContext;
/// use serde_json::json;
///
/// let ctx = EventContext::new()
///     .with("tenantId", "t1")
///     .with("actorId", "u1")
///     .with("obra", json!({ "id": "o1", "name": "Hospital" }));
///
/// assert_eq!(ctx.tenant_id(), Some("t1"));
/// assert_eq!(ctx.path_str("obra.name"), Some("Hospital"));
/// assert_eq!(ctx.execution_id(), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventContext(Map<String, Value>);

impl EventContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidInput(format!(
                "event context must be a JSON object, got {other}"
            ))),
        }
    }

    /// Add (or replace) a field, returning the extended context.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a top-level field holding a non-empty string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(non_empty_str)
    }

    /// Look up a nested field with a dotted path such as `"obra.name"`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a nested field holding a non-empty string.
    pub fn path_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(non_empty_str)
    }

    /// The tenant this event is scoped to.
    pub fn tenant_id(&self) -> Option<&str> {
        self.get_str(TENANT_ID)
    }

    /// The user who caused the event.
    pub fn actor_id(&self) -> Option<&str> {
        self.get_str(ACTOR_ID)
    }

    /// The external execution record correlated with this emission.
    pub fn execution_id(&self) -> Option<&str> {
        self.get_str(EXECUTION_ID)
    }

    /// The event type, present on the context copies carried by effects.
    pub fn event_type(&self) -> Option<&str> {
        self.get_str(EVENT_TYPE)
    }

    /// Return a copy of this context tagged with the event type.
    pub fn with_event_type(&self, event_type: &str) -> Self {
        self.clone().with(EVENT_TYPE, event_type)
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for EventContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}
