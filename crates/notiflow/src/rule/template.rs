//! Effect definition fields: a fixed value or a pure function of the context.

use std::fmt;
use std::sync::Arc;

use crate::context::EventContext;

/// A field of an effect definition.
///
/// Either a value fixed at registration time or a pure function of the event
/// context, evaluated once per expanded effect.
pub enum Template<T> {
    /// A fixed value.
    Static(T),
    /// A value computed from the event context.
    Computed(Arc<dyn Fn(&EventContext) -> T + Send + Sync>),
}

impl<T> Template<T> {
    /// A fixed value.
    pub fn value(value: T) -> Self {
        Template::Static(value)
    }

    /// A value computed from the event context.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&EventContext) -> T + Send + Sync + 'static,
    {
        Template::Computed(Arc::new(f))
    }
}

impl<T: Clone> Template<T> {
    /// Resolve the field for one event context.
    pub fn evaluate(&self, ctx: &EventContext) -> T {
        match self {
            Template::Static(value) => value.clone(),
            Template::Computed(f) => f(ctx),
        }
    }
}

impl<T: Default> Default for Template<T> {
    fn default() -> Self {
        Template::Static(T::default())
    }
}

impl<T: Clone> Clone for Template<T> {
    fn clone(&self) -> Self {
        match self {
            Template::Static(value) => Template::Static(value.clone()),
            Template::Computed(f) => Template::Computed(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Template<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Template::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}
