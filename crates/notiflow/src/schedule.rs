//! Delivery timing: the `when` of an effect definition and its resolution.
//!
//! An effect definition declares *when* it should be delivered. At expansion
//! time that declaration is resolved, once, against the current instant into a
//! [`Delivery`]:
//!
//! | `When` | Resolved to |
//! |--------|-------------|
//! | `Now`, `Unset` | `Immediate` |
//! | `At(t)` with `t <= now` | `Immediate` |
//! | `At(t)` with `t > now` | `At { at: t }` |
//! | `Raw(null)`, `Raw("now")` | `Immediate` |
//! | `Raw(string)` | RFC 3339 instant, then as `At` |
//! | `Raw(number)` | epoch milliseconds, then as `At` |
//! | anything unparsable or non-finite | `Immediate` |
//!
//! Invalid timing is never an error: it is delivered immediately.
//!
//! A resolved `At` is always an absolute instant, so a batch suspended on it
//! resumes at the right moment no matter how long the process was down.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Declared delivery timing of an effect definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum When {
    /// Deliver as soon as the batch reaches the effect.
    #[default]
    Now,
    /// No timing given; same as [`When::Now`].
    Unset,
    /// Deliver at (or after) a fixed instant.
    At(OffsetDateTime),
    /// A timing taken verbatim from event data: an RFC 3339 string, epoch
    /// milliseconds, `"now"` or `null`.
    Raw(Value),
}

impl When {
    /// Timing read from an event field, e.g. `ctx.get("dueDate")`.
    ///
    /// A missing field is [`When::Unset`].
    pub fn from_field(value: Option<&Value>) -> Self {
        match value {
            Some(value) => When::Raw(value.clone()),
            None => When::Unset,
        }
    }
}

impl From<OffsetDateTime> for When {
    fn from(at: OffsetDateTime) -> Self {
        When::At(at)
    }
}

/// Resolved delivery timing carried by an expanded effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    /// No suspension before delivery.
    Immediate,
    /// Suspend until this instant (UTC), then deliver.
    At {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

impl Delivery {
    /// The instant to suspend until, if any.
    pub fn instant(&self) -> Option<OffsetDateTime> {
        match self {
            Delivery::Immediate => None,
            Delivery::At { at } => Some(*at),
        }
    }
}

/// Resolve a declared timing against `now`.
pub fn resolve_delivery(when: &When, now: OffsetDateTime) -> Delivery {
    let instant = match when {
        When::Now | When::Unset => None,
        When::At(at) => Some(*at),
        When::Raw(value) => parse_raw(value),
    };

    match instant {
        Some(at) if at > now => Delivery::At { at },
        _ => Delivery::Immediate,
    }
}

fn parse_raw(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("now") => None,
        Value::String(s) => OffsetDateTime::parse(s.trim(), &Rfc3339).ok(),
        Value::Number(n) => {
            let millis = n.as_f64().filter(|m| m.is_finite())?;
            let nanos = (millis * 1_000_000.0) as i128;
            OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
        }
        _ => None,
    }
}
