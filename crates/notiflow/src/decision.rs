//! The output of one decider call.

use nonempty::NonEmpty;
use time::OffsetDateTime;

use crate::wakeup::Wakeup;

/// Everything one input produces, committed atomically.
///
/// Every decision records at least one event (enforced by [`NonEmpty`]), so
/// each input a batch receives, stale ones included, leaves a journal entry.
///
/// - **Events**: facts appended to the batch journal
/// - **Steps**: outbox work items executed by step workers
/// - **Wake-ups**: inputs delivered back to the batch at an instant
#[derive(Debug, Clone)]
pub struct Decision<E, S, I> {
    events: NonEmpty<E>,
    steps: Vec<S>,
    wakeups: Vec<Wakeup<I>>,
}

impl<E, S, I> Decision<E, S, I> {
    /// A decision with a single event.
    pub fn event(event: E) -> Self {
        Self::from_events(NonEmpty::new(event))
    }

    pub fn from_events(events: NonEmpty<E>) -> Self {
        Self {
            events,
            steps: vec![],
            wakeups: vec![],
        }
    }

    pub fn with_step(mut self, step: S) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_wakeup(mut self, wakeup: Wakeup<I>) -> Self {
        self.wakeups.push(wakeup);
        self
    }

    /// Shorthand for `with_wakeup(Wakeup::at(fire_at, input))`.
    pub fn with_wakeup_at(self, fire_at: OffsetDateTime, input: I) -> Self {
        self.with_wakeup(Wakeup::at(fire_at, input))
    }

    pub fn events(&self) -> &NonEmpty<E> {
        &self.events
    }

    pub fn steps(&self) -> &[S] {
        &self.steps
    }

    pub fn wakeups(&self) -> &[Wakeup<I>] {
        &self.wakeups
    }

    pub(crate) fn into_parts(self) -> (NonEmpty<E>, Vec<S>, Vec<Wakeup<I>>) {
        (self.events, self.steps, self.wakeups)
    }
}
