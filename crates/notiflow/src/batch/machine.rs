//! The batch state machine: `evolve` rebuilds state, `decide` reacts to inputs.

use nonempty::NonEmpty;
use time::OffsetDateTime;

use super::{BatchEvent, BatchId, BatchInput, BatchStep};
use crate::channel::ExecutionStatus;
use crate::decision::Decision;
use crate::effect::Effect;

/// What a batch does next with the effect under its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Not meant to be sent; move past it.
    Skip { index: usize },
    /// Wait until `until` (absolute) before delivering.
    Suspend { index: usize, until: OffsetDateTime },
    /// Hand the effect to its channel adapter now.
    Deliver { index: usize },
    /// No effects left.
    Finish,
}

/// Where a batch is in its walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Phase {
    #[default]
    New,
    /// Between steps. Only seen transiently while deciding.
    Running,
    Suspended {
        index: usize,
        until: OffsetDateTime,
    },
    /// A `Deliver` step for `index` is in the outbox.
    Awaiting { index: usize },
    Completed,
    Failed { index: usize, error: String },
}

/// Terminal result of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    Failed,
}

impl BatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Completed => "completed",
            BatchOutcome::Failed => "failed",
        }
    }
}

/// State rebuilt from a batch journal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchState {
    pub event_type: String,
    pub effects: Vec<Effect>,
    pub execution_id: Option<String>,
    /// Index of the next effect to process.
    pub cursor: usize,
    /// Index whose suspension has already elapsed.
    pub resumed: Option<usize>,
    pub phase: Phase,
}

impl BatchState {
    pub fn outcome(&self) -> Option<BatchOutcome> {
        match self.phase {
            Phase::Completed => Some(BatchOutcome::Completed),
            Phase::Failed { .. } => Some(BatchOutcome::Failed),
            _ => None,
        }
    }
}

/// The step for the effect under the cursor.
///
/// Effects are taken strictly in list order: an effect waiting on a far
/// instant holds back every later effect, however soon those are due. An
/// instant already reached by `now` is delivered without suspending.
pub fn next_step(state: &BatchState, now: OffsetDateTime) -> Step {
    let index = state.cursor;
    let Some(effect) = state.effects.get(index) else {
        return Step::Finish;
    };

    if !effect.send {
        return Step::Skip { index };
    }

    match effect.delivery.instant() {
        Some(until) if until > now && state.resumed != Some(index) => {
            Step::Suspend { index, until }
        }
        _ => Step::Deliver { index },
    }
}

pub type BatchDecision = Decision<BatchEvent, BatchStep, BatchInput>;

/// Pure decision logic of a delivery batch.
///
/// `decide` never performs I/O; channel calls and suspensions leave it as
/// outbox steps and wake-ups for the runtime to carry out.
///
/// ```text
/// Start          New        -> walk
/// Wake(i)        Suspended  -> Resumed(i), walk
/// StepSucceeded  Awaiting   -> Delivered(i), walk
/// StepFailed     Awaiting   -> Failed(i)            (terminal)
/// anything else             -> Ignored
///
/// walk: Skip* then one of Suspended (wake-up), Dispatched (Deliver step),
///       Completed (terminal)
/// ```
pub struct DeliveryBatch;

impl DeliveryBatch {
    pub fn evolve(mut state: BatchState, event: BatchEvent) -> BatchState {
        match event {
            BatchEvent::Started {
                event_type,
                effects,
                execution_id,
            } => {
                state.event_type = event_type;
                state.effects = effects;
                state.execution_id = execution_id;
                state.cursor = 0;
                state.phase = Phase::Running;
            }
            BatchEvent::Skipped { index } | BatchEvent::Delivered { index } => {
                state.cursor = index + 1;
                state.resumed = None;
                state.phase = Phase::Running;
            }
            BatchEvent::Suspended { index, until } => {
                state.cursor = index;
                state.phase = Phase::Suspended { index, until };
            }
            BatchEvent::Resumed { index, .. } => {
                state.resumed = Some(index);
                state.phase = Phase::Running;
            }
            BatchEvent::Dispatched { index } => {
                state.cursor = index;
                state.phase = Phase::Awaiting { index };
            }
            BatchEvent::Completed => state.phase = Phase::Completed,
            BatchEvent::Failed { index, error } => state.phase = Phase::Failed { index, error },
            BatchEvent::Ignored { .. } => {}
        }
        state
    }

    pub fn decide(now: OffsetDateTime, state: &BatchState, input: &BatchInput) -> BatchDecision {
        match (input, &state.phase) {
            (
                BatchInput::Start {
                    batch_id,
                    event_type,
                    effects,
                    execution_id,
                },
                Phase::New,
            ) => {
                let started = BatchEvent::Started {
                    event_type: event_type.clone(),
                    effects: effects.clone(),
                    execution_id: execution_id.clone(),
                };
                Advance::new(*batch_id, state.clone(), started).run(now)
            }
            (BatchInput::Wake { batch_id, index }, Phase::Suspended { index: waiting, .. })
                if index == waiting =>
            {
                let resumed = BatchEvent::Resumed {
                    index: *index,
                    at: now,
                };
                Advance::new(*batch_id, state.clone(), resumed).run(now)
            }
            (BatchInput::StepSucceeded { batch_id, index }, Phase::Awaiting { index: pending })
                if index == pending =>
            {
                let delivered = BatchEvent::Delivered { index: *index };
                Advance::new(*batch_id, state.clone(), delivered).run(now)
            }
            (
                BatchInput::StepFailed {
                    batch_id,
                    index,
                    error,
                },
                Phase::Awaiting { index: pending },
            ) if index == pending => {
                let decision = Decision::event(BatchEvent::Failed {
                    index: *index,
                    error: error.clone(),
                });
                match &state.execution_id {
                    Some(execution_id) => decision.with_step(BatchStep::RecordOutcome {
                        batch_id: *batch_id,
                        execution_id: execution_id.clone(),
                        status: ExecutionStatus::Failed,
                        error_message: Some(error.clone()),
                    }),
                    None => decision,
                }
            }
            (input, phase) => Decision::event(BatchEvent::Ignored {
                reason: ignored_reason(input, phase),
            }),
        }
    }

    pub fn is_terminal(state: &BatchState) -> bool {
        state.outcome().is_some()
    }
}

fn ignored_reason(input: &BatchInput, phase: &Phase) -> String {
    let input = match input {
        BatchInput::Start { .. } => "start",
        BatchInput::Wake { .. } => "wake",
        BatchInput::StepSucceeded { .. } => "step_succeeded",
        BatchInput::StepFailed { .. } => "step_failed",
    };
    format!("{input} does not apply in phase {phase:?}")
}

/// Applies events and walks the cursor until the batch has to wait.
struct Advance {
    batch_id: BatchId,
    state: BatchState,
    events: NonEmpty<BatchEvent>,
}

impl Advance {
    fn new(batch_id: BatchId, state: BatchState, first: BatchEvent) -> Self {
        Self {
            batch_id,
            state: DeliveryBatch::evolve(state, first.clone()),
            events: NonEmpty::new(first),
        }
    }

    fn record(&mut self, event: BatchEvent) {
        let state = std::mem::take(&mut self.state);
        self.state = DeliveryBatch::evolve(state, event.clone());
        self.events.push(event);
    }

    fn run(mut self, now: OffsetDateTime) -> BatchDecision {
        loop {
            match next_step(&self.state, now) {
                Step::Skip { index } => self.record(BatchEvent::Skipped { index }),
                Step::Suspend { index, until } => {
                    self.record(BatchEvent::Suspended { index, until });
                    let wake = BatchInput::Wake {
                        batch_id: self.batch_id,
                        index,
                    };
                    return Decision::from_events(self.events).with_wakeup_at(until, wake);
                }
                Step::Deliver { index } => {
                    self.record(BatchEvent::Dispatched { index });
                    let effect = self.state.effects[index].clone();
                    return Decision::from_events(self.events).with_step(BatchStep::Deliver {
                        batch_id: self.batch_id,
                        index,
                        effect,
                    });
                }
                Step::Finish => {
                    self.record(BatchEvent::Completed);
                    let decision = Decision::from_events(self.events);
                    return match self.state.execution_id {
                        Some(execution_id) => decision.with_step(BatchStep::RecordOutcome {
                            batch_id: self.batch_id,
                            execution_id,
                            status: ExecutionStatus::Completed,
                            error_message: None,
                        }),
                        None => decision,
                    };
                }
            }
        }
    }
}
