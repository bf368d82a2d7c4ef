use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub const DEFAULT_MAX_STEPS: usize = 5;
pub const DEFAULT_NEED_MORE_DATA_MARKER: &str = "NEED MORE DATA:";

/// Identical consecutive steps tolerated before the loop gives up
const NO_PROGRESS_LIMIT: u32 = 2;

/// Why the loop stopped. Exactly one is recorded per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TerminationReason {
    NoToolCalls,
    NoProgress,
    SynthesisComplete,
    StepBudgetExhausted,
    SelfReasoningComplete,
    ModelError,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(TerminationReason),
}

/// What the loop observed about the model's answer in one step
#[derive(Debug, Clone, Copy)]
pub struct StepObservation<'a> {
    /// 1-based
    pub step: usize,
    pub text: Option<&'a str>,
    pub call_count: usize,
    /// The step's combined call signature equals the previous step's
    pub repeated: bool,
}

/// Decides when the loop stops, given what each step looked like.
///
/// Checks run in a fixed order: no tool calls, repeated calls, the synthesis
/// grace step, then the step budget. The budget is checked once the step's
/// calls have run.
///
/// `no_progress` is the length of the current run of identical steps; a fresh
/// step resets it to 1 and the loop stops when a run reaches two.
///
/// The synthesis heuristic grants one further model query after a step whose
/// text lacks the need-more-data marker. When that query again lacks the
/// marker the loop stops before its tool calls run; the formatter then works
/// from what has been gathered so far.
#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    max_steps: usize,
    marker: String,
    no_progress: u32,
    synthesis_granted: bool,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS, DEFAULT_NEED_MORE_DATA_MARKER)
    }
}

impl TerminationPolicy {
    pub fn new<S: Into<String>>(max_steps: usize, marker: S) -> Self {
        Self {
            max_steps: max_steps.max(1),
            marker: marker.into(),
            no_progress: 0,
            synthesis_granted: false,
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Evaluated after extraction, before any call of the step runs
    pub fn before_execution(&mut self, observation: StepObservation<'_>) -> Decision {
        if observation.call_count == 0 {
            return Decision::Stop(TerminationReason::NoToolCalls);
        }

        if observation.repeated {
            // a repeat of a history turn continues the run that turn started
            self.no_progress = self.no_progress.max(1) + 1;
            if self.no_progress >= NO_PROGRESS_LIMIT {
                return Decision::Stop(TerminationReason::NoProgress);
            }
        } else {
            self.no_progress = 1;
        }

        if observation.step > 1 {
            let wants_more = observation
                .text
                .is_some_and(|text| text.contains(self.marker.as_str()));
            if wants_more {
                self.synthesis_granted = false;
            } else if self.synthesis_granted {
                return Decision::Stop(TerminationReason::SynthesisComplete);
            } else {
                self.synthesis_granted = true;
            }
        }

        Decision::Continue
    }

    /// The self-reasoning tool's own verdict overrides the synthesis grace for this step
    pub fn self_reasoning(&mut self, should_continue: bool) -> Decision {
        if should_continue {
            self.synthesis_granted = false;
            Decision::Continue
        } else {
            Decision::Stop(TerminationReason::SelfReasoningComplete)
        }
    }

    /// Evaluated once the step's calls have run
    pub fn after_execution(&self, step: usize) -> Decision {
        if step >= self.max_steps {
            Decision::Stop(TerminationReason::StepBudgetExhausted)
        } else {
            Decision::Continue
        }
    }
}
