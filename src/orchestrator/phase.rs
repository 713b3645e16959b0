//! Loop state machine.
//!
//! | phase          | signal             | next                                   |
//! |----------------|--------------------|----------------------------------------|
//! | Thinking       | FinalAnswer        | Done                                   |
//! | Thinking       | ToolCallsRequested | ExecutingTools                         |
//! | Thinking       | ProviderFailed     | Aborted(Provider)                      |
//! | ExecutingTools | ToolsCompleted     | Thinking, or Aborted(StepBudgetExceeded) once `steps >= max_steps` |
//! | Done / Aborted | any                | unchanged                              |
//!
//! Any other pairing leaves the phase unchanged.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    StepBudgetExceeded,
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopPhase {
    Thinking,
    ExecutingTools,
    Done,
    Aborted(AbortReason),
}

impl LoopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::Done | LoopPhase::Aborted(_))
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Thinking => f.write_str("thinking"),
            LoopPhase::ExecutingTools => f.write_str("executing_tools"),
            LoopPhase::Done => f.write_str("done"),
            LoopPhase::Aborted(AbortReason::StepBudgetExceeded) => {
                f.write_str("aborted:step_budget_exceeded")
            }
            LoopPhase::Aborted(AbortReason::Provider(_)) => f.write_str("aborted:provider"),
        }
    }
}

/// What just happened in the current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSignal {
    FinalAnswer,
    ToolCallsRequested,
    ToolsCompleted,
    ProviderFailed(String),
}

/// `steps` counts model turns started so far, including the current one.
pub fn next_phase(phase: &LoopPhase, signal: LoopSignal, steps: usize, max_steps: usize) -> LoopPhase {
    match (phase, signal) {
        (LoopPhase::Thinking, LoopSignal::FinalAnswer) => LoopPhase::Done,
        (LoopPhase::Thinking, LoopSignal::ToolCallsRequested) => LoopPhase::ExecutingTools,
        (LoopPhase::Thinking, LoopSignal::ProviderFailed(e)) => {
            LoopPhase::Aborted(AbortReason::Provider(e))
        }
        (LoopPhase::ExecutingTools, LoopSignal::ToolsCompleted) => {
            if steps >= max_steps {
                LoopPhase::Aborted(AbortReason::StepBudgetExceeded)
            } else {
                LoopPhase::Thinking
            }
        }
        (other, _) => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use LoopPhase::*;
        assert_eq!(next_phase(&Thinking, LoopSignal::FinalAnswer, 1, 5), Done);
        assert_eq!(next_phase(&Thinking, LoopSignal::ToolCallsRequested, 1, 5), ExecutingTools);
        assert_eq!(
            next_phase(&Thinking, LoopSignal::ProviderFailed("x".into()), 1, 5),
            Aborted(AbortReason::Provider("x".into()))
        );
        assert_eq!(next_phase(&ExecutingTools, LoopSignal::ToolsCompleted, 4, 5), Thinking);
        assert_eq!(
            next_phase(&ExecutingTools, LoopSignal::ToolsCompleted, 5, 5),
            Aborted(AbortReason::StepBudgetExceeded)
        );
    }

    #[test]
    fn terminal_phases_absorb_signals() {
        for phase in [LoopPhase::Done, LoopPhase::Aborted(AbortReason::StepBudgetExceeded)] {
            for signal in [
                LoopSignal::FinalAnswer,
                LoopSignal::ToolCallsRequested,
                LoopSignal::ToolsCompleted,
                LoopSignal::ProviderFailed("e".into()),
            ] {
                assert_eq!(next_phase(&phase, signal, 1, 5), phase);
            }
        }
    }

    #[test]
    fn driving_with_tool_calls_always_stops_at_budget() {
        let max = 5;
        let mut phase = LoopPhase::Thinking;
        let mut steps = 0;
        while !phase.is_terminal() {
            if phase == LoopPhase::Thinking {
                steps += 1;
                phase = next_phase(&phase, LoopSignal::ToolCallsRequested, steps, max);
            } else {
                phase = next_phase(&phase, LoopSignal::ToolsCompleted, steps, max);
            }
        }
        assert_eq!(steps, max);
        assert_eq!(phase, LoopPhase::Aborted(AbortReason::StepBudgetExceeded));
    }
}
