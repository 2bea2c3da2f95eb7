use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step of a review state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intake,
    Plan,
    Act,
    Synthesize,
    Evaluate,
    Done,
    StoppedBudget,
    StoppedHuman,
    StoppedRetryExhausted,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Intake,
        Phase::Plan,
        Phase::Act,
        Phase::Synthesize,
        Phase::Evaluate,
        Phase::Done,
        Phase::StoppedBudget,
        Phase::StoppedHuman,
        Phase::StoppedRetryExhausted,
    ];

    pub const STOPS: [Phase; 3] = [
        Phase::StoppedBudget,
        Phase::StoppedHuman,
        Phase::StoppedRetryExhausted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::Plan => "plan",
            Phase::Act => "act",
            Phase::Synthesize => "synthesize",
            Phase::Evaluate => "evaluate",
            Phase::Done => "done",
            Phase::StoppedBudget => "stopped_budget",
            Phase::StoppedHuman => "stopped_human",
            Phase::StoppedRetryExhausted => "stopped_retry_exhausted",
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            Phase::StoppedBudget | Phase::StoppedHuman | Phase::StoppedRetryExhausted
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == Phase::Done || self.is_stop()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                if s.is_empty() {
                    "empty phase name".to_string()
                } else {
                    format!("unknown phase: {s}")
                }
            })
    }
}

/// Which machine a phase belongs to. The review machine delegates in `act`;
/// sub-workers run tools there instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineRole {
    Review,
    Subworker,
}

impl fmt::Display for MachineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineRole::Review => write!(f, "review"),
            MachineRole::Subworker => write!(f, "subworker"),
        }
    }
}

/// How a phase is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseHandler {
    Reasoning,
    Tools,
    Delegation,
    Terminal,
}

impl MachineRole {
    pub fn handler(&self, phase: Phase) -> PhaseHandler {
        match (self, phase) {
            (_, Phase::Intake | Phase::Plan | Phase::Synthesize) => PhaseHandler::Reasoning,
            (MachineRole::Review, Phase::Act) => PhaseHandler::Delegation,
            (MachineRole::Subworker, Phase::Act) => PhaseHandler::Tools,
            (MachineRole::Review, Phase::Evaluate) => PhaseHandler::Reasoning,
            // Sub-workers have no evaluate edge; reaching it is rejected by the map.
            (MachineRole::Subworker, Phase::Evaluate) => PhaseHandler::Terminal,
            (
                _,
                Phase::Done
                | Phase::StoppedBudget
                | Phase::StoppedHuman
                | Phase::StoppedRetryExhausted,
            ) => PhaseHandler::Terminal,
        }
    }

    /// Phases reachable from `from` in one ordinary step. Stop phases are
    /// handled separately by the validator.
    pub fn successors(&self, from: Phase) -> &'static [Phase] {
        match self {
            MachineRole::Review => match from {
                Phase::Intake => &[Phase::Plan],
                Phase::Plan => &[Phase::Act, Phase::Synthesize],
                Phase::Act => &[Phase::Synthesize],
                Phase::Synthesize => &[Phase::Evaluate],
                Phase::Evaluate => &[Phase::Plan, Phase::Done],
                Phase::Done
                | Phase::StoppedBudget
                | Phase::StoppedHuman
                | Phase::StoppedRetryExhausted => &[],
            },
            MachineRole::Subworker => match from {
                Phase::Intake => &[Phase::Plan],
                Phase::Plan => &[Phase::Act, Phase::Synthesize],
                Phase::Act => &[Phase::Synthesize],
                Phase::Synthesize => &[Phase::Done],
                Phase::Evaluate
                | Phase::Done
                | Phase::StoppedBudget
                | Phase::StoppedHuman
                | Phase::StoppedRetryExhausted => &[],
            },
        }
    }

    /// Prior phase whose output `phase` builds on.
    pub fn required_context(&self, phase: Phase) -> Option<Phase> {
        match (self, phase) {
            (_, Phase::Plan) => Some(Phase::Intake),
            (_, Phase::Act) => Some(Phase::Plan),
            (_, Phase::Synthesize) => Some(Phase::Plan),
            (MachineRole::Review, Phase::Evaluate) => Some(Phase::Synthesize),
            _ => None,
        }
    }
}
