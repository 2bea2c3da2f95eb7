//! Transition validation for the phase machines.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::phase::{MachineRole, Phase};

/// Mutable state of one machine run. Only [`TransitionValidator`] changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    current_phase: Phase,
    iteration_count: u32,
    stop_reason: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            current_phase: Phase::Intake,
            iteration_count: 0,
            stop_reason: None,
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.current_phase.is_terminal()
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionValidator {
    role: MachineRole,
}

impl TransitionValidator {
    pub fn new(role: MachineRole) -> Self {
        Self { role }
    }

    pub fn role(&self) -> MachineRole {
        self.role
    }

    /// Whether `from -> to` is a legal single step for this role.
    pub fn allows(&self, from: Phase, to: Phase) -> bool {
        if from.is_terminal() {
            return false;
        }
        to.is_stop() || self.role.successors(from).contains(&to)
    }

    /// Validate and apply an ordinary transition requested by a phase output.
    ///
    /// Stop phases are accepted here too, with a generic stop reason; use
    /// [`TransitionValidator::stop`] to record a specific one.
    pub fn request(&self, state: &mut RunState, requested: Phase) -> Result<Phase> {
        if requested.is_stop() {
            return self.stop(
                state,
                requested,
                format!("{} requested {requested}", state.current_phase),
            );
        }
        if !self.allows(state.current_phase, requested) {
            return Err(Error::InvalidTransition {
                from: state.current_phase,
                requested: requested.to_string(),
            });
        }
        debug!(
            role = %self.role,
            from = %state.current_phase,
            to = %requested,
            iteration = state.iteration_count + 1,
            "transition"
        );
        state.current_phase = requested;
        state.iteration_count += 1;
        Ok(requested)
    }

    /// Move to a stop phase and record why. Counts as an iteration like any
    /// accepted transition.
    pub fn stop(
        &self,
        state: &mut RunState,
        stop: Phase,
        reason: impl Into<String>,
    ) -> Result<Phase> {
        if !stop.is_stop() || state.current_phase.is_terminal() {
            return Err(Error::InvalidTransition {
                from: state.current_phase,
                requested: stop.to_string(),
            });
        }
        let reason = reason.into();
        debug!(
            role = %self.role,
            from = %state.current_phase,
            to = %stop,
            reason = %reason,
            "stop"
        );
        state.current_phase = stop;
        state.iteration_count += 1;
        state.stop_reason = Some(reason);
        Ok(stop)
    }
}

/// Parse a raw `next_phase_request` value. Anything but a known phase name is
/// a contract violation.
pub fn parse_phase_request(from: Phase, value: &Value) -> Result<Phase> {
    let invalid = |requested: String| Error::InvalidTransition { from, requested };
    match value {
        Value::String(name) => name.parse::<Phase>().map_err(|_| invalid(name.clone())),
        Value::Null => Err(invalid("null".to_string())),
        other => Err(invalid(other.to_string())),
    }
}
