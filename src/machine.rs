//! State shared by the review machine and sub-worker machines, and the single
//! phase step both of them drive.

use std::time::Instant;

use tracing::{info, warn};

use crate::context::PhaseContext;
use crate::error::Error;
use crate::executor::{MachineInput, PhaseExecutor};
use crate::phase::{MachineRole, Phase};
use crate::reasoner::Reasoner;
use crate::retry::{Attempted, PhaseFailure, RetryCoordinator};
use crate::runlog::{RunLog, ThinkingFrame};
use crate::schema::PhaseOutput;
use crate::session::{SessionProvider, with_session};
use crate::tools::ToolRunner;
use crate::transition::{RunState, TransitionValidator};

/// One machine instance: its state, accumulated context and audit log.
#[derive(Debug)]
pub struct Machine {
    validator: TransitionValidator,
    state: RunState,
    context: PhaseContext,
    log: RunLog,
    scope: String,
}

impl Machine {
    /// `scope` prefixes session ids, e.g. `review` or `todo:t1`.
    pub fn new(role: MachineRole, scope: impl Into<String>) -> Self {
        Self {
            validator: TransitionValidator::new(role),
            state: RunState::new(),
            context: PhaseContext::new(),
            log: RunLog::new(),
            scope: scope.into(),
        }
    }

    pub fn role(&self) -> MachineRole {
        self.validator.role()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn context(&self) -> &PhaseContext {
        &self.context
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn into_parts(self) -> (RunState, PhaseContext, RunLog) {
        (self.state, self.context, self.log)
    }

    /// Stop with `stopped_budget` once `max_iterations` transitions have been
    /// taken. Returns whether the machine stopped.
    pub fn enforce_budget(&mut self, max_iterations: u32) -> bool {
        if self.state.is_finished() {
            return false;
        }
        let used = self.state.iteration_count();
        if used < max_iterations {
            return false;
        }
        let err = Error::BudgetExceeded {
            used,
            limit: max_iterations,
        };
        self.stop(Phase::StoppedBudget, err.to_string());
        true
    }

    /// Force a stop from outside the phase loop.
    pub fn stop(&mut self, stop: Phase, reason: impl Into<String>) {
        let reason = reason.into();
        let from = self.state.current_phase();
        match self.validator.stop(&mut self.state, stop, reason.clone()) {
            Ok(_) => {
                info!(
                    role = %self.role(),
                    from = %from,
                    to = %stop,
                    reason = %reason,
                    "machine stopped"
                );
                self.log.push(ThinkingFrame::bare(from, format!("{stop}: {reason}")));
            }
            Err(e) => warn!(role = %self.role(), error = %e, "ignoring stop of finished machine"),
        }
    }

    /// Run the current phase through the executor inside a scoped session,
    /// with retry, then record the frame and take the requested transition.
    pub async fn step<R, T, S>(
        &mut self,
        executor: &PhaseExecutor<R, T>,
        retry: &RetryCoordinator,
        sessions: &S,
        input: &MachineInput<'_>,
    ) -> Phase
    where
        R: Reasoner,
        T: ToolRunner,
        S: SessionProvider + ?Sized,
    {
        let phase = self.state.current_phase();
        let role = self.role();
        let scope_id = format!("{}/{phase}", self.scope);
        let started = Instant::now();
        info!(%role, phase = %phase, iteration = self.state.iteration_count(), "phase started");

        let state = &self.state;
        let context = &self.context;
        let outcome = retry
            .execute_with_retry(phase, |_attempt| {
                with_session(sessions, &scope_id, move |_session| {
                    executor.run(role, state, context, input)
                })
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Attempted { value, attempts }) => self.commit(value, attempts, elapsed_ms),
            Err(failure) => self.fail(phase, failure, elapsed_ms),
        }
    }

    /// Record a phase output and take the transition it requests. An illegal
    /// request ends the machine like any other structural failure.
    pub fn commit(&mut self, output: PhaseOutput, attempts: u32, elapsed_ms: u64) -> Phase {
        let phase = output.phase;
        let requested = output.next_phase_request;
        match self.validator.request(&mut self.state, requested) {
            Ok(next) => {
                self.log.push(
                    ThinkingFrame::from_output_data(phase, &output.data, format!("next: {next}"))
                        .with_timing(attempts, elapsed_ms),
                );
                self.context.append(output);
                info!(
                    role = %self.role(),
                    from = %phase,
                    to = %next,
                    attempts,
                    elapsed_ms,
                    "phase complete"
                );
                next
            }
            Err(e) => self.fail(
                phase,
                PhaseFailure::Structural { error: e, attempts },
                elapsed_ms,
            ),
        }
    }

    /// End the machine because work done outside the executor failed.
    pub fn fail_with(&mut self, phase: Phase, error: Error, elapsed_ms: u64) -> Phase {
        self.fail(
            phase,
            PhaseFailure::Structural { error, attempts: 1 },
            elapsed_ms,
        )
    }

    fn fail(&mut self, phase: Phase, failure: PhaseFailure, elapsed_ms: u64) -> Phase {
        let attempts = failure.attempts();
        let (stop, reason) = match &failure {
            PhaseFailure::Exhausted { .. } => {
                (Phase::StoppedRetryExhausted, failure.to_string())
            }
            PhaseFailure::Structural {
                error: error @ Error::BudgetExceeded { .. },
                ..
            } => (Phase::StoppedBudget, format!("{phase}: {error}")),
            PhaseFailure::Structural { error, .. } => {
                (Phase::StoppedHuman, format!("{phase}: {error}"))
            }
        };
        warn!(role = %self.role(), phase = %phase, to = %stop, reason = %reason, "phase failed");

        self.log.push(
            ThinkingFrame::bare(phase, format!("{stop}: {reason}"))
                .with_timing(attempts, elapsed_ms),
        );
        if let Err(e) = self.validator.stop(&mut self.state, stop, reason) {
            warn!(role = %self.role(), error = %e, "could not record stop");
        }
        self.state.current_phase()
    }
}
