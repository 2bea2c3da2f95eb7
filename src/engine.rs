//! Top-level review loop.
//!
//! Drives the review machine phase by phase, fans `act` out to sub-workers,
//! and folds everything into a [`ReviewReport`]. A run always produces a
//! report; failures end in a stop phase with a reason instead of an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Map;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::aggregate::{MergeDecision, MergeGate, OverallSeverity, aggregate};
use crate::change::ChangeRequest;
use crate::dispatch::{SubworkerRequest, SubworkerResult, dispatch};
use crate::error::Error;
use crate::executor::{MachineInput, PhaseExecutor};
use crate::findings::{Finding, findings_from_data, todos_from_data};
use crate::machine::Machine;
use crate::phase::{MachineRole, Phase};
use crate::reasoner::Reasoner;
use crate::retry::RetryCoordinator;
use crate::runlog::RunLog;
use crate::schema::{PhaseOutput, PhaseSchemaRegistry};
use crate::session::SessionProvider;
use crate::subworker::PhaseSubworker;
use crate::tools::ToolRunner;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_iterations: u32,
    pub max_concurrency: usize,
    pub subworker_timeout: Duration,
}

/// Everything a run produced, including partial results of a stopped run.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewReport {
    pub final_phase: Phase,
    pub stop_reason: Option<String>,
    pub iteration_count: u32,
    pub severity: OverallSeverity,
    pub gate: MergeGate,
    pub findings: Vec<Finding>,
    pub subworker_results: Vec<SubworkerResult>,
    pub run_log: RunLog,
}

impl ReviewReport {
    /// 0 approve, 2 needs changes, 3 block, 1 for any stopped run.
    pub fn exit_code(&self) -> i32 {
        if self.final_phase != Phase::Done {
            return 1;
        }
        match self.gate.decision {
            MergeDecision::Approve => 0,
            MergeDecision::NeedsChanges => 2,
            MergeDecision::Block => 3,
        }
    }
}

pub struct ReviewEngine<R, T, S> {
    executor: Arc<PhaseExecutor<R, T>>,
    retry: RetryCoordinator,
    sessions: Arc<S>,
    settings: EngineSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<R, T, S> ReviewEngine<R, T, S>
where
    R: Reasoner + 'static,
    T: ToolRunner + 'static,
    S: SessionProvider + 'static,
{
    pub fn new(
        executor: PhaseExecutor<R, T>,
        retry: RetryCoordinator,
        sessions: Arc<S>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            executor: Arc::new(executor),
            retry,
            sessions,
            settings,
            shutdown: None,
        }
    }

    /// Stop with `stopped_human` at the next phase boundary once `true` is sent.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn executor(&self) -> &PhaseExecutor<R, T> {
        &self.executor
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub async fn run(&self, change: ChangeRequest) -> ReviewReport {
        let mut machine = Machine::new(MachineRole::Review, "review");
        let mut subworker_results = Vec::new();

        if let Err(e) = change.validate() {
            machine.fail_with(Phase::Intake, e, 0);
            return build_report(machine, subworker_results);
        }

        info!(title = %change.title, diff_bytes = change.diff.len(), "review started");
        let change = Arc::new(change);
        let worker = Arc::new(PhaseSubworker::new(
            Arc::clone(&self.executor),
            self.retry,
            Arc::clone(&self.sessions),
            Arc::clone(&change),
            self.settings.max_iterations,
        ));
        let input = MachineInput::review(&change);

        while !machine.state().is_finished() {
            if self.shutdown_requested() {
                machine.stop(Phase::StoppedHuman, "interrupted by operator");
                break;
            }
            if machine.enforce_budget(self.settings.max_iterations) {
                break;
            }
            match machine.state().current_phase() {
                Phase::Act => {
                    let results = self.delegate(&mut machine, &worker).await;
                    subworker_results.extend(results);
                }
                _ => {
                    machine
                        .step(&*self.executor, &self.retry, &*self.sessions, &input)
                        .await;
                }
            }
        }

        let report = build_report(machine, subworker_results);
        info!(
            final_phase = %report.final_phase,
            iterations = report.iteration_count,
            severity = %report.severity,
            decision = %report.gate.decision,
            "review finished"
        );
        report
    }

    /// The review machine's `act`: run every todo of the latest plan through a
    /// sub-worker and commit their results as the phase output.
    async fn delegate(
        &self,
        machine: &mut Machine,
        worker: &Arc<PhaseSubworker<R, T, S>>,
    ) -> Vec<SubworkerResult> {
        let started = Instant::now();
        let todos = match machine.context().latest(Phase::Plan) {
            Some(plan) => todos_from_data(&plan.data),
            None => Err(Error::MissingContext {
                phase: Phase::Act,
                missing: Phase::Plan,
            }),
        };
        let todos = match todos {
            Ok(todos) => todos,
            Err(e) => {
                machine.fail_with(Phase::Act, e, 0);
                return Vec::new();
            }
        };

        let requests: Vec<SubworkerRequest> = todos.iter().map(SubworkerRequest::from).collect();
        info!(
            todos = requests.len(),
            max_concurrency = self.settings.max_concurrency,
            "delegating"
        );
        let results = dispatch(
            Arc::clone(worker),
            requests,
            self.settings.max_concurrency,
            self.settings.subworker_timeout,
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut data = Map::new();
        match serde_json::to_value(&results) {
            Ok(value) => {
                data.insert("subworker_results".to_string(), value);
            }
            Err(e) => {
                machine.fail_with(Phase::Act, e.into(), elapsed_ms);
                return results;
            }
        }
        let output = PhaseOutput::new(Phase::Act, data, Phase::Synthesize);
        if let Err(e) = PhaseSchemaRegistry::validate(MachineRole::Review, &output) {
            machine.fail_with(Phase::Act, e, elapsed_ms);
            return results;
        }
        machine.commit(output, 1, elapsed_ms);
        results
    }
}

fn build_report(machine: Machine, subworker_results: Vec<SubworkerResult>) -> ReviewReport {
    let (state, context, run_log) = machine.into_parts();
    let own_findings = match context.latest(Phase::Synthesize) {
        Some(output) => findings_from_data(Phase::Synthesize, &output.data).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable synthesize findings");
            Vec::new()
        }),
        None => Vec::new(),
    };
    let aggregation = aggregate(&own_findings, &subworker_results);

    ReviewReport {
        final_phase: state.current_phase(),
        stop_reason: state.stop_reason().map(str::to_string),
        iteration_count: state.iteration_count(),
        severity: aggregation.severity,
        gate: aggregation.gate,
        findings: aggregation.findings,
        subworker_results,
        run_log,
    }
}
