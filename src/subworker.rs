use std::sync::Arc;

use tracing::info;

use crate::change::ChangeRequest;
use crate::dispatch::{Subworker, SubworkerRequest};
use crate::error::{Error, Result};
use crate::executor::{MachineInput, PhaseExecutor};
use crate::findings::{Finding, findings_from_data};
use crate::machine::Machine;
use crate::phase::{MachineRole, Phase};
use crate::reasoner::Reasoner;
use crate::retry::RetryCoordinator;
use crate::session::SessionProvider;
use crate::tools::ToolRunner;

/// Reviews one todo with its own intake/plan/act/synthesize machine.
pub struct PhaseSubworker<R, T, S> {
    executor: Arc<PhaseExecutor<R, T>>,
    retry: RetryCoordinator,
    sessions: Arc<S>,
    change: Arc<ChangeRequest>,
    max_iterations: u32,
}

impl<R, T, S> PhaseSubworker<R, T, S> {
    pub fn new(
        executor: Arc<PhaseExecutor<R, T>>,
        retry: RetryCoordinator,
        sessions: Arc<S>,
        change: Arc<ChangeRequest>,
        max_iterations: u32,
    ) -> Self {
        Self {
            executor,
            retry,
            sessions,
            change,
            max_iterations,
        }
    }
}

impl<R, T, S> Subworker for PhaseSubworker<R, T, S>
where
    R: Reasoner + 'static,
    T: ToolRunner + 'static,
    S: SessionProvider + 'static,
{
    async fn run(&self, request: SubworkerRequest) -> Result<Vec<Finding>> {
        let mut machine = Machine::new(MachineRole::Subworker, format!("todo:{}", request.todo_id));
        let input = MachineInput::subworker(&self.change, &request);

        while !machine.state().is_finished() {
            if machine.enforce_budget(self.max_iterations) {
                break;
            }
            machine
                .step(&*self.executor, &self.retry, &*self.sessions, &input)
                .await;
        }

        let state = machine.state();
        if state.current_phase() != Phase::Done {
            return Err(Error::Subworker(format!(
                "{}: {}",
                state.current_phase(),
                state.stop_reason().unwrap_or("no reason recorded")
            )));
        }

        let findings = match machine.context().latest(Phase::Synthesize) {
            Some(output) => findings_from_data(Phase::Synthesize, &output.data)?,
            None => Vec::new(),
        };
        info!(
            todo_id = %request.todo_id,
            iterations = state.iteration_count(),
            findings = findings.len(),
            "sub-worker machine finished"
        );
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::executor::ExecutorSettings;
    use crate::prompts::PromptEngine;
    use crate::reasoner::ReasonerGateway;
    use crate::retry::RetryPolicy;
    use crate::session::InMemorySessionProvider;
    use crate::test_helpers::{RecordingTools, ScriptedReasoner, make_request};

    fn worker(
        replies: Vec<Result<String>>,
        max_iterations: u32,
    ) -> PhaseSubworker<ScriptedReasoner, RecordingTools, InMemorySessionProvider> {
        let executor = PhaseExecutor::new(
            ReasonerGateway::new(ScriptedReasoner::new(replies), Duration::from_secs(5)),
            RecordingTools::default(),
            PromptEngine::new(None),
            ExecutorSettings {
                max_iterations,
                tool_timeout: Duration::from_secs(5),
                allowed_tools: vec!["git".to_string()],
            },
        );
        PhaseSubworker::new(
            Arc::new(executor),
            RetryCoordinator::new(RetryPolicy {
                max_retries: 0,
                initial_backoff: Duration::from_millis(1),
                attempt_timeout: Duration::from_secs(5),
            }),
            Arc::new(InMemorySessionProvider::new()),
            Arc::new(ChangeRequest::new("t", "", "+x")),
            max_iterations,
        )
    }

    fn script() -> Vec<Result<String>> {
        vec![
            Ok(json!({
                "phase": "intake",
                "data": {"summary": "check locking"},
                "next_phase_request": "plan"
            })
            .to_string()),
            Ok(json!({
                "phase": "plan",
                "data": {"commands": [{"command": "git", "args": ["diff"]}]},
                "next_phase_request": "act"
            })
            .to_string()),
            Ok(json!({
                "phase": "synthesize",
                "data": {"findings": [{
                    "id": "f1",
                    "title": "Lock held across await",
                    "severity": "critical",
                    "confidence": "medium",
                    "owner": "core",
                    "evidence": "cache.rs:10",
                    "risk": "deadlock",
                    "recommendation": "drop guard first"
                }]},
                "next_phase_request": "done"
            })
            .to_string()),
        ]
    }

    #[tokio::test]
    async fn test_full_subworker_run() {
        let worker = worker(script(), 10);
        let findings = worker.run(make_request("t1")).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "Lock held across await");
        let commands = worker.executor.tools().commands.lock().unwrap().clone();
        assert_eq!(commands, vec![("git".to_string(), vec!["diff".to_string()])]);
        assert_eq!(worker.sessions.live_count(), 0);
    }

    #[tokio::test]
    async fn test_budget_stop_is_an_error() {
        let worker = worker(script(), 2);
        let err = worker.run(make_request("t1")).await.unwrap_err();
        assert!(err.to_string().contains("stopped_budget"));
    }

    #[tokio::test]
    async fn test_structural_failure_is_an_error() {
        let worker = worker(vec![Ok("no json here".to_string())], 10);
        let err = worker.run(make_request("t1")).await.unwrap_err();
        assert!(matches!(err, Error::Subworker(_)));
        assert!(err.to_string().contains("stopped_human: intake: malformed output"));
    }
}
