#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use revloop::engine::{EngineSettings, ReviewEngine};
use revloop::error::Result;
use revloop::executor::{ExecutorSettings, PhaseExecutor};
use revloop::prompts::PromptEngine;
use revloop::reasoner::{Reasoner, ReasonerGateway};
use revloop::retry::{RetryCoordinator, RetryPolicy};
use revloop::session::InMemorySessionProvider;
use revloop::tools::{ToolOutput, ToolRunner};

/// What the mock reasoner could tell about a call from its prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub subworker: bool,
    pub phase: String,
    pub todo_id: Option<String>,
}

pub type Responder = Box<dyn Fn(&Call) -> Result<String> + Send + Sync>;

/// Answers each call based on the machine, phase and todo it is for, so
/// replies stay deterministic when sub-workers run in parallel.
pub struct RoutedReasoner {
    responder: Responder,
    calls: Mutex<Vec<Call>>,
}

impl RoutedReasoner {
    pub fn new(responder: impl Fn(&Call) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Reasoner for RoutedReasoner {
    async fn call(&self, system: &str, user: &str) -> Result<String> {
        let call = Call {
            subworker: system.contains("# Focused Review"),
            phase: expected_phase(system),
            todo_id: serde_json::from_str::<Value>(user)
                .ok()
                .and_then(|v| v["todo"]["todo_id"].as_str().map(str::to_string)),
        };
        self.calls.lock().unwrap().push(call.clone());
        tokio::task::yield_now().await;
        (self.responder)(&call)
    }
}

fn expected_phase(system: &str) -> String {
    let marker = "`phase` must be \"";
    system
        .find(marker)
        .map(|start| {
            let rest = &system[start + marker.len()..];
            rest[..rest.find('"').unwrap_or(0)].to_string()
        })
        .unwrap_or_default()
}

#[derive(Default)]
pub struct EchoTools {
    pub runs: AtomicUsize,
}

impl ToolRunner for EchoTools {
    async fn run(&self, command: &str, args: &[String], _timeout: Duration) -> Result<ToolOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput {
            stdout: format!("{command} {}", args.join(" ")),
            exit_code: 0,
        })
    }
}

pub struct EngineOptions {
    pub max_retries: u32,
    pub max_iterations: u32,
    pub max_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 1,
            max_iterations: 10,
            max_concurrency: 2,
        }
    }
}

pub type TestEngine = ReviewEngine<RoutedReasoner, EchoTools, InMemorySessionProvider>;

pub fn build_engine(
    reasoner: RoutedReasoner,
    options: EngineOptions,
) -> (TestEngine, Arc<InMemorySessionProvider>) {
    let sessions = Arc::new(InMemorySessionProvider::new());
    let executor = PhaseExecutor::new(
        ReasonerGateway::new(reasoner, Duration::from_secs(5)),
        EchoTools::default(),
        PromptEngine::new(None),
        ExecutorSettings {
            max_iterations: options.max_iterations,
            tool_timeout: Duration::from_secs(5),
            allowed_tools: vec!["git".to_string()],
        },
    );
    let retry = RetryCoordinator::new(RetryPolicy {
        max_retries: options.max_retries,
        initial_backoff: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(5),
    });
    let engine = ReviewEngine::new(
        executor,
        retry,
        Arc::clone(&sessions),
        EngineSettings {
            max_iterations: options.max_iterations,
            max_concurrency: options.max_concurrency,
            subworker_timeout: Duration::from_secs(10),
        },
    );
    (engine, sessions)
}

pub fn output(phase: &str, data: Value, next: &str) -> Result<String> {
    Ok(serde_json::json!({
        "phase": phase,
        "data": data,
        "next_phase_request": next,
    })
    .to_string())
}

pub fn finding(id: &str, title: &str, severity: &str) -> Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "severity": severity,
        "confidence": "high",
        "owner": "reviewer",
        "evidence": format!("{id} evidence"),
        "risk": format!("{id} risk"),
        "recommendation": format!("{id} recommendation"),
    })
}

pub fn todo(id: &str) -> Value {
    serde_json::json!({
        "id": id,
        "title": format!("review {id}"),
        "scope": "src/",
        "risk_category": "correctness",
        "priority": 1,
        "acceptance_criteria": [format!("{id} verified")],
    })
}
