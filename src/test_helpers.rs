use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::dispatch::SubworkerRequest;
use crate::error::{Error, Result};
use crate::findings::{Confidence, Finding, Severity};
use crate::reasoner::Reasoner;
use crate::tools::{ToolOutput, ToolRunner};

/// Create a `Finding` with sensible defaults for tests.
pub fn make_finding(id: &str, title: &str, severity: Severity) -> Finding {
    Finding {
        id: id.to_string(),
        title: title.to_string(),
        severity,
        confidence: Confidence::High,
        owner: "reviewer".to_string(),
        evidence: format!("{id} evidence"),
        risk: format!("{id} risk"),
        recommendation: format!("{id} recommendation"),
    }
}

pub fn make_request(todo_id: &str) -> SubworkerRequest {
    SubworkerRequest {
        todo_id: todo_id.to_string(),
        title: format!("{todo_id} title"),
        scope: "src/".to_string(),
        risk_category: "general".to_string(),
        acceptance_criteria: vec![],
    }
}

/// Replays canned replies in order; errors once the script runs out.
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reasoner for ScriptedReasoner {
    async fn call(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Reasoner("script exhausted".to_string())))
    }
}

/// Records every command and answers with a fixed output.
#[derive(Default)]
pub struct RecordingTools {
    pub commands: Mutex<Vec<(String, Vec<String>)>>,
}

impl ToolRunner for RecordingTools {
    async fn run(&self, command: &str, args: &[String], _timeout: Duration) -> Result<ToolOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec()));
        Ok(ToolOutput {
            stdout: format!("ran {command}"),
            exit_code: 0,
        })
    }
}
