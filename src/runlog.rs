//! Append-only audit trail of per-phase "thinking frames".

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::phase::Phase;

/// Structured record of one phase execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThinkingFrame {
    pub state: Phase,
    pub goals: Vec<String>,
    pub checks: Vec<String>,
    pub risks: Vec<String>,
    pub steps: Vec<String>,
    pub decision: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl ThinkingFrame {
    /// Frame with empty notes; `decision` says what happened.
    pub fn bare(state: Phase, decision: impl Into<String>) -> Self {
        Self {
            state,
            goals: Vec::new(),
            checks: Vec::new(),
            risks: Vec::new(),
            steps: Vec::new(),
            decision: decision.into(),
            attempts: 0,
            elapsed_ms: 0,
        }
    }

    /// Build a frame from the optional `data.thinking` object of a phase output.
    /// Non-string list entries are skipped.
    pub fn from_output_data(
        state: Phase,
        data: &Map<String, Value>,
        decision: impl Into<String>,
    ) -> Self {
        let mut frame = Self::bare(state, decision);
        if let Some(Value::Object(thinking)) = data.get("thinking") {
            frame.goals = string_list(thinking.get("goals"));
            frame.checks = string_list(thinking.get("checks"));
            frame.risks = string_list(thinking.get("risks"));
            frame.steps = string_list(thinking.get("steps"));
        }
        frame
    }

    pub fn with_timing(mut self, attempts: u32, elapsed_ms: u64) -> Self {
        self.attempts = attempts;
        self.elapsed_ms = elapsed_ms;
        self
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Ordered frames for one run. There is no removal API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RunLog {
    frames: Vec<ThinkingFrame>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ThinkingFrame) {
        self.frames.push(frame);
    }

    pub fn frames(&self) -> &[ThinkingFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the log as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("failed to serialize run log: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
