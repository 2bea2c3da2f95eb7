use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::phase::Phase;

/// Finding severity. Ordered so that `Blocking` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
    Blocking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
            Severity::Blocking => write!(f, "blocking"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub owner: String,
    pub evidence: String,
    pub risk: String,
    pub recommendation: String,
}

/// A unit of delegable work produced by the `plan` phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub scope: String,
    #[serde(default = "default_risk_category")]
    pub risk_category: String,
    pub priority: u8,
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub evidence_required: Vec<String>,
}

fn default_risk_category() -> String {
    "general".to_string()
}

/// Read `data.findings` from a phase output. Absent means none.
pub fn findings_from_data(
    phase: Phase,
    data: &serde_json::Map<String, Value>,
) -> Result<Vec<Finding>> {
    match data.get("findings") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| Error::Schema {
            phase,
            message: format!("invalid findings: {e}"),
        }),
    }
}

/// Read `data.todos` from a plan output, rejecting empty or duplicate ids.
pub fn todos_from_data(data: &serde_json::Map<String, Value>) -> Result<Vec<Todo>> {
    let value = data.get("todos").cloned().unwrap_or(Value::Array(Vec::new()));
    let todos: Vec<Todo> = serde_json::from_value(value).map_err(|e| Error::Schema {
        phase: Phase::Plan,
        message: format!("invalid todos: {e}"),
    })?;

    let mut seen = HashSet::new();
    for todo in &todos {
        if todo.id.trim().is_empty() {
            return Err(Error::Schema {
                phase: Phase::Plan,
                message: "todo id must not be empty".to_string(),
            });
        }
        if !seen.insert(todo.id.as_str()) {
            return Err(Error::Schema {
                phase: Phase::Plan,
                message: format!("duplicate todo id: {}", todo.id),
            });
        }
    }
    Ok(todos)
}
