use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::findings::{findings_from_data, todos_from_data};
use crate::phase::{MachineRole, Phase};
use crate::transition::parse_phase_request;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_-]*[ \t]*\r?\n(.*?)```").unwrap());

/// The parsed result of one phase execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseOutput {
    pub phase: Phase,
    pub data: Map<String, Value>,
    pub next_phase_request: Phase,
}

impl PhaseOutput {
    pub fn new(phase: Phase, data: Map<String, Value>, next_phase_request: Phase) -> Self {
        Self {
            phase,
            data,
            next_phase_request,
        }
    }
}

/// Wire form. Closed: anything besides these three keys is rejected.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPhaseOutput {
    phase: Value,
    data: Map<String, Value>,
    next_phase_request: Value,
}

/// Strip formatting noise from a reasoner reply and parse it as the output of
/// `expected`.
pub fn parse_phase_output(expected: Phase, raw: &str) -> Result<PhaseOutput> {
    let json = extract_json(raw);
    if json.is_empty() {
        return Err(Error::MalformedOutput(format!(
            "{expected}: reply contained no JSON object"
        )));
    }
    let raw: RawPhaseOutput = serde_json::from_str(&json)
        .map_err(|e| Error::MalformedOutput(format!("{expected}: {e}")))?;

    let phase = match &raw.phase {
        Value::String(name) => name.parse::<Phase>().map_err(|e| Error::Schema {
            phase: expected,
            message: e,
        })?,
        other => {
            return Err(Error::Schema {
                phase: expected,
                message: format!("phase must be a string, got {other}"),
            });
        }
    };
    if phase != expected {
        return Err(Error::Schema {
            phase: expected,
            message: format!("output is labelled {phase}"),
        });
    }

    let next_phase_request = parse_phase_request(expected, &raw.next_phase_request)?;
    Ok(PhaseOutput {
        phase,
        data: raw.data,
        next_phase_request,
    })
}

/// Pull the JSON payload out of a reply: a leading code fence, a fenced block
/// anywhere in the text, or the first complete `{...}` value with any prose
/// before or after it dropped.
pub fn extract_json(input: &str) -> String {
    let trimmed = input.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        let Some(pos) = rest.find('\n') else {
            return String::new();
        };
        let after_tag = &rest[pos + 1..];
        if let Some(pos) = after_tag.rfind("```") {
            return after_tag[..pos].trim().to_string();
        }
        return after_tag.trim().to_string();
    }

    if !trimmed.starts_with('{')
        && let Some(caps) = FENCED_BLOCK.captures(trimmed)
    {
        return caps[1].trim().to_string();
    }

    let Some(start) = trimmed.find('{') else {
        return String::new();
    };
    let candidate = &trimmed[start..];
    if let Some(end) = first_value_end(candidate) {
        return candidate[..end].to_string();
    }
    // Not valid JSON: hand the brace span to the strict parser so the error
    // names the actual problem.
    match candidate.rfind('}') {
        Some(end) => candidate[..=end].to_string(),
        None => candidate.to_string(),
    }
}

/// Byte length of the first complete JSON value in `input`, if it parses.
fn first_value_end(input: &str) -> Option<usize> {
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(_))) => Some(stream.byte_offset()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Array,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }
}

/// Expected shape of `data` for one phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseSchema {
    pub required: &'static [(&'static str, FieldKind)],
}

pub struct PhaseSchemaRegistry;

impl PhaseSchemaRegistry {
    pub fn schema(role: MachineRole, phase: Phase) -> PhaseSchema {
        use FieldKind as K;
        let required: &'static [(&'static str, FieldKind)] = match (role, phase) {
            (MachineRole::Review, Phase::Intake) => {
                &[("summary", K::String), ("risk_areas", K::Array)]
            }
            (MachineRole::Subworker, Phase::Intake) => &[("summary", K::String)],
            (MachineRole::Review, Phase::Plan) => &[("todos", K::Array)],
            (MachineRole::Subworker, Phase::Plan) => &[("commands", K::Array)],
            (MachineRole::Review, Phase::Act) => &[("subworker_results", K::Array)],
            (MachineRole::Subworker, Phase::Act) => &[("tool_results", K::Array)],
            (_, Phase::Synthesize) => &[("findings", K::Array)],
            (MachineRole::Review, Phase::Evaluate) => &[("assessment", K::String)],
            (MachineRole::Subworker, Phase::Evaluate)
            | (
                _,
                Phase::Done
                | Phase::StoppedBudget
                | Phase::StoppedHuman
                | Phase::StoppedRetryExhausted,
            ) => &[],
        };
        PhaseSchema { required }
    }

    /// Check `output.data` against the phase schema, including the typed
    /// payloads downstream phases depend on.
    pub fn validate(role: MachineRole, output: &PhaseOutput) -> Result<()> {
        let phase = output.phase;
        let schema = Self::schema(role, phase);
        for (key, kind) in schema.required {
            match output.data.get(*key) {
                Some(value) if kind.matches(value) => {}
                Some(_) => {
                    return Err(Error::Schema {
                        phase,
                        message: format!("data.{key} must be a {}", kind.name()),
                    });
                }
                None => {
                    return Err(Error::Schema {
                        phase,
                        message: format!("missing data.{key}"),
                    });
                }
            }
        }

        if let Some(thinking) = output.data.get("thinking")
            && !thinking.is_object()
        {
            return Err(Error::Schema {
                phase,
                message: "data.thinking must be an object".to_string(),
            });
        }

        match (role, phase) {
            (MachineRole::Review, Phase::Plan) => {
                todos_from_data(&output.data)?;
            }
            (_, Phase::Synthesize) => {
                findings_from_data(phase, &output.data)?;
            }
            _ => {}
        }
        Ok(())
    }
}
