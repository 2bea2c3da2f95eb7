use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::phase::{MachineRole, Phase};
use crate::schema::PhaseSchemaRegistry;

const DEFAULT_INTAKE: &str = include_str!("default_prompts/intake.md");
const DEFAULT_PLAN: &str = include_str!("default_prompts/plan.md");
const DEFAULT_SYNTHESIZE: &str = include_str!("default_prompts/synthesize.md");
const DEFAULT_EVALUATE: &str = include_str!("default_prompts/evaluate.md");
const DEFAULT_WORKER_INTAKE: &str = include_str!("default_prompts/worker-intake.md");
const DEFAULT_WORKER_PLAN: &str = include_str!("default_prompts/worker-plan.md");
const DEFAULT_WORKER_SYNTHESIZE: &str = include_str!("default_prompts/worker-synthesize.md");

/// Template name for phases that talk to the reasoner.
pub fn template_name(role: MachineRole, phase: Phase) -> Option<&'static str> {
    match (role, phase) {
        (MachineRole::Review, Phase::Intake) => Some("intake"),
        (MachineRole::Review, Phase::Plan) => Some("plan"),
        (MachineRole::Review, Phase::Synthesize) => Some("synthesize"),
        (MachineRole::Review, Phase::Evaluate) => Some("evaluate"),
        (MachineRole::Subworker, Phase::Intake) => Some("worker-intake"),
        (MachineRole::Subworker, Phase::Plan) => Some("worker-plan"),
        (MachineRole::Subworker, Phase::Synthesize) => Some("worker-synthesize"),
        _ => None,
    }
}

fn default_template(name: &str) -> Option<&'static str> {
    match name {
        "intake" => Some(DEFAULT_INTAKE),
        "plan" => Some(DEFAULT_PLAN),
        "synthesize" => Some(DEFAULT_SYNTHESIZE),
        "evaluate" => Some(DEFAULT_EVALUATE),
        "worker-intake" => Some(DEFAULT_WORKER_INTAKE),
        "worker-plan" => Some(DEFAULT_WORKER_PLAN),
        "worker-synthesize" => Some(DEFAULT_WORKER_SYNTHESIZE),
        _ => None,
    }
}

/// Values available to every phase template.
#[derive(Debug, Clone, Serialize)]
pub struct PromptVars {
    pub phase: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub allowed_tools: String,
    pub output_contract: String,
}

/// Describe the JSON envelope the reasoner must return for `phase`.
pub fn output_contract(role: MachineRole, phase: Phase) -> String {
    let schema = PhaseSchemaRegistry::schema(role, phase);
    let next: Vec<&str> = role
        .successors(phase)
        .iter()
        .map(|p| p.as_str())
        .chain(std::iter::once(Phase::StoppedHuman.as_str()))
        .collect();
    let required: Vec<String> = schema
        .required
        .iter()
        .map(|(key, kind)| format!("`{key}` ({})", kind.name()))
        .collect();

    let mut out = String::from(
        "Reply with exactly one JSON object and nothing else, shaped as\n\
         `{\"phase\": ..., \"data\": {...}, \"next_phase_request\": ...}`.\n",
    );
    out.push_str(&format!("- `phase` must be \"{phase}\".\n"));
    out.push_str(&format!(
        "- `next_phase_request` must be one of: {}.\n",
        next.join(", ")
    ));
    if !required.is_empty() {
        out.push_str(&format!("- Required `data` keys: {}.\n", required.join(", ")));
    }
    out
}

/// Phase instruction templates with user overrides.
pub struct PromptEngine {
    override_dir: Option<PathBuf>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// User overrides in `override_dir` take precedence over embedded defaults.
    pub fn load_template(&self, name: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = Path::new(dir).join(format!("{name}.md"));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }

        default_template(name)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Prompt(format!("unknown prompt template: {name}")))
    }

    /// Render the instructions for one phase. Undefined variables are errors.
    pub fn render(&self, role: MachineRole, phase: Phase, vars: &PromptVars) -> Result<String> {
        let name = template_name(role, phase).ok_or_else(|| {
            Error::MissingInstruction(format!("no instruction template for {role} {phase}"))
        })?;
        let source = self.load_template(name)?;
        let rendered = render_template(name, &source, vars)?;
        if rendered.trim().is_empty() {
            return Err(Error::MissingInstruction(format!(
                "template {name} rendered empty"
            )));
        }
        Ok(rendered)
    }
}

pub fn render_template(name: &str, source: &str, vars: &impl Serialize) -> Result<String> {
    let engine = upon::Engine::new();
    let template = engine
        .compile(source)
        .map_err(|e| Error::Prompt(format!("template {name} does not compile: {e}")))?;
    template
        .render(&engine, vars)
        .to_string()
        .map_err(|e| Error::Prompt(format!("template {name} failed to render: {e}")))
}
