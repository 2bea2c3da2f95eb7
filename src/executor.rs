//! Runs a single phase: builds its input from prior outputs, calls the
//! reasoner or the tool sandbox, and validates what comes back.

use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::change::ChangeRequest;
use crate::context::PhaseContext;
use crate::dispatch::SubworkerRequest;
use crate::error::{Error, Result};
use crate::phase::{MachineRole, Phase, PhaseHandler};
use crate::prompts::{PromptEngine, PromptVars, output_contract};
use crate::reasoner::{Reasoner, ReasonerGateway};
use crate::schema::{PhaseOutput, PhaseSchemaRegistry, parse_phase_output};
use crate::tools::{ToolCommand, ToolRunner};
use crate::transition::RunState;

/// What a machine is working on. Sub-workers also carry their todo.
#[derive(Debug, Clone, Copy)]
pub struct MachineInput<'a> {
    pub change: &'a ChangeRequest,
    pub todo: Option<&'a SubworkerRequest>,
}

impl<'a> MachineInput<'a> {
    pub fn review(change: &'a ChangeRequest) -> Self {
        Self { change, todo: None }
    }

    pub fn subworker(change: &'a ChangeRequest, todo: &'a SubworkerRequest) -> Self {
        Self {
            change,
            todo: Some(todo),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_iterations: u32,
    pub tool_timeout: Duration,
    pub allowed_tools: Vec<String>,
}

pub struct PhaseExecutor<R, T> {
    gateway: ReasonerGateway<R>,
    tools: T,
    prompts: PromptEngine,
    settings: ExecutorSettings,
}

impl<R: Reasoner, T: ToolRunner> PhaseExecutor<R, T> {
    pub fn new(
        gateway: ReasonerGateway<R>,
        tools: T,
        prompts: PromptEngine,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            gateway,
            tools,
            prompts,
            settings,
        }
    }

    pub fn gateway(&self) -> &ReasonerGateway<R> {
        &self.gateway
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// Execute the current phase of `state` once.
    pub async fn run(
        &self,
        role: MachineRole,
        state: &RunState,
        context: &PhaseContext,
        input: &MachineInput<'_>,
    ) -> Result<PhaseOutput> {
        let phase = state.current_phase();
        if let Some(missing) = role.required_context(phase)
            && context.latest(missing).is_none()
        {
            return Err(Error::MissingContext { phase, missing });
        }

        let output = match role.handler(phase) {
            PhaseHandler::Reasoning => self.run_reasoning(role, state, context, input).await?,
            PhaseHandler::Tools => self.run_tools(context).await?,
            PhaseHandler::Delegation => {
                return Err(Error::MissingInstruction(format!(
                    "{role} {phase} is delegated, not executed"
                )));
            }
            PhaseHandler::Terminal => {
                return Err(Error::MissingInstruction(format!(
                    "terminal phase {phase} has nothing to execute"
                )));
            }
        };

        PhaseSchemaRegistry::validate(role, &output)?;
        Ok(output)
    }

    async fn run_reasoning(
        &self,
        role: MachineRole,
        state: &RunState,
        context: &PhaseContext,
        input: &MachineInput<'_>,
    ) -> Result<PhaseOutput> {
        let phase = state.current_phase();
        let vars = PromptVars {
            phase: phase.to_string(),
            iteration: state.iteration_count(),
            max_iterations: self.settings.max_iterations,
            allowed_tools: self.settings.allowed_tools.join(", "),
            output_contract: output_contract(role, phase),
        };
        let system = self.prompts.render(role, phase, &vars)?;
        let user = user_content(context, input)?;

        debug!(phase = %phase, %role, prompt_bytes = user.len(), "calling reasoner");
        let raw = self.gateway.call(phase, &system, &user).await?;
        parse_phase_output(phase, &raw)
    }

    async fn run_tools(&self, context: &PhaseContext) -> Result<PhaseOutput> {
        let plan = context.latest(Phase::Plan).ok_or(Error::MissingContext {
            phase: Phase::Act,
            missing: Phase::Plan,
        })?;
        let commands = planned_commands(&plan.data)?;

        let mut results = Vec::with_capacity(commands.len());
        for cmd in &commands {
            let out = self
                .tools
                .run(&cmd.command, &cmd.args, self.settings.tool_timeout)
                .await?;
            info!(command = %cmd.command, exit_code = out.exit_code, "tool result");
            results.push(json!({
                "command": cmd.command,
                "args": cmd.args,
                "exit_code": out.exit_code,
                "stdout": out.stdout,
            }));
        }

        let mut data = Map::new();
        data.insert("tool_results".to_string(), Value::Array(results));
        Ok(PhaseOutput::new(Phase::Act, data, Phase::Synthesize))
    }
}

fn planned_commands(data: &Map<String, Value>) -> Result<Vec<ToolCommand>> {
    let value = data.get("commands").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(value).map_err(|e| Error::Schema {
        phase: Phase::Plan,
        message: format!("invalid commands: {e}"),
    })
}

/// The user message: the change, the todo if any, and everything produced so far.
fn user_content(context: &PhaseContext, input: &MachineInput<'_>) -> Result<String> {
    let prior: Vec<Value> = context
        .entries()
        .iter()
        .map(|o| json!({"phase": o.phase, "data": o.data}))
        .collect();
    let mut doc = json!({
        "change": input.change,
        "prior_outputs": prior,
    });
    if let Some(todo) = input.todo {
        doc["todo"] = serde_json::to_value(todo)?;
    }
    Ok(serde_json::to_string_pretty(&doc)?)
}
