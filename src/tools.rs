use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::process::{ProcessConfig, spawn_and_stream};

/// One command requested by a sub-worker plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub stdout: String,
    pub exit_code: i32,
}

/// Boundary to the local tool sandbox. A non-zero exit code is a result, not an error.
pub trait ToolRunner: Send + Sync {
    fn run(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<ToolOutput>> + Send;
}

/// Read-only git subcommands. Global options before the subcommand (`-c`,
/// `-C`, `--exec-path`, `--git-dir`) are never accepted.
pub const GIT_SUBCOMMANDS: &[&str] = &[
    "log", "diff", "show", "blame", "grep", "status", "ls-files",
];

/// git options that write files, read outside the repository or start
/// another program.
const GIT_FORBIDDEN: &[&str] = &[
    "--output",
    "--ext-diff",
    "--textconv",
    "--open-files-in-pager",
    "--no-index",
    "-O",
];

/// ripgrep options that run a preprocessor per file.
const RG_FORBIDDEN: &[&str] = &["--pre", "--pre-glob"];

/// Runs allowlisted binaries in the repository root with a scrubbed environment.
pub struct SandboxedTools {
    working_dir: PathBuf,
    allowed: Vec<String>,
    max_output_bytes: usize,
}

impl SandboxedTools {
    pub fn new(working_dir: PathBuf, allowed: Vec<String>, max_output_bytes: usize) -> Self {
        Self {
            working_dir,
            allowed,
            max_output_bytes,
        }
    }

    /// Reject anything that is not a bare, allowlisted program name.
    pub fn check_command(&self, command: &str) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::InvalidCommand("empty command".to_string()));
        }
        if command.contains('/') || command.contains('\\') {
            return Err(Error::InvalidCommand(format!(
                "command must be a bare program name: {command}"
            )));
        }
        if !self.allowed.iter().any(|a| a == command) {
            return Err(Error::InvalidCommand(format!(
                "command not allowed: {command} (allowed: {})",
                self.allowed.join(", ")
            )));
        }
        Ok(())
    }

    /// Argument rules for allowlisted programs that can be talked into
    /// running other code. Arguments come from reasoner output, which is
    /// shaped by the diff under review.
    pub fn check_args(&self, command: &str, args: &[String]) -> Result<()> {
        match command.trim() {
            "git" => {
                let subcommand = args.first().map(String::as_str).unwrap_or_default();
                if !GIT_SUBCOMMANDS.contains(&subcommand) {
                    return Err(Error::InvalidCommand(format!(
                        "git {subcommand:?} is not allowed (allowed: {})",
                        GIT_SUBCOMMANDS.join(", ")
                    )));
                }
                reject_options("git", &args[1..], GIT_FORBIDDEN)
            }
            "rg" => reject_options("rg", args, RG_FORBIDDEN),
            "cargo" => Err(Error::InvalidCommand(
                "cargo runs build scripts from the reviewed tree".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Reject any argument naming a forbidden option. Long options also match
/// unambiguous abbreviations (`--outp=x`), short ones match inside clusters
/// (`-iOless`).
fn reject_options(command: &str, args: &[String], forbidden: &[&str]) -> Result<()> {
    for arg in args {
        let hit = forbidden.iter().find(|flag| {
            if flag.starts_with("--") {
                let name = arg.split('=').next().unwrap_or_default();
                name.len() > 2 && name.starts_with("--") && flag.starts_with(name)
            } else {
                let short = flag.trim_start_matches('-');
                !arg.starts_with("--")
                    && arg
                        .strip_prefix('-')
                        .is_some_and(|cluster| cluster.contains(short))
            }
        });
        if let Some(flag) = hit {
            return Err(Error::InvalidCommand(format!(
                "{command} option {arg} is not allowed ({flag})"
            )));
        }
    }
    Ok(())
}

impl ToolRunner for SandboxedTools {
    async fn run(&self, command: &str, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        self.check_command(command)?;
        self.check_args(command, args)?;
        let command = command.trim();

        let mut config = ProcessConfig::new(command, args.to_vec(), self.working_dir.clone());
        config.timeout = Some(timeout);
        config.log_prefix = format!("tool:{command}");
        config.clear_env = true;
        config.max_output_bytes = Some(self.max_output_bytes);

        let output = spawn_and_stream(config).await.map_err(|e| match e {
            Error::Process(msg) => Error::Tool(msg),
            other => other,
        })?;

        if let Some(sig) = output.signal {
            return Err(Error::Tool(format!("{command} killed by signal {sig}")));
        }

        info!(
            command,
            exit_code = output.exit_code,
            truncated = output.truncated,
            "tool finished"
        );
        Ok(ToolOutput {
            stdout: output.stdout(),
            exit_code: output.exit_code,
        })
    }
}
