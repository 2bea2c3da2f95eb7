use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use revloop::change::ChangeRequest;
use revloop::cli::{Cli, CliCommand};
use revloop::config::Config;
use revloop::engine::{EngineSettings, ReviewEngine};
use revloop::error::{Error, Result};
use revloop::executor::{ExecutorSettings, PhaseExecutor};
use revloop::git;
use revloop::prompts::PromptEngine;
use revloop::reasoner::{AnyReasoner, CliFlavor, CliReasoner, HttpReasoner, ReasonerGateway};
use revloop::retry::{RetryCoordinator, RetryPolicy};
use revloop::session::InMemorySessionProvider;
use revloop::tools::SandboxedTools;

const EXIT_INTERRUPTED: i32 = 130;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(&cli)?;
    info!(?config, "config loaded");

    let CliCommand::Review {
        title,
        description,
        diff_file,
        base,
        run_log,
    } = cli.command;

    let repo_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let diff = match diff_file {
        Some(path) => std::fs::read_to_string(&path)?,
        None => git::change_diff(&repo_root, base.as_deref().unwrap_or(&config.base_branch))?,
    };
    let title = title
        .or_else(|| git::head_subject(&repo_root))
        .unwrap_or_else(|| "untitled change".to_string());
    let change = ChangeRequest::new(title, description.unwrap_or_default(), diff);

    let engine = build_engine(&config, &repo_root)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interrupted = shutdown_rx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next phase boundary");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = engine.with_shutdown(shutdown_rx).run(change).await;

    if let Some(path) = run_log {
        report.run_log.write_json(&path)?;
        info!(path = %path.display(), frames = report.run_log.len(), "run log written");
    }
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Other(format!("failed to serialize report: {e}")))?;
    println!("{json}");

    if *interrupted.borrow() {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(report.exit_code())
}

fn build_engine(
    config: &Config,
    repo_root: &Path,
) -> Result<ReviewEngine<AnyReasoner, SandboxedTools, InMemorySessionProvider>> {
    let phase_timeout = Duration::from_secs(config.phase_timeout_seconds);
    let executor = PhaseExecutor::new(
        ReasonerGateway::new(build_reasoner(config, repo_root)?, phase_timeout),
        SandboxedTools::new(
            repo_root.to_path_buf(),
            config.allowed_tools.clone(),
            config.max_output_bytes,
        ),
        PromptEngine::new(config.prompts_dir.as_ref().map(PathBuf::from)),
        ExecutorSettings {
            max_iterations: config.max_iterations,
            tool_timeout: Duration::from_secs(config.tool_timeout_seconds),
            allowed_tools: config.allowed_tools.clone(),
        },
    );
    let retry = RetryCoordinator::new(RetryPolicy {
        max_retries: config.max_retries,
        initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        attempt_timeout: phase_timeout,
    });
    Ok(ReviewEngine::new(
        executor,
        retry,
        Arc::new(InMemorySessionProvider::new()),
        EngineSettings {
            max_iterations: config.max_iterations,
            max_concurrency: config.max_concurrency,
            subworker_timeout: Duration::from_secs(config.subworker_timeout_seconds),
        },
    ))
}

fn build_reasoner(config: &Config, repo_root: &Path) -> Result<AnyReasoner> {
    let reasoner = match config.reasoner.as_str() {
        "http" => {
            let api_key = match config.reasoner_api_key_env {
                Some(ref var) => Some(std::env::var(var).map_err(|_| {
                    Error::ConfigValidation(format!("environment variable {var} is not set"))
                })?),
                None => None,
            };
            AnyReasoner::Http(HttpReasoner::new(
                config.reasoner_url.clone().unwrap_or_default(),
                config.reasoner_model.clone().unwrap_or_default(),
                api_key,
                Duration::from_secs(config.phase_timeout_seconds),
            ))
        }
        "codex" => AnyReasoner::Cli(CliReasoner::new(
            CliFlavor::Codex,
            config.reasoner_binary.clone(),
            config.reasoner_model.clone(),
            repo_root.to_path_buf(),
        )),
        _ => AnyReasoner::Cli(CliReasoner::new(
            CliFlavor::Claude,
            config.reasoner_binary.clone(),
            config.reasoner_model.clone(),
            repo_root.to_path_buf(),
        )),
    };
    Ok(reasoner)
}
