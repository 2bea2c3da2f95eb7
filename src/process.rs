use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variables passed through when a child runs with a cleared env.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME"];

/// Configuration for spawning a child process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub log_prefix: String,
    pub env: Vec<(String, String)>,
    /// Start from an empty environment (plus [`PASSTHROUGH_ENV`]) instead of inheriting ours.
    pub clear_env: bool,
    pub stdin_data: Option<String>,
    /// Stop collecting stdout once this many bytes are captured; the child keeps running.
    pub max_output_bytes: Option<usize>,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir,
            timeout: None,
            log_prefix: "process".to_string(),
            env: Vec::new(),
            clear_env: false,
            stdin_data: None,
            max_output_bytes: None,
        }
    }
}

/// Output from a completed child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub truncated: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }
}

/// Spawn a child process, stream its output line-by-line, and enforce the timeout.
///
/// The child is placed in its own process group on Unix so a timeout kills
/// everything it started.
pub async fn spawn_and_stream(config: ProcessConfig) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if config.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    if config.clear_env {
        cmd.env_clear();
        for key in PASSTHROUGH_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| spawn_error(&config.command, e))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;

    if let Some(data) = config.stdin_data
        && let Some(mut stdin) = child.stdin.take()
    {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(data.as_bytes()).await {
                debug!(error = %e, "child closed stdin early");
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("child stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Process("child stderr not captured".into()))?;

    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix;
    let cap = config.max_output_bytes;

    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut captured = 0usize;
        let mut truncated = false;
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!("[{prefix_out}] {line}");
            if truncated {
                continue;
            }
            captured += line.len() + 1;
            if cap.is_some_and(|max| captured > max) {
                truncated = true;
                continue;
            }
            lines.push(line);
        }
        (lines, truncated)
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!("[{prefix_err}] {line}");
            lines.push(line);
        }
        lines
    });

    let status = if let Some(dur) = config.timeout {
        match tokio::time::timeout(dur, child.wait()).await {
            Ok(r) => r.map_err(|e| Error::Process(format!("wait error: {e}")))?,
            Err(_) => {
                kill_group(pid, &mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Timeout(dur));
            }
        }
    } else {
        child
            .wait()
            .await
            .map_err(|e| Error::Process(format!("wait error: {e}")))?
    };

    let (stdout_lines, truncated) = stdout_task
        .await
        .map_err(|e| Error::Process(format!("stdout reader failed: {e}")))?;
    let stderr_lines = stderr_task
        .await
        .map_err(|e| Error::Process(format!("stderr reader failed: {e}")))?;

    let (exit_code, signal) = extract_exit_info(&status);

    Ok(ProcessOutput {
        exit_code,
        signal,
        stdout_lines,
        stderr_lines,
        truncated,
    })
}

/// A program that is missing, not executable or cannot take its arguments will
/// fail the same way on every attempt.
fn spawn_error(command: &str, err: std::io::Error) -> Error {
    let message = format!("failed to spawn '{command}': {err}");
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::ArgumentListTooLong => {
            Error::InvalidCommand(message)
        }
        _ => Error::Process(message),
    }
}

/// SIGTERM the whole process group, give it a moment, then SIGKILL.
async fn kill_group(pid: u32, child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        unsafe {
            libc::killpg(pid as i32, libc::SIGTERM);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.start_kill();
}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}
