use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::phase::Phase;
use crate::process::{ProcessConfig, spawn_and_stream};

/// Boundary to whatever produces phase output text.
pub trait Reasoner: Send + Sync {
    fn call(&self, system: &str, user: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Applies the call timeout and normalizes the raw reply.
pub struct ReasonerGateway<R> {
    reasoner: R,
    timeout: Duration,
}

impl<R: Reasoner> ReasonerGateway<R> {
    pub fn new(reasoner: R, timeout: Duration) -> Self {
        Self { reasoner, timeout }
    }

    pub fn reasoner(&self) -> &R {
        &self.reasoner
    }

    pub async fn call(&self, phase: Phase, system: &str, user: &str) -> Result<String> {
        if system.trim().is_empty() {
            return Err(Error::MissingInstruction(format!(
                "no instructions for phase {phase}"
            )));
        }

        let raw = match tokio::time::timeout(self.timeout, self.reasoner.call(system, user)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(self.timeout)),
        };

        let text = normalize_response(&raw);
        if text.is_empty() {
            return Err(Error::MalformedOutput(format!(
                "empty reasoner response for phase {phase}"
            )));
        }
        debug!(phase = %phase, bytes = text.len(), "reasoner replied");
        Ok(text)
    }
}

pub fn normalize_response(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliFlavor {
    Claude,
    Codex,
}

/// Runs the claude or codex CLI once per call.
pub struct CliReasoner {
    flavor: CliFlavor,
    binary: String,
    model: Option<String>,
    working_dir: PathBuf,
}

impl CliReasoner {
    pub fn new(
        flavor: CliFlavor,
        binary: String,
        model: Option<String>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            flavor,
            binary,
            model,
            working_dir,
        }
    }

    /// Build the command, its arguments and the stdin payload, if any.
    pub fn build_command(&self, system: &str, user: &str) -> (String, Vec<String>, Option<String>) {
        match self.flavor {
            CliFlavor::Claude => {
                let mut args = vec![
                    "--print".to_string(),
                    "--output-format".to_string(),
                    "text".to_string(),
                ];
                if let Some(ref model) = self.model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
                args.push("--system-prompt".to_string());
                args.push(system.to_string());
                // The user content carries the whole diff and can outgrow argv.
                (self.binary.clone(), args, Some(user.to_string()))
            }
            CliFlavor::Codex => {
                let mut args = vec!["exec".to_string()];
                if let Some(ref model) = self.model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
                (self.binary.clone(), args, Some(format!("{system}\n\n{user}")))
            }
        }
    }
}

impl Reasoner for CliReasoner {
    async fn call(&self, system: &str, user: &str) -> Result<String> {
        let (command, args, stdin_data) = self.build_command(system, user);
        let mut config = ProcessConfig::new(command, args, self.working_dir.clone());
        config.log_prefix = "reasoner".to_string();
        config.stdin_data = stdin_data;

        let output = spawn_and_stream(config).await.map_err(|e| match e {
            Error::Process(msg) => Error::Reasoner(msg),
            other => other,
        })?;

        if let Some(sig) = output.signal {
            return Err(Error::Reasoner(format!("reasoner killed by signal {sig}")));
        }
        if output.exit_code != 0 {
            let tail = output.stderr_lines.last().cloned().unwrap_or_default();
            return Err(Error::Reasoner(format!(
                "reasoner exited with code {}: {tail}",
                output.exit_code
            )));
        }
        Ok(output.stdout())
    }
}

/// OpenAI-compatible chat-completions endpoint.
pub struct HttpReasoner {
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpReasoner {
    pub fn new(url: String, model: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            url,
            model,
            api_key,
            timeout,
        }
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        })
    }
}

impl Reasoner for HttpReasoner {
    async fn call(&self, system: &str, user: &str) -> Result<String> {
        let body = self.request_body(system, user);
        let url = self.url.clone();
        let api_key = self.api_key.clone();
        let timeout = self.timeout;

        let reply = tokio::task::spawn_blocking(move || {
            let mut request = ureq::post(&url)
                .timeout(timeout)
                .set("Content-Type", "application/json");
            if let Some(key) = api_key {
                request = request.set("Authorization", &format!("Bearer {key}"));
            }
            match request.send_json(&body) {
                Ok(response) => response
                    .into_json::<Value>()
                    .map_err(|e| {
                        Error::MalformedOutput(format!("reasoner reply is not JSON: {e}"))
                    }),
                Err(ureq::Error::Status(code, response)) => {
                    let text = response.into_string().unwrap_or_default();
                    Err(status_error(code, &text))
                }
                Err(ureq::Error::Transport(t)) => Err(Error::ReasonerUnavailable(t.to_string())),
            }
        })
        .await
        .map_err(|e| Error::Reasoner(format!("http reasoner task failed: {e}")))??;

        extract_content(&reply)
    }
}

/// Rate limits and server errors are worth retrying; other client errors are not.
pub fn status_error(code: u16, body: &str) -> Error {
    let detail = format!("HTTP {code}: {}", body.trim());
    match code {
        429 => Error::RateLimited(detail),
        500.. => Error::ReasonerUnavailable(detail),
        _ => Error::ReasonerRejected(detail),
    }
}

pub fn extract_content(reply: &Value) -> Result<String> {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::MalformedOutput("reply lacks choices[0].message.content".to_string())
        })
}

/// Dispatches to the configured backend.
pub enum AnyReasoner {
    Cli(CliReasoner),
    Http(HttpReasoner),
}

impl Reasoner for AnyReasoner {
    async fn call(&self, system: &str, user: &str) -> Result<String> {
        match self {
            AnyReasoner::Cli(r) => r.call(system, user).await,
            AnyReasoner::Http(r) => r.call(system, user).await,
        }
    }
}
