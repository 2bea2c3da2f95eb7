use std::path::Path;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = ".revloop.toml";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub max_retries: Option<u32>,
    pub max_concurrency: Option<usize>,
    pub max_iterations: Option<u32>,
    pub phase_timeout_seconds: Option<u64>,
    pub reasoner: Option<String>,
    pub reasoner_binary: Option<String>,
    pub reasoner_model: Option<String>,
    pub reasoner_url: Option<String>,
    pub reasoner_api_key_env: Option<String>,
    pub subworker_timeout_seconds: Option<u64>,
    pub tool_timeout_seconds: Option<u64>,
    pub retry_backoff_ms: Option<u64>,
    pub allowed_tools: Option<Vec<String>>,
    pub prompts_dir: Option<String>,
    pub base_branch: Option<String>,
    pub max_output_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_retries: u32,
    pub max_concurrency: usize,
    pub max_iterations: u32,
    pub phase_timeout_seconds: u64,
    pub reasoner: String,
    pub reasoner_binary: String,
    pub reasoner_model: Option<String>,
    pub reasoner_url: Option<String>,
    pub reasoner_api_key_env: Option<String>,
    pub subworker_timeout_seconds: u64,
    pub tool_timeout_seconds: u64,
    pub retry_backoff_ms: u64,
    pub allowed_tools: Vec<String>,
    pub prompts_dir: Option<String>,
    pub base_branch: String,
    pub max_output_bytes: usize,
}

impl Config {
    /// Load relative to the current directory.
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_from(cli, Path::new("."))
    }

    /// An explicit `--config` must exist; the default file is optional.
    pub fn load_from(cli: &Cli, dir: &Path) -> Result<Self> {
        let file_config = match cli.config {
            Some(ref path) => {
                let path = dir.join(path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path));
                }
                parse_config(&std::fs::read_to_string(&path)?)?
            }
            None => {
                let path = dir.join(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(&path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let config = merge(file_config, cli);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.reasoner.as_str() {
            "claude" | "codex" => {}
            "http" => {
                if self.reasoner_url.is_none() {
                    return Err(Error::ConfigValidation(
                        "reasoner_url is required for the http reasoner".to_string(),
                    ));
                }
                if self.reasoner_model.is_none() {
                    return Err(Error::ConfigValidation(
                        "reasoner_model is required for the http reasoner".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::ConfigValidation(format!(
                    "unknown reasoner: {other} (expected: claude, codex, http)"
                )));
            }
        }
        if self.max_concurrency == 0 {
            return Err(Error::ConfigValidation(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(Error::ConfigValidation(
                "max_iterations must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("phase_timeout_seconds", self.phase_timeout_seconds),
            ("subworker_timeout_seconds", self.subworker_timeout_seconds),
            ("tool_timeout_seconds", self.tool_timeout_seconds),
        ] {
            if value == 0 {
                return Err(Error::ConfigValidation(format!("{name} must be > 0")));
            }
        }
        if self.max_output_bytes == 0 {
            return Err(Error::ConfigValidation(
                "max_output_bytes must be > 0".to_string(),
            ));
        }
        if let Some(tool) = self
            .allowed_tools
            .iter()
            .find(|t| t.trim().is_empty() || t.contains('/') || t.contains('\\'))
        {
            return Err(Error::ConfigValidation(format!(
                "allowed_tools entries must be bare program names, got {tool:?}"
            )));
        }
        if self.allowed_tools.iter().any(|t| t.trim() == "cargo") {
            return Err(Error::ConfigValidation(
                "cargo cannot be allowed: it runs build scripts from the reviewed tree".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

pub fn default_allowed_tools() -> Vec<String> {
    ["git", "rg", "grep"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    let reasoner = cli
        .reasoner
        .clone()
        .or(file.reasoner)
        .unwrap_or_else(|| "claude".to_string());
    let reasoner_binary = cli
        .reasoner_binary
        .clone()
        .or(file.reasoner_binary)
        .unwrap_or_else(|| match reasoner.as_str() {
            "codex" => "codex".to_string(),
            _ => "claude".to_string(),
        });

    Config {
        max_retries: cli.max_retries.or(file.max_retries).unwrap_or(3),
        max_concurrency: cli.max_concurrency.or(file.max_concurrency).unwrap_or(4),
        max_iterations: cli.max_iterations.or(file.max_iterations).unwrap_or(10),
        phase_timeout_seconds: cli
            .phase_timeout_seconds
            .or(file.phase_timeout_seconds)
            .unwrap_or(600),
        reasoner,
        reasoner_binary,
        reasoner_model: cli.reasoner_model.clone().or(file.reasoner_model),
        reasoner_url: cli.reasoner_url.clone().or(file.reasoner_url),
        reasoner_api_key_env: cli
            .reasoner_api_key_env
            .clone()
            .or(file.reasoner_api_key_env),
        subworker_timeout_seconds: cli
            .subworker_timeout_seconds
            .or(file.subworker_timeout_seconds)
            .unwrap_or(1800),
        tool_timeout_seconds: cli
            .tool_timeout_seconds
            .or(file.tool_timeout_seconds)
            .unwrap_or(300),
        retry_backoff_ms: cli.retry_backoff_ms.or(file.retry_backoff_ms).unwrap_or(1000),
        allowed_tools: cli
            .allowed_tools
            .clone()
            .or(file.allowed_tools)
            .unwrap_or_else(default_allowed_tools),
        prompts_dir: cli.prompts_dir.clone().or(file.prompts_dir),
        base_branch: cli
            .base_branch
            .clone()
            .or(file.base_branch)
            .unwrap_or_else(|| "main".to_string()),
        max_output_bytes: cli
            .max_output_bytes
            .or(file.max_output_bytes)
            .unwrap_or(256 * 1024),
    }
}
