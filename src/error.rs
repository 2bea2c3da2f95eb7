use std::path::PathBuf;
use std::time::Duration;

use crate::phase::Phase;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("phase {phase} output failed validation: {message}")]
    Schema { phase: Phase, message: String },

    #[error("invalid transition {from} -> {requested}")]
    InvalidTransition { from: Phase, requested: String },

    #[error("phase {phase} requires output of {missing}, which has not run")]
    MissingContext { phase: Phase, missing: Phase },

    #[error("missing required content: {0}")]
    MissingInstruction(String),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("budget exceeded: {used} of {limit} iterations used")]
    BudgetExceeded { used: u32, limit: u32 },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("reasoner rejected the request: {0}")]
    ReasonerRejected(String),

    #[error("reasoner unavailable: {0}")]
    ReasonerUnavailable(String),

    #[error("reasoner error: {0}")]
    Reasoner(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("sub-worker error: {0}")]
    Subworker(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedOutput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
