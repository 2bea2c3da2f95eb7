use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::classify::{ErrorClass, classify};
use crate::error::{Error, Result};
use crate::phase::Phase;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// A successful value and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why a phase gave up.
#[derive(Debug)]
pub enum PhaseFailure {
    /// Retrying would not help.
    Structural { error: Error, attempts: u32 },
    Exhausted {
        phase: Phase,
        attempts: u32,
        last_error: Error,
    },
}

impl PhaseFailure {
    pub fn error(&self) -> &Error {
        match self {
            PhaseFailure::Structural { error, .. } => error,
            PhaseFailure::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PhaseFailure::Structural { attempts, .. }
            | PhaseFailure::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_error(self) -> Error {
        match self {
            PhaseFailure::Structural { error, .. } => error,
            PhaseFailure::Exhausted { last_error, .. } => last_error,
        }
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseFailure::Structural { error, .. } => write!(f, "{error}"),
            PhaseFailure::Exhausted {
                phase,
                attempts,
                last_error,
            } => write!(f, "{phase} failed after {attempts} attempts: {last_error}"),
        }
    }
}

pub fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// Bounded retry of one phase, driven by the error class.
#[derive(Debug, Clone, Copy)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Call `attempt_fn` (with the 1-based attempt number) until it succeeds,
    /// fails structurally, or the attempt budget is spent.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        phase: Phase,
        mut attempt_fn: F,
    ) -> std::result::Result<Attempted<T>, PhaseFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let timeout = self.policy.attempt_timeout;
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, attempt_fn(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout)),
            };

            let error = match result {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            match classify(&error) {
                ErrorClass::Structural => {
                    warn!(
                        phase = %phase,
                        attempt,
                        error = %error,
                        "structural failure, not retrying"
                    );
                    return Err(PhaseFailure::Structural {
                        error,
                        attempts: attempt,
                    });
                }
                ErrorClass::Transient if attempt < max_attempts => {
                    warn!(
                        phase = %phase,
                        attempt,
                        max_attempts,
                        error = %error,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    attempt += 1;
                }
                ErrorClass::Transient => {
                    warn!(phase = %phase, attempts = attempt, error = %error, "retries exhausted");
                    return Err(PhaseFailure::Exhausted {
                        phase,
                        attempts: attempt,
                        last_error: error,
                    });
                }
            }
        }
    }
}
