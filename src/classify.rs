//! Failure classification for the retry layer.

use std::fmt;

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Contract or shape violation. Retrying cannot help.
    Structural,
    /// Infrastructure hiccup. Eligible for a bounded retry.
    Transient,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Structural => write!(f, "structural"),
            ErrorClass::Transient => write!(f, "transient"),
        }
    }
}

/// Map an error to its retry class.
///
/// No wildcard arm: adding an `Error` variant forces a decision here.
/// Anything that is not a contract violation is Transient.
pub fn classify(err: &Error) -> ErrorClass {
    match err {
        Error::ConfigNotFound(_)
        | Error::ConfigParse(_)
        | Error::ConfigValidation(_)
        | Error::Prompt(_)
        | Error::Schema { .. }
        | Error::InvalidTransition { .. }
        | Error::MissingContext { .. }
        | Error::MissingInstruction(_)
        | Error::MalformedOutput(_)
        | Error::BudgetExceeded { .. }
        | Error::InvalidCommand(_)
        | Error::ReasonerRejected(_) => ErrorClass::Structural,

        Error::Io(_)
        | Error::ReasonerUnavailable(_)
        | Error::Reasoner(_)
        | Error::RateLimited(_)
        | Error::Timeout(_)
        | Error::Tool(_)
        | Error::Process(_)
        | Error::Session(_)
        | Error::Subworker(_)
        | Error::Other(_) => ErrorClass::Transient,
    }
}
