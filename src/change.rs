use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The change under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub diff: String,
}

impl ChangeRequest {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            diff: diff.into(),
        }
    }

    /// A review needs something to look at.
    pub fn validate(&self) -> Result<()> {
        if self.diff.trim().is_empty() {
            return Err(Error::MissingInstruction("change has an empty diff".to_string()));
        }
        Ok(())
    }
}
