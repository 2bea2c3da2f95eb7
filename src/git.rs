use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::{Error, Result};

/// The change on HEAD relative to its merge base with `base`.
pub fn change_diff(repo_root: &Path, base: &str) -> Result<String> {
    let range = format!("{base}...HEAD");
    let output = Command::new("git")
        .args(["diff", "--no-color", &range])
        .current_dir(repo_root)
        .output()
        .map_err(|e| Error::Process(format!("failed to run git diff {range}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Process(format!(
            "git diff {range} failed: {}",
            stderr.trim()
        )));
    }
    let diff = String::from_utf8_lossy(&output.stdout).into_owned();
    info!(range, bytes = diff.len(), "collected diff");
    Ok(diff)
}

/// Subject line of the HEAD commit, if there is one.
pub fn head_subject(repo_root: &Path) -> Option<String> {
    Command::new("git")
        .args(["log", "-1", "--format=%s"])
        .current_dir(repo_root)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
}
