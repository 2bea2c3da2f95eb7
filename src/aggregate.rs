//! Folds findings from the review machine and its sub-workers into one
//! merge decision.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::dispatch::{SubworkerResult, SubworkerStatus};
use crate::findings::{Finding, Severity};

/// Overall severity of a review. `Merge` means nothing was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallSeverity {
    Merge,
    Warning,
    Critical,
    Blocking,
}

impl From<Severity> for OverallSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => OverallSeverity::Warning,
            Severity::Critical => OverallSeverity::Critical,
            Severity::Blocking => OverallSeverity::Blocking,
        }
    }
}

impl fmt::Display for OverallSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallSeverity::Merge => write!(f, "merge"),
            OverallSeverity::Warning => write!(f, "warning"),
            OverallSeverity::Critical => write!(f, "critical"),
            OverallSeverity::Blocking => write!(f, "blocking"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    Approve,
    NeedsChanges,
    Block,
}

impl fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeDecision::Approve => write!(f, "approve"),
            MergeDecision::NeedsChanges => write!(f, "needs_changes"),
            MergeDecision::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeGate {
    pub decision: MergeDecision,
    pub must_fix: Vec<String>,
    pub should_fix: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregation {
    pub severity: OverallSeverity,
    pub gate: MergeGate,
    pub findings: Vec<Finding>,
}

/// Merge the orchestrator's own findings with those of every sub-worker that
/// finished. Blocked sub-workers contribute nothing.
pub fn aggregate(own_findings: &[Finding], subworker_results: &[SubworkerResult]) -> Aggregation {
    let delegated = subworker_results
        .iter()
        .filter(|r| r.status == SubworkerStatus::Done)
        .flat_map(|r| r.findings.iter());

    let mut seen = HashSet::new();
    let mut findings: Vec<Finding> = own_findings
        .iter()
        .chain(delegated)
        .filter(|f| seen.insert((f.title.clone(), f.severity)))
        .cloned()
        .collect();
    findings.sort_by(|a, b| {
        (Reverse(a.severity), &a.title).cmp(&(Reverse(b.severity), &b.title))
    });

    let severity = findings
        .iter()
        .map(|f| OverallSeverity::from(f.severity))
        .max()
        .unwrap_or(OverallSeverity::Merge);

    Aggregation {
        severity,
        gate: merge_gate(&findings),
        findings,
    }
}

/// Derive the gate from an already de-duplicated finding set.
pub fn merge_gate(findings: &[Finding]) -> MergeGate {
    let decision = if findings.iter().any(|f| f.severity == Severity::Blocking) {
        MergeDecision::Block
    } else if findings.is_empty() {
        MergeDecision::Approve
    } else {
        MergeDecision::NeedsChanges
    };

    let must_fix = findings
        .iter()
        .filter(|f| matches!(f.severity, Severity::Blocking | Severity::Critical))
        .map(|f| f.title.clone())
        .collect();
    let should_fix = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .map(|f| f.title.clone())
        .collect();

    MergeGate {
        decision,
        must_fix,
        should_fix,
    }
}
