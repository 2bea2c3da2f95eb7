use serde::Serialize;

use crate::phase::Phase;
use crate::schema::PhaseOutput;

/// Outputs of every phase executed so far in one machine run, in order.
///
/// Entries are only ever appended; a phase that runs twice appears twice and
/// [`PhaseContext::latest`] returns the newer one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseContext {
    entries: Vec<PhaseOutput>,
}

impl PhaseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, output: PhaseOutput) {
        self.entries.push(output);
    }

    pub fn latest(&self, phase: Phase) -> Option<&PhaseOutput> {
        self.entries.iter().rev().find(|o| o.phase == phase)
    }

    pub fn entries(&self) -> &[PhaseOutput] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
