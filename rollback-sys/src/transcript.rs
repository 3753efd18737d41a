// SPDX-License-Identifier: GPL-3.0-only

//! Operation transcript
//!
//! Every lifecycle operation appends what it attempted and how it ended,
//! including steps skipped because their precondition did not hold. Each
//! entry is also emitted as a tracing event.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Done,
    Failed(String),
    Skipped(String),
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub action: String,
    pub outcome: Outcome,
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Done => write!(f, "OK    {}", self.action),
            Outcome::Failed(reason) => write!(f, "ERR   {}: {reason}", self.action),
            Outcome::Skipped(reason) => write!(f, "SKIP  {}: {reason}", self.action),
            Outcome::Note => write!(f, "      {}", self.action),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, action: String, outcome: Outcome) {
        self.entries.push(TranscriptEntry { action, outcome });
    }

    pub fn done(&mut self, action: impl Into<String>) {
        let action = action.into();
        info!("{action}");
        self.push(action, Outcome::Done);
    }

    pub fn failed(&mut self, action: impl Into<String>, reason: impl Into<String>) {
        let action = action.into();
        let reason = reason.into();
        warn!("{action} failed: {reason}");
        self.push(action, Outcome::Failed(reason));
    }

    pub fn skipped(&mut self, action: impl Into<String>, reason: impl Into<String>) {
        let action = action.into();
        let reason = reason.into();
        info!("skipped {action}: {reason}");
        self.push(action, Outcome::Skipped(reason));
    }

    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.push(message, Outcome::Note);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of entries that changed something
    pub fn actions_taken(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == Outcome::Done)
            .count()
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, Outcome::Failed(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_actions_and_failures() {
        let mut transcript = Transcript::new();
        transcript.note("scanning rl");
        transcript.done("lvremove rl/var-pre-x");
        transcript.failed("lvremove rl/snap-pre-x", "in use");
        transcript.skipped("lvconvert --merge rl/home-pre-x", "does not exist");

        assert_eq!(transcript.actions_taken(), 1);
        assert_eq!(transcript.failures(), 1);
        assert_eq!(
            transcript.entries()[3].to_string(),
            "SKIP  lvconvert --merge rl/home-pre-x: does not exist"
        );
    }
}
