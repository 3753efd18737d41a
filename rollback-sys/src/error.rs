// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::time::Duration;

use rollback_types::Role;
use thiserror::Error;

/// Error types for snapshot lifecycle and system operations
#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("privilege required: run as root")]
    PrivilegeRequired,

    #[error("another rollback operation is in progress (lock {0})")]
    OperationInProgress(String),

    #[error("required tool '{tool}' is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("invalid {kind} '{value}'")]
    InvalidName { kind: &'static str, value: String },

    #[error("could not parse {source_name} output: {reason}")]
    StructuredOutputParse {
        source_name: &'static str,
        reason: String,
    },

    #[error(
        "insufficient free space in VG: need {requested:.2}G, have {free:.2}G (short by {shortfall:.2}G)"
    )]
    InsufficientCapacity {
        requested: f64,
        free: f64,
        shortfall: f64,
    },

    #[error("snapshot set partially created: {0}")]
    PartialCreateFailure(Box<PartialCreate>),

    #[error("no OS profile available after creating one: {0}")]
    ProfileMissing(String),

    #[error("snapshot {0} does not exist")]
    SnapshotMissing(String),

    #[error("no physical volume found in volume group {0}")]
    PvNotFound(String),

    #[error("no free region of at least {min_mib} MiB on {disk}")]
    NoFreeRegion { disk: String, min_mib: f64 },

    #[error("{step} failed: {command}: {diagnostic}")]
    StepFailed {
        step: &'static str,
        command: String,
        diagnostic: String,
    },

    #[error("command timed out after {}s: {command}", timeout.as_secs())]
    CommandTimedOut { command: String, timeout: Duration },
}

/// Outcome of one member during set creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    Created(String),
    Failed { name: String, diagnostic: String },
    NotAttempted(String),
}

/// Per-role report of an aborted set creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCreate {
    pub members: Vec<(Role, MemberOutcome)>,
    /// Members removed again by compensating rollback
    pub rolled_back: Vec<String>,
}

impl PartialCreate {
    pub fn outcome(&self, role: Role) -> Option<&MemberOutcome> {
        self.members
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, outcome)| outcome)
    }
}

impl fmt::Display for PartialCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .members
            .iter()
            .map(|(role, outcome)| match outcome {
                MemberOutcome::Created(name) => format!("{role} created ({name})"),
                MemberOutcome::Failed { name, diagnostic } => {
                    format!("{role} failed ({name}: {diagnostic})")
                }
                MemberOutcome::NotAttempted(name) => format!("{role} not attempted ({name})"),
            })
            .collect();
        write!(f, "{}", parts.join(", "))?;
        if !self.rolled_back.is_empty() {
            write!(f, "; rolled back {}", self.rolled_back.join(", "))?;
        }
        Ok(())
    }
}

/// Result type alias for rollback operations
pub type Result<T> = std::result::Result<T, RollbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_create_lists_every_member() {
        let report = PartialCreate {
            members: vec![
                (Role::Root, MemberOutcome::Created("snap-pre-x".to_string())),
                (
                    Role::Var,
                    MemberOutcome::Failed {
                        name: "var-pre-x".to_string(),
                        diagnostic: "Volume group \"rl\" has insufficient free space".to_string(),
                    },
                ),
                (Role::Home, MemberOutcome::NotAttempted("home-pre-x".to_string())),
            ],
            rolled_back: vec![],
        };
        let rendered = RollbackError::PartialCreateFailure(Box::new(report)).to_string();
        assert!(rendered.contains("root created (snap-pre-x)"));
        assert!(rendered.contains("var failed (var-pre-x: Volume group"));
        assert!(rendered.contains("home not attempted"));
    }
}
