// SPDX-License-Identifier: GPL-3.0-only

//! External command execution
//!
//! Every tool is invoked from a discrete argument vector, never through a
//! shell. [`CommandExecutor`] is the seam the rest of the crate talks to;
//! [`SystemExecutor`] runs real processes with a bounded wait.

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, RollbackError};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on a single external command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// One external command: program plus discrete arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Changes system state; skipped under dry-run
    pub mutating: bool,
}

impl Invocation {
    /// Read-only query
    pub fn query(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            mutating: false,
        }
    }

    /// Command that changes storage or boot state
    pub fn mutation(program: &str) -> Self {
        Self {
            mutating: true,
            ..Self::query(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn render(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Exit status and captured streams of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr when present, otherwise stdout
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    /// `Ok(self)` on exit 0, otherwise a [`RollbackError::StepFailed`]
    pub fn require(self, step: &'static str, invocation: &Invocation) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RollbackError::StepFailed {
                step,
                command: invocation.render(),
                diagnostic: self.diagnostic(),
            })
        }
    }
}

/// Runs external commands.
///
/// A nonzero exit is a normal [`CommandOutput`]; only failures to run the
/// command at all (missing binary, timeout) are errors.
pub trait CommandExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Whether `program` resolves on this host
    fn tool_available(&self, program: &str) -> bool;

    /// Mutating invocations are reported but not run
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Executor backed by real processes.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    timeout: Duration,
    dry_run: bool,
}

impl SystemExecutor {
    pub fn new(timeout: Duration, dry_run: bool) -> Self {
        Self { timeout, dry_run }
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, false)
    }
}

impl CommandExecutor for SystemExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let rendered = invocation.render();
        if self.dry_run && invocation.mutating {
            info!("[dry-run] {rendered}");
            return Ok(CommandOutput::default());
        }

        debug!("running {rendered}");
        let handle = duct::cmd(invocation.program.as_str(), &invocation.args)
            .env("LC_ALL", "C")
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::NotFound => RollbackError::ToolUnavailable {
                    tool: invocation.program.clone(),
                    reason: error.to_string(),
                },
                _ => RollbackError::Io(error),
            })?;

        let started = Instant::now();
        loop {
            if let Some(output) = handle.try_wait()? {
                let result = CommandOutput {
                    status: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                debug!("{} exited with {}", invocation.program, result.status);
                return Ok(result);
            }
            if started.elapsed() >= self.timeout {
                warn!("killing {rendered} after {}s", self.timeout.as_secs());
                if let Err(error) = handle.kill() {
                    warn!("failed to kill {}: {error}", invocation.program);
                }
                return Err(RollbackError::CommandTimedOut {
                    command: rendered,
                    timeout: self.timeout,
                });
            }
            sleep(POLL_INTERVAL);
        }
    }

    fn tool_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_command_context() {
        let invocation = Invocation::mutation("lvcreate")
            .args(["-s", "-n", "snap-pre-x"])
            .arg("rl/root");
        assert_eq!(invocation.render(), "lvcreate -s -n snap-pre-x rl/root");
        assert!(invocation.mutating);
        assert!(!Invocation::query("lvs").mutating);
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let output = CommandOutput {
            status: 5,
            stdout: "partial".to_string(),
            stderr: "  Volume group not found\n".to_string(),
        };
        assert_eq!(output.diagnostic(), "Volume group not found");

        let quiet = CommandOutput {
            status: 1,
            stdout: "NOCHANGE: partition 3 is size 100\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(quiet.diagnostic(), "NOCHANGE: partition 3 is size 100");
    }

    #[test]
    fn require_maps_failure_to_step_error() {
        let invocation = Invocation::mutation("pvresize").arg("/dev/sda3");
        let failed = CommandOutput {
            status: 5,
            stdout: String::new(),
            stderr: "boom".to_string(),
        };
        match failed.require("resize physical volume", &invocation) {
            Err(RollbackError::StepFailed {
                step,
                command,
                diagnostic,
            }) => {
                assert_eq!(step, "resize physical volume");
                assert_eq!(command, "pvresize /dev/sda3");
                assert_eq!(diagnostic, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn dry_run_skips_mutations() {
        let executor = SystemExecutor::new(Duration::from_secs(1), true);
        let output = executor
            .execute(&Invocation::mutation("definitely-not-a-real-tool"))
            .unwrap();
        assert!(output.success());
    }

    #[test]
    fn overrunning_command_is_killed() {
        let executor = SystemExecutor::new(Duration::from_millis(200), false);
        let started = Instant::now();
        let result = executor.execute(&Invocation::query("sleep").arg("5"));

        match result {
            Err(RollbackError::CommandTimedOut { command, timeout }) => {
                assert_eq!(command, "sleep 5");
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_binary_is_tool_unavailable() {
        let executor = SystemExecutor::default();
        let result = executor.execute(&Invocation::query("definitely-not-a-real-tool"));
        assert!(matches!(result, Err(RollbackError::ToolUnavailable { .. })));
    }
}
