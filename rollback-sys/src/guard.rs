// SPDX-License-Identifier: GPL-3.0-only

//! Preconditions checked before any lifecycle operation

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::geteuid;
use tracing::debug;

use crate::error::{Result, RollbackError};

/// Default location of the in-flight lock
pub const DEFAULT_LOCK_PATH: &str = "/run/lvm-rollback.lock";

/// Fail with [`RollbackError::PrivilegeRequired`] unless running as root.
pub fn require_root() -> Result<()> {
    if geteuid().is_root() {
        Ok(())
    } else {
        Err(RollbackError::PrivilegeRequired)
    }
}

/// Exclusive hold on the lock file; released on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    _lock: Flock<File>,
    path: PathBuf,
}

impl InFlightGuard {
    /// Take the lock without blocking. A concurrent holder yields
    /// [`RollbackError::OperationInProgress`].
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!("acquired {}", path.display());
                Ok(Self {
                    _lock: lock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(RollbackError::OperationInProgress(
                path.display().to_string(),
            )),
            Err((_, errno)) => Err(RollbackError::Io(errno.into())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_rejected() {
        let path = std::env::temp_dir()
            .join(format!("lvm-rollback-test-{}.lock", std::process::id()));
        let first = InFlightGuard::acquire(&path).unwrap();
        assert_eq!(first.path(), path.as_path());

        assert!(matches!(
            InFlightGuard::acquire(&path),
            Err(RollbackError::OperationInProgress(_))
        ));

        drop(first);
        assert!(InFlightGuard::acquire(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }
}
