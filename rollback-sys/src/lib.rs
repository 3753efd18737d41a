// SPDX-License-Identifier: GPL-3.0-only

//! LVM snapshot rollback orchestration
//!
//! Everything here talks to the host through [`CommandExecutor`]:
//! - Layout inspection (`vgs`, `lvs`, `pvs`) and backend detection
//! - Capacity planning for classic snapshots
//! - Volume-group growth (`growpart`, `parted`, `pvcreate`, `vgextend`)
//! - Boot entries and OS profiles through `boom`
//! - The snapshot-set lifecycle: create, register, merge, delete
//!
//! Mutating operations require root and should run under an
//! [`InFlightGuard`].

pub mod boot;
pub mod capacity;
pub mod coordinator;
pub mod error;
pub mod exec;
pub mod expand;
pub mod guard;
pub mod inspect;
pub mod package;
pub mod report;
pub mod transcript;
pub mod validate;

#[cfg(test)]
mod testing;

pub use boot::{BootEntryManager, CreatedEntry, FlagOutcome, sanitize_options};
pub use capacity::CapacityVerdict;
pub use coordinator::{
    DeleteScope, Detection, LifecycleOptions, SetRequest, SetView, SnapshotCoordinator,
};
pub use error::{MemberOutcome, PartialCreate, Result, RollbackError};
pub use exec::{CommandExecutor, CommandOutput, DEFAULT_TIMEOUT, Invocation, SystemExecutor};
pub use expand::VolumeGroupExpander;
pub use guard::{DEFAULT_LOCK_PATH, InFlightGuard, require_root};
pub use inspect::LayoutInspector;
pub use package::PackageManager;
pub use transcript::{Outcome, Transcript, TranscriptEntry};
