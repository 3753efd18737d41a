// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for LVM snapshot rollback
//!
//! These models are derived views: every value is rebuilt from live
//! volume-manager and boot-loader queries, nothing here is persisted.
//!
//! - **rollback-sys**: parses tool output into these types and drives the
//!   snapshot lifecycle with them
//! - **rollback-cli**: prints them for the operator
//!
//! ## Naming linkage
//!
//! A snapshot set has no record of its own. Its members are found by the
//! naming convention `{prefix}-pre-{stamp}` (see [`Role::snapshot_name`]).

pub mod boot;
pub mod lvm;
pub mod partition;
pub mod snapshot;

pub use boot::{BootEntry, EntrySpec, OptionPolicy, OsProfile, ProfileTemplate};
pub use lvm::{
    LogicalVolumeInfo, LvRole, PhysicalVolumeInfo, SnapshotBackend, SnapshotInfo,
    VolumeGroupInfo,
};
pub use partition::{FreeRegion, MIN_REGION_MIB, PartitionRef};
pub use snapshot::{Role, SetState, SnapshotSet, SnapshotSize, Stamp, parse_snapshot_name};
