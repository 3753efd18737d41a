// SPDX-License-Identifier: GPL-3.0-only

//! Capacity planning for classic snapshots

use std::collections::BTreeMap;

use rollback_types::{Role, SnapshotSize};
use serde::Serialize;

/// Verdict of comparing requested snapshot sizes with VG free space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CapacityVerdict {
    Sufficient { requested: f64, free: f64 },
    /// `shortfall` is the growth the VG needs
    Insufficient {
        requested: f64,
        free: f64,
        shortfall: f64,
    },
    /// Free space unknown; the check is skipped
    Unverified { requested: f64 },
}

impl CapacityVerdict {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, CapacityVerdict::Insufficient { .. })
    }
}

/// Sum of gigabyte sizes over non-zero roles. Other notations cannot be
/// verified and are left out.
pub fn requested_gigabytes(sizes: &BTreeMap<Role, SnapshotSize>) -> f64 {
    sizes
        .values()
        .filter(|size| !size.is_zero())
        .filter_map(SnapshotSize::gigabytes)
        .sum()
}

/// `Insufficient` exactly when the requested sum strictly exceeds `free`.
pub fn plan(sizes: &BTreeMap<Role, SnapshotSize>, free: Option<f64>) -> CapacityVerdict {
    let requested = requested_gigabytes(sizes);
    match free {
        None => CapacityVerdict::Unverified { requested },
        Some(free) if requested > free => CapacityVerdict::Insufficient {
            requested,
            free,
            shortfall: requested - free,
        },
        Some(free) => CapacityVerdict::Sufficient { requested, free },
    }
}
