// SPDX-License-Identifier: GPL-3.0-only

//! LVM (Logical Volume Manager) types
//!
//! Types for volume groups, logical volumes and physical volumes as seen
//! through `vgs`, `lvs` and `pvs`. Sizes are gigabytes (`--units g`).

use serde::{Deserialize, Serialize};

/// Snapshot backend of a volume group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotBackend {
    /// Snapshots allocate on demand from a thin pool
    Thin,
    /// Copy-on-write snapshots with pre-allocated extents
    Classic,
}

impl SnapshotBackend {
    pub fn label(self) -> &'static str {
        match self {
            SnapshotBackend::Thin => "thin",
            SnapshotBackend::Classic => "classic",
        }
    }
}

/// Volume group information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeGroupInfo {
    /// Volume group name
    pub name: String,

    /// Total size in gigabytes, if it could be parsed
    pub size: Option<f64>,

    /// Free space in gigabytes, if it could be parsed
    pub free: Option<f64>,
}

/// Role of a logical volume relative to snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LvRole {
    Origin,
    Snapshot {
        origin: String,
        backend: SnapshotBackend,
    },
}

/// Logical volume information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalVolumeInfo {
    /// Parent volume group name
    pub vg_name: String,

    /// Logical volume name
    pub name: String,

    /// Raw `lv_attr` string, e.g. `swi-a-s---`
    pub attr: String,

    /// Origin LV name, empty origins are `None`
    pub origin: Option<String>,

    /// Size in gigabytes
    pub size: Option<f64>,

    /// `data_percent`, only reported for snapshots and thin volumes
    pub data_percent: Option<f64>,

    /// A merge into the origin has been scheduled and not yet finished
    pub merging: bool,
}

impl LogicalVolumeInfo {
    fn attr_type(&self) -> Option<char> {
        self.attr.chars().next()
    }

    /// Thin pools carry `t` as the volume type character.
    pub fn is_thin_pool(&self) -> bool {
        self.attr_type() == Some('t')
    }

    /// Classic snapshots are `s` (`S` while invalid or merging). Thin
    /// snapshots are thin volumes (`V`) that record an origin.
    pub fn is_snapshot(&self) -> bool {
        match self.attr_type() {
            Some(c) if c.eq_ignore_ascii_case(&'s') => true,
            Some('V') => self.origin.is_some(),
            _ => false,
        }
    }

    pub fn role(&self) -> LvRole {
        if !self.is_snapshot() {
            return LvRole::Origin;
        }
        let backend = if self.attr_type() == Some('V') {
            SnapshotBackend::Thin
        } else {
            SnapshotBackend::Classic
        };
        LvRole::Snapshot {
            origin: self.origin.clone().unwrap_or_default(),
            backend,
        }
    }
}

/// Snapshot inventory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub vg_name: String,
    pub name: String,
    pub origin: String,
    pub backend: SnapshotBackend,
    pub size: Option<f64>,
    pub usage_percent: Option<f64>,
    pub merging: bool,
}

impl SnapshotInfo {
    pub fn from_volume(lv: &LogicalVolumeInfo) -> Option<Self> {
        match lv.role() {
            LvRole::Origin => None,
            LvRole::Snapshot { origin, backend } => Some(Self {
                vg_name: lv.vg_name.clone(),
                name: lv.name.clone(),
                origin,
                backend,
                size: lv.size,
                usage_percent: lv.data_percent,
                merging: lv.merging,
            }),
        }
    }

    /// Short `vg/lv` form
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.name)
    }

    /// Whether the snapshot has filled to at least `threshold` percent
    pub fn nearly_full(&self, threshold: f64) -> bool {
        self.usage_percent.is_some_and(|usage| usage >= threshold)
    }
}

/// Physical volume information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalVolumeInfo {
    /// Device path (e.g., "/dev/sda1")
    pub device: String,

    /// Volume group name (None if not assigned)
    pub vg_name: Option<String>,

    /// Total size in gigabytes
    pub size: Option<f64>,

    /// Free space in gigabytes
    pub free: Option<f64>,
}

impl PhysicalVolumeInfo {
    /// Check if this PV is assigned to a VG
    pub fn is_assigned(&self) -> bool {
        self.vg_name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lv(name: &str, attr: &str, origin: Option<&str>) -> LogicalVolumeInfo {
        LogicalVolumeInfo {
            vg_name: "rl".to_string(),
            name: name.to_string(),
            attr: attr.to_string(),
            origin: origin.map(str::to_string),
            size: Some(20.0),
            data_percent: Some(1.5),
            merging: false,
        }
    }

    #[test]
    fn classifies_classic_snapshot_and_pool() {
        let snap = lv("snap-pre-1", "swi-a-tz--", Some("root"));
        let pool = lv("pool00", "twi-aotz--", None);

        assert!(snap.is_snapshot());
        assert!(!snap.is_thin_pool());
        assert!(pool.is_thin_pool());
        assert!(!pool.is_snapshot());
        assert_eq!(
            snap.role(),
            LvRole::Snapshot {
                origin: "root".to_string(),
                backend: SnapshotBackend::Classic
            }
        );
    }

    #[test]
    fn thin_volume_is_snapshot_only_with_origin() {
        assert!(lv("snap-pre-1", "Vwi-a-tz-k", Some("root")).is_snapshot());
        assert!(!lv("root", "Vwi-aotz--", None).is_snapshot());
    }

    #[test]
    fn merging_snapshot_still_counts() {
        assert!(lv("var-pre-1", "Swi-a-s---", Some("var")).is_snapshot());
    }

    #[test]
    fn flags_nearly_full_snapshot() {
        let info = SnapshotInfo::from_volume(&lv("var-pre-1", "swi-a-s---", Some("var")))
            .unwrap();
        assert!(!info.nearly_full(80.0));
        let full = SnapshotInfo {
            usage_percent: Some(91.2),
            ..info
        };
        assert!(full.nearly_full(80.0));
    }
}
