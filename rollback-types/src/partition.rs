// SPDX-License-Identifier: GPL-3.0-only

//! Partition addressing and free-region types

use serde::{Deserialize, Serialize};

/// Smallest free region worth turning into a physical volume (1 GiB)
pub const MIN_REGION_MIB: f64 = 1024.0;

/// A partition device decomposed into base disk and partition number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRef {
    /// Base disk, e.g. `/dev/sda` or `/dev/nvme0n1`
    pub disk: String,
    /// 1-based partition number
    pub number: u32,
}

impl PartitionRef {
    /// Decompose `/dev/sda3`, `/dev/vda2`, `/dev/nvme0n1p2` or
    /// `/dev/mmcblk0p1`. Whole disks and mapper devices yield `None`.
    pub fn parse(device: &str) -> Option<Self> {
        if device.starts_with("/dev/mapper/") {
            return None;
        }
        let digits_at = device
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(at, c)| at + c.len_utf8())?;
        if digits_at == device.len() {
            return None;
        }
        let number: u32 = device[digits_at..].parse().ok()?;
        let stem = &device[..digits_at];

        let disk = match stem.strip_suffix('p') {
            Some(disk) if disk.ends_with(|c: char| c.is_ascii_digit()) => disk,
            _ if needs_separator(stem) => return None,
            _ => stem,
        };
        if disk.len() <= "/dev/".len() {
            return None;
        }

        Some(Self {
            disk: disk.to_string(),
            number,
        })
    }

    /// Device path of partition `number` on `disk`
    pub fn device_for(disk: &str, number: u32) -> String {
        if disk.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{disk}p{number}")
        } else {
            format!("{disk}{number}")
        }
    }
}

// Disks whose names end in a digit separate partitions with `p`, so a bare
// trailing number on them is part of the disk name.
fn needs_separator(stem: &str) -> bool {
    ["nvme", "mmcblk", "loop", "nbd", "md", "dm-"]
        .iter()
        .any(|family| stem.starts_with(&format!("/dev/{family}")))
}

/// Unallocated region reported by the partition tool, in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeRegion {
    pub start_mib: f64,
    pub end_mib: f64,
    pub size_mib: f64,
}

impl FreeRegion {
    /// Largest region of at least `min_mib`; ties go to the earliest start.
    pub fn select_largest(regions: &[FreeRegion], min_mib: f64) -> Option<FreeRegion> {
        regions
            .iter()
            .filter(|region| region.size_mib >= min_mib)
            .fold(None, |best: Option<FreeRegion>, region| match best {
                Some(current)
                    if current.size_mib > region.size_mib
                        || (current.size_mib == region.size_mib
                            && current.start_mib <= region.start_mib) =>
                {
                    Some(current)
                }
                _ => Some(*region),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: f64, size: f64) -> FreeRegion {
        FreeRegion {
            start_mib: start,
            end_mib: start + size,
            size_mib: size,
        }
    }

    #[test]
    fn decomposes_partition_devices() {
        assert_eq!(
            PartitionRef::parse("/dev/sda3"),
            Some(PartitionRef {
                disk: "/dev/sda".to_string(),
                number: 3
            })
        );
        assert_eq!(
            PartitionRef::parse("/dev/nvme0n1p2"),
            Some(PartitionRef {
                disk: "/dev/nvme0n1".to_string(),
                number: 2
            })
        );
        assert_eq!(
            PartitionRef::parse("/dev/mmcblk0p1").map(|p| p.disk),
            Some("/dev/mmcblk0".to_string())
        );
        assert_eq!(PartitionRef::parse("/dev/sda"), None);
        assert_eq!(PartitionRef::parse("/dev/nvme0n1"), None);
        assert_eq!(PartitionRef::parse("/dev/mapper/luks-1"), None);
    }

    #[test]
    fn multibyte_names_split_on_char_boundaries() {
        assert_eq!(
            PartitionRef::parse("/dev/sdé3"),
            Some(PartitionRef {
                disk: "/dev/sdé".to_string(),
                number: 3,
            })
        );
        assert_eq!(PartitionRef::parse("/dev/é"), None);
    }

    #[test]
    fn builds_partition_device_paths() {
        assert_eq!(PartitionRef::device_for("/dev/vda", 4), "/dev/vda4");
        assert_eq!(PartitionRef::device_for("/dev/nvme0n1", 4), "/dev/nvme0n1p4");
    }

    #[test]
    fn selects_largest_region() {
        let regions = [region(100.0, 2048.0), region(5000.0, 5120.0)];
        let chosen = FreeRegion::select_largest(&regions, MIN_REGION_MIB).unwrap();
        assert_eq!(chosen.size_mib, 5120.0);
    }

    #[test]
    fn ties_go_to_earliest_start() {
        let regions = [region(9000.0, 4096.0), region(200.0, 4096.0)];
        let chosen = FreeRegion::select_largest(&regions, MIN_REGION_MIB).unwrap();
        assert_eq!(chosen.start_mib, 200.0);
    }

    #[test]
    fn rejects_small_regions() {
        let regions = [region(0.0, 1.0), region(10.0, 1023.0)];
        assert_eq!(FreeRegion::select_largest(&regions, MIN_REGION_MIB), None);
    }
}
