// SPDX-License-Identifier: GPL-3.0-only

//! Volume-group growth
//!
//! Two strategies: grow the partition under an existing PV into adjacent
//! free space, or carve a new partition out of the largest unallocated
//! region and add it to the VG. Steps run in order and are never retried;
//! a failing step names itself and carries the tool's diagnostic.

use rollback_types::{FreeRegion, MIN_REGION_MIB, PartitionRef};
use tracing::{debug, info};

use crate::error::{Result, RollbackError};
use crate::exec::{CommandExecutor, Invocation};
use crate::inspect::LayoutInspector;
use crate::package::PackageManager;
use crate::report;
use crate::transcript::Transcript;
use crate::validate;

const GROWPART: &str = "growpart";

/// `growpart` exits nonzero with this marker when the partition already
/// fills the available space.
const GROWPART_NOCHANGE: &str = "NOCHANGE";

pub struct VolumeGroupExpander<'a> {
    exec: &'a dyn CommandExecutor,
    package_manager: PackageManager,
    growpart_package: String,
}

impl<'a> VolumeGroupExpander<'a> {
    pub fn new(
        exec: &'a dyn CommandExecutor,
        package_manager: PackageManager,
        growpart_package: impl Into<String>,
    ) -> Self {
        Self {
            exec,
            package_manager,
            growpart_package: growpart_package.into(),
        }
    }

    fn locate_pv(&self, vg: &str, pv: Option<&str>) -> Result<String> {
        let device = match pv {
            Some(device) => device.to_string(),
            None => LayoutInspector::new(self.exec)
                .guess_physical_volume(vg)?
                .ok_or_else(|| RollbackError::PvNotFound(vg.to_string()))?,
        };
        validate::device_path(&device)?;
        Ok(device)
    }

    fn ensure_growpart(&self, transcript: &mut Transcript) -> Result<()> {
        if self.exec.tool_available(GROWPART) {
            return Ok(());
        }
        info!("{GROWPART} missing, installing {}", self.growpart_package);
        self.package_manager
            .install(self.exec, &self.growpart_package, transcript)?;
        if !self.exec.tool_available(GROWPART) && !self.exec.is_dry_run() {
            return Err(RollbackError::ToolUnavailable {
                tool: GROWPART.to_string(),
                reason: format!("still missing after installing {}", self.growpart_package),
            });
        }
        Ok(())
    }

    fn rescan(&self, disk: &str, transcript: &mut Transcript) -> Result<()> {
        let partprobe = Invocation::mutation("partprobe").arg(disk);
        self.exec
            .execute(&partprobe)?
            .require("rescan partition table", &partprobe)?;
        transcript.done(partprobe.render());
        Ok(())
    }

    /// Grow the partition under `pv` (or the VG's first PV) and resize the
    /// PV to match.
    pub fn grow_existing_pv(
        &self,
        vg: &str,
        pv: Option<&str>,
        transcript: &mut Transcript,
    ) -> Result<()> {
        validate::volume_name("volume group", vg)?;
        let device = self.locate_pv(vg, pv)?;
        let partition =
            PartitionRef::parse(&device).ok_or_else(|| RollbackError::InvalidName {
                kind: "partition device",
                value: device.clone(),
            })?;
        transcript.note(format!(
            "growing {device} (disk {}, partition {})",
            partition.disk, partition.number
        ));

        self.ensure_growpart(transcript)?;

        let grow = Invocation::mutation(GROWPART)
            .arg(partition.disk.as_str())
            .arg(partition.number.to_string());
        let output = self.exec.execute(&grow)?;
        if output.success() {
            transcript.done(grow.render());
        } else if output.stdout.contains(GROWPART_NOCHANGE)
            || output.stderr.contains(GROWPART_NOCHANGE)
        {
            transcript.skipped(grow.render(), "partition already at maximum size");
        } else {
            return Err(RollbackError::StepFailed {
                step: "grow partition",
                command: grow.render(),
                diagnostic: output.diagnostic(),
            });
        }

        self.rescan(&partition.disk, transcript)?;

        let resize = Invocation::mutation("pvresize").arg(device.as_str());
        self.exec
            .execute(&resize)?
            .require("resize physical volume", &resize)?;
        transcript.done(resize.render());
        Ok(())
    }

    fn partition_table(&self, disk: &str) -> Result<Vec<report::PartedRow>> {
        let print = Invocation::query("parted")
            .args(["-m", "-s", disk, "unit", "MiB", "print", "free"]);
        let output = self
            .exec
            .execute(&print)?
            .require("read partition table", &print)?;
        Ok(report::parse_parted(&output.stdout))
    }

    /// Create a partition in the largest free region of `disk` (default:
    /// the disk holding the VG's first PV) and add it to the VG.
    pub fn add_new_pv(
        &self,
        vg: &str,
        disk: Option<&str>,
        transcript: &mut Transcript,
    ) -> Result<String> {
        validate::volume_name("volume group", vg)?;
        let disk = match disk {
            Some(disk) => disk.to_string(),
            None => {
                let device = self.locate_pv(vg, None)?;
                PartitionRef::parse(&device)
                    .map(|partition| partition.disk)
                    .ok_or_else(|| RollbackError::InvalidName {
                        kind: "partition device",
                        value: device,
                    })?
            }
        };
        validate::device_path(&disk)?;

        let before = self.partition_table(&disk)?;
        let region = FreeRegion::select_largest(&report::free_regions(&before), MIN_REGION_MIB)
            .ok_or_else(|| RollbackError::NoFreeRegion {
                disk: disk.clone(),
                min_mib: MIN_REGION_MIB,
            })?;
        debug!(
            "selected free region {}..{} MiB on {disk}",
            region.start_mib, region.end_mib
        );

        let mkpart = Invocation::mutation("parted")
            .args(["-s", disk.as_str(), "unit", "MiB", "mkpart", "primary"])
            .arg(format!("{}", region.start_mib))
            .arg(format!("{}", region.end_mib));
        self.exec
            .execute(&mkpart)?
            .require("create partition", &mkpart)?;
        transcript.done(mkpart.render());

        let existing = report::partition_numbers(&before);
        let after = if self.exec.is_dry_run() {
            Vec::new()
        } else {
            report::partition_numbers(&self.partition_table(&disk)?)
        };
        let number = after
            .into_iter()
            .find(|number| !existing.contains(number))
            .or_else(|| {
                self.exec
                    .is_dry_run()
                    .then(|| existing.iter().max().map_or(1, |max| max + 1))
            })
            .ok_or_else(|| RollbackError::StepFailed {
                step: "locate new partition",
                command: format!("parted -m -s {disk} unit MiB print free"),
                diagnostic: "no new partition number after mkpart".to_string(),
            })?;
        let device = PartitionRef::device_for(&disk, number);

        let flag = Invocation::mutation("parted")
            .args(["-s", disk.as_str(), "set"])
            .arg(number.to_string())
            .args(["lvm", "on"]);
        self.exec
            .execute(&flag)?
            .require("flag partition for LVM", &flag)?;
        transcript.done(flag.render());

        self.rescan(&disk, transcript)?;

        let pvcreate = Invocation::mutation("pvcreate").arg(device.as_str());
        self.exec
            .execute(&pvcreate)?
            .require("create physical volume", &pvcreate)?;
        transcript.done(pvcreate.render());

        let vgextend = Invocation::mutation("vgextend").args([vg, device.as_str()]);
        self.exec
            .execute(&vgextend)?
            .require("extend volume group", &vgextend)?;
        transcript.done(vgextend.render());

        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::testing::{ScriptedExecutor, fail, ok};

    const PVS: &str = "  /dev/sda3\trl\t99.00\t0\n";

    fn expander(exec: &ScriptedExecutor) -> VolumeGroupExpander<'_> {
        VolumeGroupExpander::new(exec, PackageManager::Dnf, "cloud-utils-growpart")
    }

    #[test]
    fn grows_first_pv_of_group() {
        let exec = ScriptedExecutor::new();
        exec.always("pvs", ok(PVS));
        let mut transcript = Transcript::new();

        expander(&exec)
            .grow_existing_pv("rl", None, &mut transcript)
            .unwrap();
        assert_eq!(
            exec.mutations(),
            vec![
                "growpart /dev/sda 3".to_string(),
                "partprobe /dev/sda".to_string(),
                "pvresize /dev/sda3".to_string(),
            ]
        );
        assert_eq!(transcript.actions_taken(), 3);
    }

    #[test]
    fn installs_growpart_once_when_missing() {
        let exec = ScriptedExecutor::new();
        exec.without_tool("growpart");
        let mut transcript = Transcript::new();

        let result =
            expander(&exec).grow_existing_pv("rl", Some("/dev/nvme0n1p3"), &mut transcript);
        assert!(matches!(result, Err(RollbackError::ToolUnavailable { .. })));
        assert_eq!(
            exec.mutations(),
            vec!["dnf install -y cloud-utils-growpart".to_string()]
        );
    }

    #[test]
    fn growpart_nochange_still_resizes() {
        let exec = ScriptedExecutor::new();
        exec.always(
            "growpart",
            CommandOutput {
                status: 1,
                stdout: "NOCHANGE: partition 2 is size 209713152. it cannot be grown\n".to_string(),
                stderr: String::new(),
            },
        );
        let mut transcript = Transcript::new();

        expander(&exec)
            .grow_existing_pv("rl", Some("/dev/nvme0n1p2"), &mut transcript)
            .unwrap();
        assert_eq!(exec.position("growpart /dev/nvme0n1 2"), Some(0));
        assert!(exec.position("pvresize /dev/nvme0n1p2").is_some());
        assert_eq!(transcript.actions_taken(), 2);
    }

    #[test]
    fn failed_step_stops_the_sequence() {
        let exec = ScriptedExecutor::new();
        exec.always("partprobe", fail(1, "Error: Partition(s) on /dev/sda are being used."));
        let mut transcript = Transcript::new();

        match expander(&exec).grow_existing_pv("rl", Some("/dev/sda3"), &mut transcript) {
            Err(RollbackError::StepFailed { step, diagnostic, .. }) => {
                assert_eq!(step, "rescan partition table");
                assert!(diagnostic.contains("being used"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(exec.position("pvresize").is_none());
    }

    #[test]
    fn missing_pv_is_reported() {
        let exec = ScriptedExecutor::new();
        exec.always("pvs", ok("  /dev/sdb1\tdata\t10.00\t0\n"));
        let mut transcript = Transcript::new();
        assert!(matches!(
            expander(&exec).grow_existing_pv("rl", None, &mut transcript),
            Err(RollbackError::PvNotFound(vg)) if vg == "rl"
        ));
    }

    const PARTED_BEFORE: &str = "BYT;\n\
        /dev/sda:102400MiB:scsi:512:512:gpt:QEMU HARDDISK:;\n\
        1:0.02MiB:1.00MiB:0.98MiB:free;\n\
        1:1.00MiB:601MiB:600MiB:fat32::boot, esp;\n\
        2:601MiB:1625MiB:1024MiB:xfs::;\n\
        3:1625MiB:40960MiB:39335MiB:::lvm;\n\
        1:40960MiB:43008MiB:2048MiB:free;\n\
        1:43008MiB:48128MiB:5120MiB:free;\n";

    const PARTED_AFTER: &str = "BYT;\n\
        /dev/sda:102400MiB:scsi:512:512:gpt:QEMU HARDDISK:;\n\
        1:1.00MiB:601MiB:600MiB:fat32::boot, esp;\n\
        2:601MiB:1625MiB:1024MiB:xfs::;\n\
        3:1625MiB:40960MiB:39335MiB:::lvm;\n\
        1:40960MiB:43008MiB:2048MiB:free;\n\
        4:43008MiB:48128MiB:5120MiB:::;\n";

    #[test]
    fn adds_pv_in_largest_region() {
        let exec = ScriptedExecutor::new();
        exec.always("pvs", ok(PVS));
        exec.once("parted -m -s /dev/sda", ok(PARTED_BEFORE));
        exec.once("parted -m -s /dev/sda", ok(PARTED_AFTER));
        let mut transcript = Transcript::new();

        let device = expander(&exec)
            .add_new_pv("rl", None, &mut transcript)
            .unwrap();
        assert_eq!(device, "/dev/sda4");
        assert_eq!(
            exec.mutations(),
            vec![
                "parted -s /dev/sda unit MiB mkpart primary 43008 48128".to_string(),
                "parted -s /dev/sda set 4 lvm on".to_string(),
                "partprobe /dev/sda".to_string(),
                "pvcreate /dev/sda4".to_string(),
                "vgextend rl /dev/sda4".to_string(),
            ]
        );
    }

    #[test]
    fn small_regions_are_rejected() {
        let exec = ScriptedExecutor::new();
        exec.always(
            "parted -m -s /dev/vdb",
            ok("BYT;\n/dev/vdb:2048MiB:virtblk:512:512:gpt:Virtio:;\n1:0.02MiB:1023MiB:1022.98MiB:free;\n"),
        );
        let mut transcript = Transcript::new();

        assert!(matches!(
            expander(&exec).add_new_pv("rl", Some("/dev/vdb"), &mut transcript),
            Err(RollbackError::NoFreeRegion { .. })
        ));
        assert!(exec.mutations().is_empty());
    }
}
