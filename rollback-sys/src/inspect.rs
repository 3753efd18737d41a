// SPDX-License-Identifier: GPL-3.0-only

//! Read-only volume-group inspection
//!
//! Nothing is cached: every call re-queries the volume manager.

use rollback_types::{
    LogicalVolumeInfo, PhysicalVolumeInfo, SnapshotBackend, SnapshotInfo, VolumeGroupInfo,
};
use tracing::{debug, warn};

use crate::error::Result;
use crate::exec::{CommandExecutor, Invocation};
use crate::report::{self, LVS_FIELDS, PVS_FIELDS, VGS_FIELDS};
use crate::validate;

/// Backend of a VG from its LV records: any thin pool makes it `Thin`.
pub fn classify_backend(lvs: &[LogicalVolumeInfo]) -> SnapshotBackend {
    if lvs.iter().any(LogicalVolumeInfo::is_thin_pool) {
        SnapshotBackend::Thin
    } else {
        SnapshotBackend::Classic
    }
}

/// Snapshot records of `vg` from a full LV listing.
pub fn select_snapshots(lvs: &[LogicalVolumeInfo], vg: &str) -> Vec<SnapshotInfo> {
    lvs.iter()
        .filter(|lv| lv.vg_name == vg)
        .filter_map(SnapshotInfo::from_volume)
        .collect()
}

pub struct LayoutInspector<'a> {
    exec: &'a dyn CommandExecutor,
}

impl<'a> LayoutInspector<'a> {
    pub fn new(exec: &'a dyn CommandExecutor) -> Self {
        Self { exec }
    }

    /// All LVs of `vg` from the structured report.
    pub fn logical_volumes(&self, vg: &str) -> Result<Vec<LogicalVolumeInfo>> {
        validate::volume_name("volume group", vg)?;
        let invocation = Invocation::query("lvs")
            .args(["-a", "--reportformat", "json", "--units", "g", "--nosuffix"])
            .args(["-o", LVS_FIELDS])
            .arg(vg);
        let output = self
            .exec
            .execute(&invocation)?
            .require("list logical volumes", &invocation)?;
        let lvs: Vec<LogicalVolumeInfo> = report::parse_lvs_json(&output.stdout)?
            .into_iter()
            .filter(|lv| lv.vg_name == vg)
            .collect();
        debug!("found {} logical volumes in {vg}", lvs.len());
        Ok(lvs)
    }

    /// Thin if the VG holds a thin pool. Never fails: unreadable data is
    /// logged and treated as `Classic`.
    pub fn detect_backend(&self, vg: &str) -> SnapshotBackend {
        match self.logical_volumes(vg) {
            Ok(lvs) => classify_backend(&lvs),
            Err(error) => {
                warn!("could not inspect {vg} for a thin pool, assuming classic: {error}");
                SnapshotBackend::Classic
            }
        }
    }

    pub fn volume_group(&self, vg: &str) -> Result<Option<VolumeGroupInfo>> {
        validate::volume_name("volume group", vg)?;
        let invocation = Invocation::query("vgs")
            .args(["--noheadings", "--units", "g", "--nosuffix"])
            .args(["-o", VGS_FIELDS, "--separator", "\t"])
            .arg(vg);
        let output = self.exec.execute(&invocation)?;
        if !output.success() {
            debug!("vgs {vg} failed: {}", output.diagnostic());
            return Ok(None);
        }
        Ok(report::parse_vgs(&output.stdout)
            .into_iter()
            .find(|info| info.name == vg))
    }

    /// Free gigabytes in `vg`, `None` when it cannot be determined.
    pub fn free_space(&self, vg: &str) -> Option<f64> {
        match self.volume_group(vg) {
            Ok(Some(info)) => {
                if info.free.is_none() {
                    warn!("could not parse free space of {vg}");
                }
                info.free
            }
            Ok(None) => {
                warn!("volume group {vg} not reported by vgs");
                None
            }
            Err(error) => {
                warn!("could not read free space of {vg}: {error}");
                None
            }
        }
    }

    /// Snapshot inventory of `vg`. A malformed report is an error.
    pub fn list_snapshots(&self, vg: &str) -> Result<Vec<SnapshotInfo>> {
        let lvs = self.logical_volumes(vg)?;
        Ok(select_snapshots(&lvs, vg))
    }

    pub fn physical_volumes(&self) -> Result<Vec<PhysicalVolumeInfo>> {
        let invocation = Invocation::query("pvs")
            .args(["--noheadings", "--units", "g", "--nosuffix"])
            .args(["-o", PVS_FIELDS, "--separator", "\t"]);
        let output = self
            .exec
            .execute(&invocation)?
            .require("list physical volumes", &invocation)?;
        Ok(report::parse_pvs(&output.stdout))
    }

    /// First PV of `vg`; `None` is a normal outcome.
    pub fn guess_physical_volume(&self, vg: &str) -> Result<Option<String>> {
        validate::volume_name("volume group", vg)?;
        Ok(self
            .physical_volumes()?
            .into_iter()
            .find(|pv| pv.vg_name.as_deref() == Some(vg))
            .map(|pv| pv.device))
    }

    /// Whether `vg/lv` exists
    pub fn lv_exists(&self, vg: &str, lv: &str) -> Result<bool> {
        validate::volume_name("volume group", vg)?;
        validate::volume_name("logical volume", lv)?;
        let invocation = Invocation::query("lvs")
            .args(["--noheadings", "-o", "lv_name"])
            .arg(format!("{vg}/{lv}"));
        Ok(self.exec.execute(&invocation)?.success())
    }

    /// Plain `vgs` and `lvs` tables for the operator
    pub fn status(&self) -> Result<String> {
        let vgs = Invocation::query("vgs");
        let lvs = Invocation::query("lvs").args([
            "-a",
            "-o",
            "vg_name,lv_name,lv_attr,origin,lv_size,data_percent,metadata_percent,pool_lv",
        ]);
        let mut text = String::new();
        for invocation in [vgs, lvs] {
            let output = self.exec.execute(&invocation)?;
            text.push_str(&format!("== {} ==\n", invocation.program));
            if output.success() {
                text.push_str(output.stdout.trim_end());
            } else {
                text.push_str(&output.diagnostic());
            }
            text.push('\n');
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RollbackError;
    use crate::testing::{ScriptedExecutor, fail, lvs_json, ok};

    #[test]
    fn pool_marker_selects_thin_and_only_snapshot_is_listed() {
        let exec = ScriptedExecutor::new();
        exec.always(
            "lvs -a --reportformat json",
            ok(&lvs_json(&[
                ("rl", "snap-pre-1", "swi-a-tz--", "root"),
                ("rl", "pool00", "twi-aotz--", ""),
            ])),
        );
        let inspector = LayoutInspector::new(&exec);

        assert_eq!(inspector.detect_backend("rl"), SnapshotBackend::Thin);
        let snapshots = inspector.list_snapshots("rl").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "snap-pre-1");
        assert_eq!(snapshots[0].origin, "root");
    }

    #[test]
    fn backend_defaults_to_classic_on_bad_report() {
        let exec = ScriptedExecutor::new();
        exec.always("lvs -a --reportformat json", ok("{not json"));
        assert_eq!(
            LayoutInspector::new(&exec).detect_backend("rl"),
            SnapshotBackend::Classic
        );

        let failing = ScriptedExecutor::new();
        failing.always("lvs", fail(5, "Volume group \"rl\" not found"));
        assert_eq!(
            LayoutInspector::new(&failing).detect_backend("rl"),
            SnapshotBackend::Classic
        );
    }

    #[test]
    fn snapshot_listing_surfaces_parse_errors() {
        let exec = ScriptedExecutor::new();
        exec.always("lvs -a --reportformat json", ok("{\"report\": ["));
        assert!(matches!(
            LayoutInspector::new(&exec).list_snapshots("rl"),
            Err(RollbackError::StructuredOutputParse { .. })
        ));
    }

    #[test]
    fn free_space_unknown_when_unparsable() {
        let exec = ScriptedExecutor::new();
        exec.always("vgs", ok("  rl\t99.00\tlots\n"));
        assert_eq!(LayoutInspector::new(&exec).free_space("rl"), None);

        let good = ScriptedExecutor::new();
        good.always("vgs", ok("  rl\t99.00\t12.50\n"));
        assert_eq!(LayoutInspector::new(&good).free_space("rl"), Some(12.5));
    }

    #[test]
    fn guesses_first_pv_of_group() {
        let exec = ScriptedExecutor::new();
        exec.always(
            "pvs",
            ok("  /dev/sdb1\tdata\t10.00\t0\n  /dev/sda3\trl\t99.00\t0\n  /dev/sdc1\trl\t9.00\t9.00\n"),
        );
        let inspector = LayoutInspector::new(&exec);
        assert_eq!(
            inspector.guess_physical_volume("rl").unwrap().as_deref(),
            Some("/dev/sda3")
        );
        assert_eq!(inspector.guess_physical_volume("other").unwrap(), None);
    }

    #[test]
    fn lv_exists_follows_exit_status() {
        let exec = ScriptedExecutor::new();
        exec.always("lvs --noheadings -o lv_name rl/var-pre-x", ok("  var-pre-x"));
        exec.always("lvs --noheadings -o lv_name", fail(5, "Failed to find logical volume"));
        let inspector = LayoutInspector::new(&exec);
        assert!(inspector.lv_exists("rl", "var-pre-x").unwrap());
        assert!(!inspector.lv_exists("rl", "home-pre-x").unwrap());
    }

    #[test]
    fn rejects_unsafe_names() {
        let exec = ScriptedExecutor::new();
        let inspector = LayoutInspector::new(&exec);
        assert!(matches!(
            inspector.list_snapshots("rl; rm -rf /"),
            Err(RollbackError::InvalidName { .. })
        ));
        assert!(exec.rendered().is_empty());
    }
}
