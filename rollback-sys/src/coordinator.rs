// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot-set lifecycle
//!
//! Sets move through `Planned -> Created -> BootRegistered` and end either
//! merged back into their origins or deleted. No state is kept between
//! calls: membership and progress are recovered from LV names and boot
//! entries each time.

use std::collections::{BTreeMap, BTreeSet};

use rollback_types::{
    BootEntry, EntrySpec, OptionPolicy, ProfileTemplate, Role, SetState, SnapshotBackend,
    SnapshotInfo, SnapshotSet, SnapshotSize, Stamp, VolumeGroupInfo, parse_snapshot_name,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::boot::{BootEntryManager, CreatedEntry, FlagOutcome, sanitize_options};
use crate::capacity::{self, CapacityVerdict};
use crate::error::{MemberOutcome, PartialCreate, Result, RollbackError};
use crate::exec::{CommandExecutor, Invocation};
use crate::inspect::{self, LayoutInspector};
use crate::package::PackageManager;
use crate::transcript::Transcript;
use crate::validate;

const BOOT_TOOL: &str = "boom";
const GROWPART: &str = "growpart";

/// Settings shared by every lifecycle operation.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Origin LV name per role
    pub origins: BTreeMap<Role, String>,
    pub option_policy: OptionPolicy,
    /// Kernel option added for the boot that completes a root merge
    pub merge_safety_flag: String,
    /// Parent directory of temporary mount-probe mountpoints
    pub mount_base: String,
    pub usage_warning_percent: f64,
    /// Create classic snapshots even when the capacity plan says no
    pub allow_insufficient: bool,
    /// Remove already-created members when set creation fails midway
    pub rollback_on_failure: bool,
    pub package_manager: PackageManager,
    pub boot_tool_package: String,
    pub growpart_package: String,
    pub profile_template: ProfileTemplate,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            origins: Role::ALL
                .into_iter()
                .map(|role| (role, role.name().to_string()))
                .collect(),
            option_policy: OptionPolicy::default(),
            merge_safety_flag: "fsck.mode=force".to_string(),
            mount_base: "/mnt".to_string(),
            usage_warning_percent: 80.0,
            allow_insufficient: false,
            rollback_on_failure: false,
            package_manager: PackageManager::default(),
            boot_tool_package: "boom-boot".to_string(),
            growpart_package: "cloud-utils-growpart".to_string(),
            profile_template: ProfileTemplate::from_os_release("", ""),
        }
    }
}

impl LifecycleOptions {
    pub fn origin(&self, role: Role) -> &str {
        self.origins
            .get(&role)
            .map(String::as_str)
            .unwrap_or(role.name())
    }
}

/// A set to create: sizes per role, zero meaning "leave out".
#[derive(Debug, Clone)]
pub struct SetRequest {
    pub vg: String,
    pub stamp: Stamp,
    pub sizes: BTreeMap<Role, SnapshotSize>,
}

/// Which convention-named snapshots a delete removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteScope {
    /// Every set in the volume group
    All,
    Stamp(Stamp),
}

impl DeleteScope {
    fn covers(&self, lv_name: &str) -> bool {
        match parse_snapshot_name(lv_name) {
            Some((_, stamp)) => match self {
                DeleteScope::All => true,
                DeleteScope::Stamp(wanted) => wanted.as_str() == stamp,
            },
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub volume_group: Option<VolumeGroupInfo>,
    pub backend: SnapshotBackend,
    pub thin_pool: Option<String>,
    pub snapshots: Vec<SnapshotInfo>,
}

/// Live view of one snapshot set
#[derive(Debug, Clone, Serialize)]
pub struct SetView {
    pub set: SnapshotSet,
    pub state: SetState,
    pub boot_entries: Vec<BootEntry>,
}

pub struct SnapshotCoordinator<'a> {
    exec: &'a dyn CommandExecutor,
    options: &'a LifecycleOptions,
}

impl<'a> SnapshotCoordinator<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, options: &'a LifecycleOptions) -> Self {
        Self { exec, options }
    }

    fn inspector(&self) -> LayoutInspector<'a> {
        LayoutInspector::new(self.exec)
    }

    fn boot(&self) -> BootEntryManager<'a> {
        BootEntryManager::new(self.exec, self.options.profile_template.clone())
    }

    fn warn_nearly_full(&self, snapshots: &[SnapshotInfo], transcript: &mut Transcript) {
        let threshold = self.options.usage_warning_percent;
        for snapshot in snapshots.iter().filter(|s| s.nearly_full(threshold)) {
            let usage = snapshot.usage_percent.unwrap_or_default();
            warn!("snapshot {} is {usage:.2}% full", snapshot.name);
            transcript.note(format!(
                "snapshot {} is {usage:.2}% full; merge or delete it before it is invalidated",
                snapshot.display_name()
            ));
        }
    }

    /// Backend, thin pool, capacity and snapshot inventory of `vg`.
    pub fn detect(&self, vg: &str, transcript: &mut Transcript) -> Result<Detection> {
        validate::volume_name("volume group", vg)?;
        let inspector = self.inspector();
        let lvs = match inspector.logical_volumes(vg) {
            Ok(lvs) => lvs,
            Err(error) => {
                warn!("could not list logical volumes of {vg}: {error}");
                transcript.note(format!("logical volumes of {vg} unavailable: {error}"));
                Vec::new()
            }
        };

        let backend = inspect::classify_backend(&lvs);
        let thin_pool = lvs
            .iter()
            .find(|lv| lv.is_thin_pool())
            .map(|lv| lv.name.clone());
        let snapshots = inspect::select_snapshots(&lvs, vg);
        let volume_group = inspector.volume_group(vg)?;

        transcript.note(format!(
            "thin pool detected: {}",
            thin_pool.as_deref().unwrap_or("no")
        ));
        match volume_group.as_ref().and_then(|info| info.free) {
            Some(free) => transcript.note(format!("{vg} has {free:.2}G free")),
            None => transcript.note(format!("free space of {vg} unknown")),
        }
        self.warn_nearly_full(&snapshots, transcript);

        Ok(Detection {
            volume_group,
            backend,
            thin_pool,
            snapshots,
        })
    }

    pub fn list_snapshots(
        &self,
        vg: &str,
        transcript: &mut Transcript,
    ) -> Result<Vec<SnapshotInfo>> {
        let snapshots = self.inspector().list_snapshots(vg)?;
        self.warn_nearly_full(&snapshots, transcript);
        Ok(snapshots)
    }

    pub fn status(&self) -> Result<String> {
        self.inspector().status()
    }

    fn check_capacity(
        &self,
        vg: &str,
        sizes: &BTreeMap<Role, SnapshotSize>,
        transcript: &mut Transcript,
    ) -> Result<()> {
        match capacity::plan(sizes, self.inspector().free_space(vg)) {
            CapacityVerdict::Sufficient { requested, free } => {
                transcript.note(format!("{requested:.2}G requested, {free:.2}G free in {vg}"));
            }
            CapacityVerdict::Unverified { requested } => {
                transcript.note(format!(
                    "free space of {vg} unknown; not verifying {requested:.2}G"
                ));
            }
            CapacityVerdict::Insufficient {
                requested,
                free,
                shortfall,
            } => {
                if !self.options.allow_insufficient {
                    return Err(RollbackError::InsufficientCapacity {
                        requested,
                        free,
                        shortfall,
                    });
                }
                warn!("{vg} is short by {shortfall:.2}G, continuing as requested");
                transcript.note(format!(
                    "proceeding although {vg} is short by {shortfall:.2}G ({requested:.2}G requested, {free:.2}G free)"
                ));
            }
        }
        Ok(())
    }

    fn snapshot_invocation(
        vg: &str,
        origin: &str,
        name: &str,
        size: &SnapshotSize,
        backend: SnapshotBackend,
    ) -> Invocation {
        let create = Invocation::mutation("lvcreate").args(["-s", "-n", name]);
        let create = match backend {
            SnapshotBackend::Thin => create.args(["--setactivationskip", "n"]),
            SnapshotBackend::Classic => create.arg("-L").arg(size.to_lvm_arg()),
        };
        create.arg(format!("{vg}/{origin}"))
    }

    /// Create the members of a set in role order. The first failure stops
    /// the remaining roles and is reported per role.
    pub fn create_set(
        &self,
        request: &SetRequest,
        transcript: &mut Transcript,
    ) -> Result<SnapshotSet> {
        let vg = request.vg.as_str();
        validate::volume_name("volume group", vg)?;
        validate::stamp(&request.stamp)?;

        let mut planned = Vec::new();
        for role in Role::ALL {
            let Some(size) = request.sizes.get(&role).filter(|size| !size.is_zero()) else {
                continue;
            };
            let origin = self.options.origin(role);
            validate::volume_name("logical volume", origin)?;
            validate::size_argument(&size.to_lvm_arg())?;
            planned.push((role, origin, role.snapshot_name(&request.stamp), size));
        }

        let mut set = SnapshotSet::new(vg, request.stamp.clone());
        if planned.is_empty() {
            transcript.skipped(
                format!("create snapshot set {}", request.stamp),
                "every requested size is zero",
            );
            return Ok(set);
        }

        let backend = self.inspector().detect_backend(vg);
        transcript.note(format!("creating {} snapshots in {vg}", backend.label()));
        if backend == SnapshotBackend::Classic {
            self.check_capacity(vg, &request.sizes, transcript)?;
        }

        let mut members = Vec::new();
        let mut failed = false;
        for (role, origin, name, size) in planned {
            if failed {
                members.push((role, MemberOutcome::NotAttempted(name)));
                continue;
            }
            let create = Self::snapshot_invocation(vg, origin, &name, size, backend);
            let diagnostic = match self.exec.execute(&create) {
                Ok(output) if output.success() => None,
                Ok(output) => Some(output.diagnostic()),
                Err(error) => Some(error.to_string()),
            };
            match diagnostic {
                None => {
                    transcript.done(create.render());
                    set.members.insert(role, name.clone());
                    members.push((role, MemberOutcome::Created(name)));
                }
                Some(diagnostic) => {
                    transcript.failed(create.render(), diagnostic.clone());
                    members.push((role, MemberOutcome::Failed { name, diagnostic }));
                    failed = true;
                }
            }
        }

        if failed {
            let rolled_back = if self.options.rollback_on_failure {
                self.remove_members(&set, transcript)
            } else {
                if !set.is_empty() {
                    transcript.note("created snapshots kept; remove them with delete");
                }
                Vec::new()
            };
            return Err(RollbackError::PartialCreateFailure(Box::new(PartialCreate {
                members,
                rolled_back,
            })));
        }

        if let Some(root) = set.member(Role::Root) {
            self.probe_mount(vg, root, transcript);
        }
        Ok(set)
    }

    // Compensating removal after a partial create; returns what was removed.
    fn remove_members(&self, set: &SnapshotSet, transcript: &mut Transcript) -> Vec<String> {
        let mut removed = Vec::new();
        for name in set.members.values() {
            let remove = Invocation::mutation("lvremove")
                .arg("-y")
                .arg(format!("{}/{name}", set.vg));
            match self.run(&remove) {
                Ok(()) => {
                    transcript.done(remove.render());
                    removed.push(name.clone());
                }
                Err(reason) => transcript.failed(remove.render(), reason),
            }
        }
        removed
    }

    fn run(&self, invocation: &Invocation) -> std::result::Result<(), String> {
        match self.exec.execute(invocation) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(output.diagnostic()),
            Err(error) => Err(error.to_string()),
        }
    }

    /// Mount the root snapshot read-only once to prove it is usable. XFS
    /// needs `nouuid` next to its origin, other filesystems `noload`; the
    /// other option is tried second. Failure is only recorded.
    fn probe_mount(&self, vg: &str, snapshot: &str, transcript: &mut Transcript) {
        let device = format!("/dev/{vg}/{snapshot}");
        let mountpoint = format!(
            "{}/{snapshot}",
            self.options.mount_base.trim_end_matches('/')
        );

        let blkid = Invocation::query("blkid").args(["-o", "value", "-s", "TYPE", device.as_str()]);
        let fstype = match self.exec.execute(&blkid) {
            Ok(output) if output.success() => output.stdout.trim().to_string(),
            _ => String::new(),
        };
        let options = if fstype == "xfs" {
            ["nouuid", "noload"]
        } else {
            ["noload", "nouuid"]
        };

        let mkdir = Invocation::mutation("mkdir").args(["-p", mountpoint.as_str()]);
        if let Err(reason) = self.run(&mkdir) {
            warn!("mount probe of {snapshot} skipped: {reason}");
            transcript.note(format!("mount probe of {snapshot} skipped: {reason}"));
            return;
        }

        let mut last_error = String::new();
        let mut mounted = None;
        for option in options {
            let mount = Invocation::mutation("mount")
                .arg("-o")
                .arg(format!("ro,{option}"))
                .args([device.as_str(), mountpoint.as_str()]);
            match self.run(&mount) {
                Ok(()) => {
                    mounted = Some(option);
                    break;
                }
                Err(reason) => {
                    debug!("mount -o ro,{option} of {snapshot} failed: {reason}");
                    last_error = reason;
                }
            }
        }

        match mounted {
            Some(option) => {
                transcript.note(format!("mounted {snapshot} read-only with {option}"));
                let umount = Invocation::mutation("umount").arg(mountpoint.as_str());
                if let Err(reason) = self.run(&umount) {
                    warn!("could not unmount {mountpoint}: {reason}");
                    transcript.note(format!("{mountpoint} left mounted: {reason}"));
                    return;
                }
            }
            None => {
                warn!("mount probe of {snapshot} failed: {last_error}");
                transcript.note(format!("could not test-mount {snapshot}: {last_error}"));
            }
        }

        let rmdir = Invocation::mutation("rmdir").arg(mountpoint.as_str());
        if let Err(reason) = self.run(&rmdir) {
            debug!("could not remove {mountpoint}: {reason}");
        }
    }

    fn kernel_release(&self) -> Result<String> {
        let uname = Invocation::query("uname").arg("-r");
        let release = self
            .exec
            .execute(&uname)?
            .require("read kernel release", &uname)?
            .stdout
            .trim()
            .to_string();
        validate::kernel_option(&release)?;
        Ok(release)
    }

    fn current_cmdline(&self) -> Result<String> {
        let cat = Invocation::query("cat").arg("/proc/cmdline");
        Ok(self
            .exec
            .execute(&cat)?
            .require("read kernel command line", &cat)?
            .stdout
            .trim()
            .to_string())
    }

    /// Register a boot entry for the set's root snapshot. Snapshots are
    /// never touched, whatever the outcome.
    pub fn add_boot_entry(
        &self,
        vg: &str,
        stamp: &Stamp,
        kernel_version: Option<&str>,
        transcript: &mut Transcript,
    ) -> Result<CreatedEntry> {
        validate::volume_name("volume group", vg)?;
        validate::stamp(stamp)?;
        let root = Role::Root.snapshot_name(stamp);
        if !self.inspector().lv_exists(vg, &root)? {
            return Err(RollbackError::SnapshotMissing(format!("{vg}/{root}")));
        }

        let version = match kernel_version {
            Some(version) => {
                validate::kernel_option(version)?;
                version.to_string()
            }
            None => self.kernel_release()?,
        };
        let policy = &self.options.option_policy;
        let current = if policy.use_current {
            self.current_cmdline()?
        } else {
            String::new()
        };
        let options = sanitize_options(&current, policy);

        let boot = self.boot();
        if boot.ensure_boot_writable()? {
            transcript.done("mount -o remount,rw /boot");
        }

        let spec = EntrySpec::for_kernel(
            format!("Rollback: {stamp} (root snapshot)"),
            &version,
            format!("{vg}/{root}"),
            options,
        );
        let created = boot.create_entry(&spec)?;
        if let Some(profile) = &created.profile {
            transcript.note(format!("entry bound to OS profile {profile}"));
        }
        transcript.done(format!(
            "boom entry create --root-lv {} (boot id {})",
            spec.root_lv,
            created.id.as_deref().unwrap_or("unknown")
        ));
        Ok(created)
    }

    /// Schedule merges of the set: var and home first, root last. Missing
    /// members are skipped. Returns the number of merges issued.
    pub fn merge(&self, vg: &str, stamp: &Stamp, transcript: &mut Transcript) -> Result<usize> {
        validate::volume_name("volume group", vg)?;
        validate::stamp(stamp)?;
        let inspector = self.inspector();

        let mut merged = 0;
        for role in [Role::Var, Role::Home, Role::Root] {
            let target = format!("{vg}/{}", role.snapshot_name(stamp));
            let convert = Invocation::mutation("lvconvert").args(["--merge", target.as_str()]);
            if !inspector.lv_exists(vg, &role.snapshot_name(stamp))? {
                transcript.skipped(convert.render(), "snapshot does not exist");
                continue;
            }
            self.exec
                .execute(&convert)?
                .require("merge snapshot", &convert)?;
            transcript.done(convert.render());
            merged += 1;
        }

        let flag = &self.options.merge_safety_flag;
        let action = format!("grubby --update-kernel=DEFAULT --args={flag}");
        if merged == 0 {
            transcript.skipped(action, "nothing to merge");
            return Ok(0);
        }
        match self.boot().ensure_next_boot_option(flag)? {
            FlagOutcome::Added => transcript.done(action),
            FlagOutcome::AlreadyPresent => transcript.skipped(action, "already present"),
        }
        transcript.note("reboot to complete the root merge");
        Ok(merged)
    }

    /// Remove boot entries pointing at convention-named snapshots of `vg`,
    /// then the snapshots themselves. Per-item failures are recorded and
    /// the loop carries on. A snapshot whose boot entry could not be
    /// removed is kept; when the entries cannot be listed at all, no
    /// snapshot is removed.
    pub fn delete(&self, vg: &str, scope: &DeleteScope, transcript: &mut Transcript) -> Result<()> {
        validate::volume_name("volume group", vg)?;
        if let DeleteScope::Stamp(stamp) = scope {
            validate::stamp(stamp)?;
        }

        let mut referenced = BTreeSet::new();
        if self.exec.tool_available(BOOT_TOOL) {
            let boot = self.boot();
            let entries = match boot.list_entries() {
                Ok(entries) => entries,
                Err(error) => {
                    transcript.failed("list boot entries", error.to_string());
                    transcript.skipped(
                        format!("remove snapshots in {vg}"),
                        "boot entries could not be listed",
                    );
                    return Ok(());
                }
            };
            for entry in entries {
                let Some((entry_vg, lv)) = entry.root_lv_parts() else {
                    continue;
                };
                if entry_vg != vg || !scope.covers(lv) {
                    continue;
                }
                let action = format!("boom entry delete {} ({vg}/{lv})", entry.id);
                match boot.delete_entry(&entry.id) {
                    Ok(()) => transcript.done(action),
                    Err(error) => {
                        transcript.failed(action, error.to_string());
                        referenced.insert(lv.to_string());
                    }
                }
            }
        } else {
            transcript.skipped("remove boot entries", "boom is not installed");
        }

        for snapshot in self.inspector().list_snapshots(vg)? {
            if !scope.covers(&snapshot.name) {
                continue;
            }
            let remove = Invocation::mutation("lvremove")
                .arg("-y")
                .arg(snapshot.display_name());
            if referenced.contains(&snapshot.name) {
                transcript.skipped(remove.render(), "boot entry still references it");
                continue;
            }
            match self.run(&remove) {
                Ok(()) => transcript.done(remove.render()),
                Err(reason) => transcript.failed(remove.render(), reason),
            }
        }
        Ok(())
    }

    /// Greatest stamp among convention-named snapshots of `vg`
    pub fn latest_stamp(&self, vg: &str) -> Result<Option<Stamp>> {
        Ok(self
            .inspector()
            .list_snapshots(vg)?
            .iter()
            .filter_map(|snapshot| parse_snapshot_name(&snapshot.name))
            .map(|(_, stamp)| Stamp::new(stamp))
            .max())
    }

    /// Members and observed state of the set at `stamp`.
    pub fn inspect_set(&self, vg: &str, stamp: &Stamp) -> Result<SetView> {
        validate::stamp(stamp)?;
        let snapshots = self.inspector().list_snapshots(vg)?;
        let set = SnapshotSet::from_names(
            vg,
            stamp,
            snapshots.iter().map(|snapshot| snapshot.name.as_str()),
        );
        if set.is_empty() {
            return Ok(SetView {
                set,
                state: SetState::Planned,
                boot_entries: Vec::new(),
            });
        }

        let boot_entries: Vec<BootEntry> = match set.root_lv_ref() {
            Some(root) if self.exec.tool_available(BOOT_TOOL) => self
                .boot()
                .list_entries()?
                .into_iter()
                .filter(|entry| entry.root_lv.as_deref() == Some(root.as_str()))
                .collect(),
            _ => Vec::new(),
        };
        let merging = snapshots.iter().any(|snapshot| {
            snapshot.merging && set.members.values().any(|name| *name == snapshot.name)
        });
        let state = if merging {
            SetState::MergeScheduled
        } else if boot_entries.is_empty() {
            SetState::Created
        } else {
            SetState::BootRegistered
        };
        Ok(SetView {
            set,
            state,
            boot_entries,
        })
    }

    /// Install the boot-entry and partition-growth tools when missing.
    pub fn install_tools(&self, transcript: &mut Transcript) -> Result<()> {
        let tools = [
            (BOOT_TOOL, self.options.boot_tool_package.as_str()),
            (GROWPART, self.options.growpart_package.as_str()),
        ];
        for (tool, package) in tools {
            if self.exec.tool_available(tool) {
                transcript.skipped(
                    format!("install {package}"),
                    format!("{tool} already available"),
                );
                continue;
            }
            self.options
                .package_manager
                .install(self.exec, package, transcript)?;
        }
        Ok(())
    }
}
