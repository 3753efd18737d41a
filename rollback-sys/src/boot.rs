// SPDX-License-Identifier: GPL-3.0-only

//! Boot-loader entry management through `boom` and `grubby`

use rollback_types::{BootEntry, EntrySpec, OptionPolicy, OsProfile, ProfileTemplate};
use tracing::{debug, info, warn};

use crate::error::{Result, RollbackError};
use crate::exec::{CommandExecutor, CommandOutput, Invocation};
use crate::report::{self, BOOM_ENTRY_FIELDS};
use crate::validate;

/// Keys that tie a command line to a particular root volume
const STORAGE_IDENTITY_KEYS: [&str; 4] = ["root=", "rootflags=", "rd.lvm.lv=", "rd.lvm.vg="];
const MODE_FLAGS: [&str; 2] = ["ro", "rw"];
const READ_ONLY: &str = "ro";

fn is_conflicting(token: &str) -> bool {
    MODE_FLAGS.contains(&token) || STORAGE_IDENTITY_KEYS.iter().any(|key| token.starts_with(key))
}

/// Build the option string of a rollback entry.
///
/// With `use_current` the running command line is the starting point;
/// `strip_conflicting` drops root-identity tokens and mode flags. `ro` is
/// prepended when no mode flag is left, then extras are appended unless
/// already present. Applying the result again yields the same string.
pub fn sanitize_options(current_cmdline: &str, policy: &OptionPolicy) -> String {
    let mut tokens: Vec<&str> = if policy.use_current {
        current_cmdline.split_whitespace().collect()
    } else {
        Vec::new()
    };
    if policy.strip_conflicting {
        tokens.retain(|token| !is_conflicting(token));
    }
    if !tokens.iter().any(|token| MODE_FLAGS.contains(token)) {
        tokens.insert(0, READ_ONLY);
    }
    for extra in &policy.extra {
        if !tokens.contains(&extra.as_str()) {
            tokens.push(extra);
        }
    }
    tokens.join(" ")
}

/// Whether a failed `boom entry create` asks for an OS profile
fn profile_required(diagnostic: &str) -> bool {
    let lower = diagnostic.to_lowercase();
    lower.contains("profile")
        && ["no matching", "could not find", "not found", "required", "no osprofile"]
            .iter()
            .any(|marker| lower.contains(marker))
}

/// Result of [`BootEntryManager::create_entry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEntry {
    /// Boot id, when the tool reported one or the entry could be found
    pub id: Option<String>,
    /// Profile the entry was bound to on the retry path
    pub profile: Option<String>,
}

/// Outcome of ensuring a next-boot kernel option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    AlreadyPresent,
    Added,
}

pub struct BootEntryManager<'a> {
    exec: &'a dyn CommandExecutor,
    template: ProfileTemplate,
}

impl<'a> BootEntryManager<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, template: ProfileTemplate) -> Self {
        Self { exec, template }
    }

    fn profile_filters(&self) -> [String; 4] {
        [
            "--short-name".to_string(),
            self.template.short_name.clone(),
            "--os-version-id".to_string(),
            self.template.os_version_id.clone(),
        ]
    }

    /// Profile matching this OS, if the boot subsystem knows one.
    pub fn resolve_profile(&self) -> Result<Option<OsProfile>> {
        let structured = Invocation::query("boom")
            .args(["profile", "list", "--json"])
            .args(self.profile_filters());
        let output = self.exec.execute(&structured)?;
        if output.success() && !output.stdout.trim().is_empty() {
            if let Some(profile) = report::parse_profiles_json(&output.stdout)?
                .into_iter()
                .next()
            {
                debug!("resolved OS profile {} from structured listing", profile.id);
                return Ok(Some(profile));
            }
        } else {
            debug!("structured profile listing unavailable: {}", output.diagnostic());
        }

        let rows = Invocation::query("boom")
            .args(["profile", "list"])
            .args(self.profile_filters());
        let output = self.exec.execute(&rows)?;
        if !output.success() {
            debug!("profile listing failed: {}", output.diagnostic());
            return Ok(None);
        }
        let profile = report::parse_profile_rows(&output.stdout).into_iter().next();
        if let Some(profile) = &profile {
            debug!("resolved OS profile {} from row listing", profile.id);
        }
        Ok(profile)
    }

    /// Resolve the OS profile, creating a minimal one when none exists.
    pub fn ensure_profile(&self) -> Result<String> {
        if let Some(profile) = self.resolve_profile()? {
            return Ok(profile.id);
        }

        let template = &self.template;
        info!("creating OS profile for {} {}", template.name, template.os_version);
        let create = Invocation::mutation("boom")
            .args(["profile", "create"])
            .args(["--name", template.name.as_str()])
            .args(["--short-name", template.short_name.as_str()])
            .args(["--os-version", template.os_version.as_str()])
            .args(["--os-version-id", template.os_version_id.as_str()])
            .args(["--uname-pattern", template.uname_pattern.as_str()])
            .args(["--kernel-pattern", template.kernel_pattern.as_str()])
            .args(["--initramfs-pattern", template.initramfs_pattern.as_str()]);
        let output = self
            .exec
            .execute(&create)?
            .require("create OS profile", &create)?;

        self.resolve_profile()?
            .map(|profile| profile.id)
            .ok_or_else(|| RollbackError::ProfileMissing(output.diagnostic()))
    }

    fn entry_invocation(spec: &EntrySpec, profile: Option<&str>) -> Invocation {
        let mut invocation = Invocation::mutation("boom")
            .args(["entry", "create"])
            .args(["--title", spec.title.as_str()])
            .args(["--version", spec.version.as_str()])
            .args(["--linux", spec.kernel_path.as_str()])
            .args(["--initrd", spec.initrd_path.as_str()])
            .args(["--root-lv", spec.root_lv.as_str()]);
        if !spec.options.is_empty() {
            invocation = invocation.args(["--add-opts", spec.options.as_str()]);
        }
        if let Some(profile) = profile {
            invocation = invocation.args(["--profile", profile]);
        }
        invocation
    }

    /// Create a boot entry. Without a profile first; if the tool demands
    /// one, ensure it and retry exactly once.
    pub fn create_entry(&self, spec: &EntrySpec) -> Result<CreatedEntry> {
        let (vg, lv) = spec
            .root_lv
            .split_once('/')
            .ok_or_else(|| RollbackError::InvalidName {
                kind: "root LV reference",
                value: spec.root_lv.clone(),
            })?;
        validate::volume_name("volume group", vg)?;
        validate::volume_name("logical volume", lv)?;
        for token in spec.options.split_whitespace() {
            validate::kernel_option(token)?;
        }

        let first = Self::entry_invocation(spec, None);
        let output = self.exec.execute(&first)?;
        if output.success() {
            return Ok(CreatedEntry {
                id: self.created_id(&output, spec),
                profile: None,
            });
        }

        let diagnostic = output.diagnostic();
        if !profile_required(&diagnostic) {
            return Err(RollbackError::StepFailed {
                step: "create boot entry",
                command: first.render(),
                diagnostic,
            });
        }

        warn!("boot entry needs an OS profile: {diagnostic}");
        let profile = self.ensure_profile()?;
        let retry = Self::entry_invocation(spec, Some(&profile));
        let output = self
            .exec
            .execute(&retry)?
            .require("create boot entry", &retry)?;
        Ok(CreatedEntry {
            id: self.created_id(&output, spec),
            profile: Some(profile),
        })
    }

    fn created_id(&self, output: &CommandOutput, spec: &EntrySpec) -> Option<String> {
        if let Some(id) = report::parse_created_boot_id(&output.stdout) {
            return Some(id);
        }
        match self.list_entries() {
            Ok(entries) => entries
                .into_iter()
                .find(|entry| {
                    entry.root_lv.as_deref() == Some(spec.root_lv.as_str())
                        && entry.title == spec.title
                })
                .map(|entry| entry.id),
            Err(error) => {
                warn!("could not look up created boot entry: {error}");
                None
            }
        }
    }

    pub fn list_entries(&self) -> Result<Vec<BootEntry>> {
        let invocation = Invocation::query("boom")
            .args(["entry", "list", "--noheadings", "--separator", "\t"])
            .args(["-o", BOOM_ENTRY_FIELDS]);
        let output = self
            .exec
            .execute(&invocation)?
            .require("list boot entries", &invocation)?;
        Ok(report::parse_boom_entries(&output.stdout))
    }

    /// Delete one entry. Callers deleting in bulk record the error and
    /// carry on.
    pub fn delete_entry(&self, id: &str) -> Result<()> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RollbackError::InvalidName {
                kind: "boot id",
                value: id.to_string(),
            });
        }
        let invocation = Invocation::mutation("boom").args(["entry", "delete", id]);
        self.exec
            .execute(&invocation)?
            .require("delete boot entry", &invocation)?;
        Ok(())
    }

    /// Remount `/boot` read-write when it is a separate read-only mount.
    /// Returns whether a remount happened.
    pub fn ensure_boot_writable(&self) -> Result<bool> {
        let probe = Invocation::query("findmnt").args(["-n", "-o", "OPTIONS", "/boot"]);
        let output = self.exec.execute(&probe)?;
        if !output.success() {
            debug!("/boot is not a separate mount");
            return Ok(false);
        }
        let read_only = output
            .stdout
            .trim()
            .split(',')
            .any(|option| option == READ_ONLY);
        if !read_only {
            return Ok(false);
        }
        let remount = Invocation::mutation("mount").args(["-o", "remount,rw", "/boot"]);
        self.exec
            .execute(&remount)?
            .require("remount /boot read-write", &remount)?;
        Ok(true)
    }

    /// Ensure the default kernel's next-boot arguments contain `flag` once.
    pub fn ensure_next_boot_option(&self, flag: &str) -> Result<FlagOutcome> {
        validate::kernel_option(flag)?;
        let info = Invocation::query("grubby").arg("--info=DEFAULT");
        let output = self
            .exec
            .execute(&info)?
            .require("read default kernel arguments", &info)?;
        let args = report::parse_grubby_args(&output.stdout).ok_or_else(|| {
            RollbackError::StructuredOutputParse {
                source_name: "grubby --info",
                reason: "no args= line".to_string(),
            }
        })?;
        if args.iter().any(|arg| arg == flag) {
            return Ok(FlagOutcome::AlreadyPresent);
        }
        let update = Invocation::mutation("grubby")
            .arg("--update-kernel=DEFAULT")
            .arg(format!("--args={flag}"));
        self.exec
            .execute(&update)?
            .require("add next-boot kernel option", &update)?;
        Ok(FlagOutcome::Added)
    }
}
