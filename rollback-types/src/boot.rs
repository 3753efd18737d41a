// SPDX-License-Identifier: GPL-3.0-only

//! Boot-loader entry and OS profile types

use serde::{Deserialize, Serialize};

/// Boot entry as listed by the boot-entry tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEntry {
    /// Identifier assigned by the boot subsystem
    pub id: String,
    /// Referenced root LV in `vg/lv` form, if the entry boots from LVM
    pub root_lv: Option<String>,
    pub title: String,
}

impl BootEntry {
    /// Split `root_lv` into `(vg, lv)`
    pub fn root_lv_parts(&self) -> Option<(&str, &str)> {
        self.root_lv.as_deref()?.split_once('/')
    }
}

/// Everything needed to create one boot entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub title: String,
    /// Kernel release, e.g. `6.12.0-55.el10.x86_64`
    pub version: String,
    pub kernel_path: String,
    pub initrd_path: String,
    /// `vg/lv` of the root volume to boot
    pub root_lv: String,
    /// Kernel command-line options, space separated
    pub options: String,
}

impl EntrySpec {
    /// Entry booting the running kernel image layout `/vmlinuz-{ver}` with
    /// `/initramfs-{ver}.img`.
    pub fn for_kernel(
        title: impl Into<String>,
        version: &str,
        root_lv: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            version: version.to_string(),
            kernel_path: format!("/vmlinuz-{version}"),
            initrd_path: format!("/initramfs-{version}.img"),
            root_lv: root_lv.into(),
            options: options.into(),
        }
    }
}

/// OS profile known to the boot subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsProfile {
    pub id: String,
    pub name: Option<String>,
}

/// Fields for creating a minimal OS profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileTemplate {
    pub name: String,
    pub short_name: String,
    pub os_version: String,
    pub os_version_id: String,
    /// Matches kernel releases belonging to this OS, e.g. `el10`
    pub uname_pattern: String,
    pub kernel_pattern: String,
    pub initramfs_pattern: String,
}

impl ProfileTemplate {
    /// Build a template from `/etc/os-release` contents and the running
    /// kernel release.
    pub fn from_os_release(os_release: &str, kernel_release: &str) -> Self {
        let field = |key: &str| -> Option<String> {
            os_release.lines().find_map(|line| {
                let (k, v) = line.trim().split_once('=')?;
                (k == key).then(|| v.trim().trim_matches('"').to_string())
            })
        };

        let name = field("NAME").unwrap_or_else(|| "Linux".to_string());
        let short_name = field("ID").unwrap_or_else(|| "linux".to_string());
        let os_version_id = field("VERSION_ID").unwrap_or_else(|| "0".to_string());
        let os_version = field("VERSION").unwrap_or_else(|| os_version_id.clone());
        let uname_pattern = uname_pattern(kernel_release)
            .unwrap_or_else(|| format!("{short_name}{os_version_id}"));

        Self {
            name,
            short_name,
            os_version,
            os_version_id,
            uname_pattern,
            kernel_pattern: "/vmlinuz-%{version}".to_string(),
            initramfs_pattern: "/initramfs-%{version}.img".to_string(),
        }
    }
}

// Distribution tag inside a kernel release, e.g. `el10` in
// `6.12.0-55.el10.x86_64` or `fc41` in `6.11.4-301.fc41.x86_64`.
fn uname_pattern(kernel_release: &str) -> Option<String> {
    kernel_release
        .split(['.', '-', '_'])
        .find(|part| {
            let letters = part.trim_end_matches(|c: char| c.is_ascii_digit());
            !letters.is_empty()
                && letters.len() < part.len()
                && letters.chars().all(|c| c.is_ascii_lowercase())
                && !matches!(letters, "x" | "rc")
        })
        .map(str::to_string)
}

/// How the kernel command line of a rollback entry is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionPolicy {
    /// Start from the running kernel's command line
    pub use_current: bool,
    /// Drop root-identity keys and mode flags that would point the entry
    /// back at the origin volume
    pub strip_conflicting: bool,
    /// Tokens appended verbatim
    pub extra: Vec<String>,
}

impl Default for OptionPolicy {
    fn default() -> Self {
        Self {
            use_current: true,
            strip_conflicting: true,
            extra: Vec::new(),
        }
    }
}
