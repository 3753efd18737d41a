// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot set types
//!
//! A snapshot set groups the `root`, `var` and `home` snapshots taken at one
//! stamp. Membership is recovered purely from LV names.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical role of a volume inside a snapshot set.
///
/// The declaration order is the creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Root,
    Var,
    Home,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Root, Role::Var, Role::Home];

    pub fn name(self) -> &'static str {
        match self {
            Role::Root => "root",
            Role::Var => "var",
            Role::Home => "home",
        }
    }

    /// Name prefix of this role's snapshot LV. Root uses `snap-pre`.
    pub fn snapshot_prefix(self) -> &'static str {
        match self {
            Role::Root => "snap-pre",
            Role::Var => "var-pre",
            Role::Home => "home-pre",
        }
    }

    pub fn snapshot_name(self, stamp: &Stamp) -> String {
        format!("{}-{}", self.snapshot_prefix(), stamp.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Split a snapshot LV name into its role and stamp.
///
/// Returns `None` for names outside the `{prefix}-{stamp}` convention.
pub fn parse_snapshot_name(name: &str) -> Option<(Role, &str)> {
    Role::ALL.into_iter().find_map(|role| {
        let stamp = name
            .strip_prefix(role.snapshot_prefix())?
            .strip_prefix('-')?;
        (!stamp.is_empty()).then_some((role, stamp))
    })
}

/// Opaque, sortable token identifying one snapshot set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stamp(String);

impl Stamp {
    pub const FORMAT: &'static str = "%Y-%m-%d-%H%M";

    /// Wraps a token without validation; callers validate before use on a
    /// command line.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Stamp for the current local time
    pub fn now() -> Self {
        Self(chrono::Local::now().format(Self::FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requested snapshot size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotSize {
    /// Size expressed in gigabytes (`20G`, `1.5g`)
    Gigabytes(f64),
    /// Any other notation; handed to the volume manager verbatim but never
    /// counted in capacity checks
    Unverifiable(String),
}

impl SnapshotSize {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let number = trimmed
            .strip_suffix('G')
            .or_else(|| trimmed.strip_suffix('g'));
        match number.and_then(|n| n.trim().parse::<f64>().ok()) {
            Some(gigabytes) if gigabytes.is_finite() && gigabytes >= 0.0 => {
                SnapshotSize::Gigabytes(gigabytes)
            }
            _ => SnapshotSize::Unverifiable(trimmed.to_string()),
        }
    }

    /// Zero in any unit means the role is left out of the set.
    pub fn is_zero(&self) -> bool {
        match self {
            SnapshotSize::Gigabytes(gigabytes) => *gigabytes == 0.0,
            SnapshotSize::Unverifiable(text) => {
                let digits = text.trim_end_matches(|c: char| c.is_ascii_alphabetic());
                digits.parse::<f64>().is_ok_and(|value| value == 0.0)
            }
        }
    }

    pub fn gigabytes(&self) -> Option<f64> {
        match self {
            SnapshotSize::Gigabytes(gigabytes) => Some(*gigabytes),
            SnapshotSize::Unverifiable(_) => None,
        }
    }

    /// Argument for `lvcreate -L`
    pub fn to_lvm_arg(&self) -> String {
        match self {
            SnapshotSize::Gigabytes(gigabytes) => format!("{gigabytes}G"),
            SnapshotSize::Unverifiable(text) => text.clone(),
        }
    }
}

impl fmt::Display for SnapshotSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lvm_arg())
    }
}

/// Lifecycle state of a snapshot set as observed from live queries.
///
/// A deleted set has no members left and reads back as `Planned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetState {
    /// No member exists
    Planned,
    /// Members exist, no boot entry points at the root snapshot
    Created,
    /// A boot entry points at the root snapshot
    BootRegistered,
    /// A member is still merging into its origin; root completes on next boot
    MergeScheduled,
}

/// Snapshot set reconstructed from a VG's LV names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSet {
    pub vg: String,
    pub stamp: Stamp,
    /// Role to snapshot LV name; absent roles were not requested
    pub members: BTreeMap<Role, String>,
}

impl SnapshotSet {
    pub fn new(vg: impl Into<String>, stamp: Stamp) -> Self {
        Self {
            vg: vg.into(),
            stamp,
            members: BTreeMap::new(),
        }
    }

    /// Builds the set for `stamp` from a list of LV names in `vg`.
    pub fn from_names<'a>(
        vg: impl Into<String>,
        stamp: &Stamp,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut set = Self::new(vg, stamp.clone());
        for name in names {
            if let Some((role, found)) = parse_snapshot_name(name) {
                if found == stamp.as_str() {
                    set.members.insert(role, name.to_string());
                }
            }
        }
        set
    }

    pub fn member(&self, role: Role) -> Option<&str> {
        self.members.get(&role).map(String::as_str)
    }

    /// `vg/lv` reference of the root snapshot
    pub fn root_lv_ref(&self) -> Option<String> {
        self.member(Role::Root)
            .map(|name| format!("{}/{}", self.vg, name))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
