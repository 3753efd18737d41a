// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rollback_sys::{DEFAULT_LOCK_PATH, DEFAULT_TIMEOUT, LifecycleOptions, PackageManager};
use rollback_types::{OptionPolicy, ProfileTemplate, Role, SnapshotSize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Read when `--config` is not given and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lvm-rollback.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Origin LV names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Volumes {
    pub root: String,
    pub var: String,
    pub home: String,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            root: "root".to_string(),
            var: "var".to_string(),
            home: "home".to_string(),
        }
    }
}

/// Snapshot sizes per role; `0G` leaves the role out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sizes {
    pub root: String,
    pub var: String,
    pub home: String,
}

impl Default for Sizes {
    fn default() -> Self {
        Self {
            root: "20G".to_string(),
            var: "10G".to_string(),
            home: "0G".to_string(),
        }
    }
}

/// Kernel options of rollback entries and the merge safety flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Boot {
    pub use_current: bool,
    pub strip_conflicting: bool,
    pub extra: Vec<String>,
    pub merge_safety_flag: String,
}

impl Default for Boot {
    fn default() -> Self {
        let policy = OptionPolicy::default();
        Self {
            use_current: policy.use_current,
            strip_conflicting: policy.strip_conflicting,
            extra: policy.extra,
            merge_safety_flag: "fsck.mode=force".to_string(),
        }
    }
}

impl Boot {
    pub fn option_policy(&self) -> OptionPolicy {
        OptionPolicy {
            use_current: self.use_current,
            strip_conflicting: self.strip_conflicting,
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Packages {
    pub manager: PackageManager,
    pub boot_tool: String,
    pub growpart: String,
}

impl Default for Packages {
    fn default() -> Self {
        Self {
            manager: PackageManager::Dnf,
            boot_tool: "boom-boot".to_string(),
            growpart: "cloud-utils-growpart".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub volume_group: String,
    pub volumes: Volumes,
    pub sizes: Sizes,
    pub boot: Boot,
    pub packages: Packages,
    pub mount_probe_base: String,
    pub command_timeout_secs: u64,
    pub usage_warning_percent: f64,
    pub lock_path: PathBuf,
    pub allow_insufficient: bool,
    pub rollback_on_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume_group: "rl".to_string(),
            volumes: Volumes::default(),
            sizes: Sizes::default(),
            boot: Boot::default(),
            packages: Packages::default(),
            mount_probe_base: "/mnt".to_string(),
            command_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            usage_warning_percent: 80.0,
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            allow_insufficient: false,
            rollback_on_failure: false,
        }
    }
}

impl Config {
    /// Load `path`, or the default location when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&raw).map_err(|error| match error {
            ParseFailure::Toml(source) => ConfigError::Parse { path, source },
            ParseFailure::Invalid(error) => error,
        })
    }

    fn parse(raw: &str) -> Result<Self, ParseFailure> {
        let config: Self = toml::from_str(raw).map_err(ParseFailure::Toml)?;
        config.check().map_err(ParseFailure::Invalid)?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "command_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.usage_warning_percent > 0.0 && self.usage_warning_percent <= 100.0) {
            return Err(ConfigError::Invalid {
                field: "usage_warning_percent",
                reason: format!("{} is outside 0..=100", self.usage_warning_percent),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn sizes(&self) -> BTreeMap<Role, SnapshotSize> {
        [
            (Role::Root, &self.sizes.root),
            (Role::Var, &self.sizes.var),
            (Role::Home, &self.sizes.home),
        ]
        .into_iter()
        .map(|(role, size)| (role, SnapshotSize::parse(size)))
        .collect()
    }

    pub fn lifecycle_options(&self, profile_template: ProfileTemplate) -> LifecycleOptions {
        LifecycleOptions {
            origins: [
                (Role::Root, self.volumes.root.clone()),
                (Role::Var, self.volumes.var.clone()),
                (Role::Home, self.volumes.home.clone()),
            ]
            .into_iter()
            .collect(),
            option_policy: self.boot.option_policy(),
            merge_safety_flag: self.boot.merge_safety_flag.clone(),
            mount_base: self.mount_probe_base.clone(),
            usage_warning_percent: self.usage_warning_percent,
            allow_insufficient: self.allow_insufficient,
            rollback_on_failure: self.rollback_on_failure,
            package_manager: self.packages.manager,
            boot_tool_package: self.packages.boot_tool.clone(),
            growpart_package: self.packages.growpart.clone(),
            profile_template,
        }
    }
}

#[derive(Debug)]
enum ParseFailure {
    Toml(toml::de::Error),
    Invalid(ConfigError),
}
