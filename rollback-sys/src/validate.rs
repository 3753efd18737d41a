// SPDX-License-Identifier: GPL-3.0-only

//! Allow-list checks for names that end up on a command line

use rollback_types::Stamp;

use crate::error::{Result, RollbackError};

fn invalid(kind: &'static str, value: &str) -> RollbackError {
    RollbackError::InvalidName {
        kind,
        value: value.to_string(),
    }
}

/// VG and LV names: `[A-Za-z0-9+_.-]`, not empty, no leading `-`.
pub fn volume_name(kind: &'static str, value: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-');
    if value.is_empty()
        || value.starts_with('-')
        || value == "."
        || value == ".."
        || !value.chars().all(allowed)
    {
        return Err(invalid(kind, value));
    }
    Ok(())
}

pub fn stamp(value: &Stamp) -> Result<()> {
    volume_name("stamp", value.as_str())
}

/// Block device paths under `/dev/`.
pub fn device_path(value: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '+' | '-');
    match value.strip_prefix("/dev/") {
        Some(rest)
            if !rest.is_empty()
                && !rest.starts_with('-')
                && !rest.split('/').any(|part| part == "..")
                && value.chars().all(allowed) =>
        {
            Ok(())
        }
        _ => Err(invalid("device path", value)),
    }
}

/// Snapshot size arguments such as `20G` or `512M`.
pub fn size_argument(value: &str) -> Result<()> {
    if value.is_empty()
        || !value.starts_with(|c: char| c.is_ascii_digit())
        || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
    {
        return Err(invalid("snapshot size", value));
    }
    Ok(())
}

/// Kernel command-line tokens: printable, no whitespace or quotes.
pub fn kernel_option(value: &str) -> Result<()> {
    if value.is_empty()
        || value.starts_with('-')
        || !value
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '"' | '\'' | '`' | '\\'))
    {
        return Err(invalid("kernel option", value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lvm_names() {
        assert!(volume_name("volume group", "rl").is_ok());
        assert!(volume_name("logical volume", "snap-pre-2025-01-02-0304").is_ok());
        assert!(volume_name("logical volume", "lv_home.v2+x").is_ok());
    }

    #[test]
    fn rejects_unsafe_names() {
        for bad in ["", "-rf", "a b", "rl;reboot", "$(id)", "..", "a/b"] {
            assert!(volume_name("volume group", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn validates_device_paths() {
        assert!(device_path("/dev/sda3").is_ok());
        assert!(device_path("/dev/nvme0n1p2").is_ok());
        assert!(device_path("/dev/mapper/rl-root").is_ok());
        assert!(device_path("/tmp/sda").is_err());
        assert!(device_path("/dev/").is_err());
        assert!(device_path("/dev/../etc/passwd").is_err());
        assert!(device_path("/dev/sda 3").is_err());
    }

    #[test]
    fn validates_sizes() {
        assert!(size_argument("20G").is_ok());
        assert!(size_argument("1.5G").is_ok());
        assert!(size_argument("512M").is_ok());
        assert!(size_argument("-L").is_err());
        assert!(size_argument("10G;x").is_err());
    }

    #[test]
    fn validates_kernel_options() {
        assert!(kernel_option("fsck.mode=force").is_ok());
        assert!(kernel_option("rd.lvm.lv=rl/root").is_ok());
        assert!(kernel_option("a b").is_err());
        assert!(kernel_option("x\"y").is_err());
    }
}
