// SPDX-License-Identifier: GPL-3.0-only

//! Parsers for tool reports
//!
//! Each known output shape has its own parser producing the normalized
//! types from `rollback-types`. Structured (JSON) reports that do not match
//! a known shape are hard errors; row reports skip lines they cannot read.

use std::sync::LazyLock;

use regex::Regex;
use rollback_types::{
    BootEntry, FreeRegion, LogicalVolumeInfo, OsProfile, PhysicalVolumeInfo, VolumeGroupInfo,
};
use serde::Deserialize;

use crate::error::{Result, RollbackError};

/// Field list for the structured LV report
pub const LVS_FIELDS: &str = "vg_name,lv_name,lv_attr,origin,lv_size,data_percent,lv_merging";
/// Field list for VG rows, tab separated
pub const VGS_FIELDS: &str = "vg_name,vg_size,vg_free";
/// Field list for PV rows, tab separated
pub const PVS_FIELDS: &str = "pv_name,vg_name,pv_size,pv_free";
/// Field list for boot entry rows, tab separated; title last
pub const BOOM_ENTRY_FIELDS: &str = "bootid,rootlv,title";

fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

/// Gigabyte figure from `--units g` output: `2.00`, `2.00g`, `<19.50g`.
pub fn parse_gigabytes(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_start_matches('<');
    let number = trimmed
        .strip_suffix('g')
        .or_else(|| trimmed.strip_suffix('G'))
        .unwrap_or(trimmed);
    number.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_percent(text: &str) -> Option<f64> {
    text.trim().trim_end_matches('%').parse::<f64>().ok()
}

#[derive(Debug, Deserialize)]
struct LvsDocument {
    report: Vec<LvsSection>,
}

#[derive(Debug, Deserialize)]
struct LvsSection {
    #[serde(default)]
    lv: Vec<LvRecord>,
}

#[derive(Debug, Deserialize)]
struct LvRecord {
    vg_name: String,
    lv_name: String,
    #[serde(default)]
    lv_attr: String,
    #[serde(default)]
    origin: String,
    #[serde(default)]
    lv_size: String,
    #[serde(default)]
    data_percent: String,
    /// `merging` while a merge into the origin is pending, else empty
    #[serde(default)]
    lv_merging: String,
}

impl From<LvRecord> for LogicalVolumeInfo {
    fn from(record: LvRecord) -> Self {
        let origin = record.origin.trim();
        Self {
            vg_name: record.vg_name,
            name: record.lv_name,
            attr: record.lv_attr.trim().to_string(),
            origin: (!origin.is_empty()).then(|| origin.to_string()),
            size: parse_gigabytes(&record.lv_size),
            data_percent: parse_percent(&record.data_percent),
            merging: !record.lv_merging.trim().is_empty(),
        }
    }
}

/// Parse `lvs --reportformat json`. Empty output is "no data".
pub fn parse_lvs_json(output: &str) -> Result<Vec<LogicalVolumeInfo>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let document: LvsDocument =
        serde_json::from_str(output).map_err(|error| RollbackError::StructuredOutputParse {
            source_name: "lvs",
            reason: error.to_string(),
        })?;
    Ok(document
        .report
        .into_iter()
        .flat_map(|section| section.lv)
        .map(LogicalVolumeInfo::from)
        .collect())
}

/// Parse tab-separated `vgs` rows in [`VGS_FIELDS`] order.
pub fn parse_vgs(output: &str) -> Vec<VolumeGroupInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let cols = parse_tabbed_line(line);
            if cols.len() < 3 {
                return None;
            }
            Some(VolumeGroupInfo {
                name: cols[0].clone(),
                size: parse_gigabytes(&cols[1]),
                free: parse_gigabytes(&cols[2]),
            })
        })
        .collect()
}

/// Parse tab-separated `pvs` rows in [`PVS_FIELDS`] order.
pub fn parse_pvs(output: &str) -> Vec<PhysicalVolumeInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let cols = parse_tabbed_line(line);
            if cols.len() < 4 {
                return None;
            }
            let vg_name = if cols[1].is_empty() {
                None
            } else {
                Some(cols[1].clone())
            };

            Some(PhysicalVolumeInfo {
                device: cols[0].clone(),
                vg_name,
                size: parse_gigabytes(&cols[2]),
                free: parse_gigabytes(&cols[3]),
            })
        })
        .collect()
}

/// Row of `parted -m ... unit MiB print free`
#[derive(Debug, Clone, PartialEq)]
pub enum PartedRow {
    Partition(u32),
    Free(FreeRegion),
}

fn parse_mib(text: &str) -> Option<f64> {
    text.trim().trim_end_matches("MiB").parse::<f64>().ok()
}

/// Parse machine-readable parted output. The `BYT;` header and the disk
/// line are skipped; free rows carry a `free` label.
pub fn parse_parted(output: &str) -> Vec<PartedRow> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(';');
            let cols: Vec<&str> = line.split(':').collect();
            if cols.len() < 5 {
                return None;
            }
            let number: u32 = cols[0].trim().parse().ok()?;
            let is_free = cols[4..]
                .iter()
                .any(|label| label.trim().eq_ignore_ascii_case("free"));
            if !is_free {
                return Some(PartedRow::Partition(number));
            }
            Some(PartedRow::Free(FreeRegion {
                start_mib: parse_mib(cols[1])?,
                end_mib: parse_mib(cols[2])?,
                size_mib: parse_mib(cols[3])?,
            }))
        })
        .collect()
}

pub fn free_regions(rows: &[PartedRow]) -> Vec<FreeRegion> {
    rows.iter()
        .filter_map(|row| match row {
            PartedRow::Free(region) => Some(*region),
            PartedRow::Partition(_) => None,
        })
        .collect()
}

pub fn partition_numbers(rows: &[PartedRow]) -> Vec<u32> {
    rows.iter()
        .filter_map(|row| match row {
            PartedRow::Partition(number) => Some(*number),
            PartedRow::Free(_) => None,
        })
        .collect()
}

/// Parse tab-separated boot entry rows in [`BOOM_ENTRY_FIELDS`] order.
pub fn parse_boom_entries(output: &str) -> Vec<BootEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let mut cols = line.splitn(3, '\t').map(str::trim);
            let id = cols.next()?.to_string();
            if id.is_empty() {
                return None;
            }
            let root_lv = cols
                .next()
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            let title = cols.next().unwrap_or_default().to_string();
            Some(BootEntry { id, root_lv, title })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileRecord {
    #[serde(alias = "os_id", alias = "osid", alias = "OsID", alias = "profile_os_id")]
    id: String,
    #[serde(default, alias = "os_name", alias = "Name", alias = "profile_os_name")]
    name: Option<String>,
}

/// Known shapes of the structured profile listing
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfileReport {
    Plural {
        #[serde(alias = "Profiles")]
        profiles: OneOrMany<ProfileRecord>,
    },
    Singular {
        #[serde(alias = "Profile")]
        profile: OneOrMany<ProfileRecord>,
    },
}

/// Parse the JSON profile listing. Empty output yields no profiles.
pub fn parse_profiles_json(output: &str) -> Result<Vec<OsProfile>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let report: ProfileReport =
        serde_json::from_str(output).map_err(|error| RollbackError::StructuredOutputParse {
            source_name: "boom profile list",
            reason: error.to_string(),
        })?;
    let records = match report {
        ProfileReport::Plural { profiles } => profiles.into_vec(),
        ProfileReport::Singular { profile } => profile.into_vec(),
    };
    Ok(records
        .into_iter()
        .filter(|record| !record.id.trim().is_empty())
        .map(|record| OsProfile {
            id: record.id.trim().to_string(),
            name: record.name,
        })
        .collect())
}

static OS_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bos_?id\b[\s:=(]+([0-9a-f]{6,})\b").expect("valid OsID pattern")
});

/// Extract profile ids from the row listing, either `OsID <hex>` pairs or a
/// table whose first column is headed `OsID`.
pub fn parse_profile_rows(output: &str) -> Vec<OsProfile> {
    let mut ids: Vec<String> = OS_ID_PATTERN
        .captures_iter(output)
        .map(|caps| caps[1].to_lowercase())
        .collect();

    let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());
    let headed = lines
        .next()
        .and_then(|header| header.split_whitespace().next())
        .is_some_and(|first| first.eq_ignore_ascii_case("osid"));
    if headed {
        for line in lines {
            let mut cols = line.split_whitespace();
            if let Some(first) = cols.next() {
                if first.len() >= 6 && first.chars().all(|c| c.is_ascii_hexdigit()) {
                    ids.push(first.to_lowercase());
                }
            }
        }
    }

    let mut seen = Vec::new();
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen.into_iter()
        .map(|id| OsProfile { id, name: None })
        .collect()
}

static BOOT_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)boot_?id[\s:=]+([0-9a-f]{6,})").expect("valid boot id pattern")
});

/// Boot id printed by `boom entry create`, e.g. `Created entry with boot_id 1a2b3c4:`
pub fn parse_created_boot_id(output: &str) -> Option<String> {
    BOOT_ID_PATTERN
        .captures(output)
        .map(|caps| caps[1].to_lowercase())
}

/// Kernel arguments of the default entry from `grubby --info=DEFAULT`.
pub fn parse_grubby_args(output: &str) -> Option<Vec<String>> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("args=")?;
        let value = value.trim().trim_matches('"');
        Some(value.split_whitespace().map(str::to_string).collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LVS_JSON: &str = r#"{
      "report": [
        {
          "lv": [
            {"vg_name":"rl", "lv_name":"snap-pre-1", "lv_attr":"swi-a-tz--", "origin":"root", "lv_size":"20.00", "data_percent":"4.12"},
            {"vg_name":"rl", "lv_name":"pool00", "lv_attr":"twi-aotz--", "origin":"", "lv_size":"<60.00", "data_percent":"12.00"},
            {"vg_name":"rl", "lv_name":"root", "lv_attr":"owi-aos---", "origin":"", "lv_size":"40.00", "data_percent":""}
          ]
        }
      ]
    }"#;

    #[test]
    fn parses_structured_lv_report() {
        let lvs = parse_lvs_json(LVS_JSON).unwrap();
        assert_eq!(lvs.len(), 3);
        assert_eq!(lvs[0].origin.as_deref(), Some("root"));
        assert_eq!(lvs[0].data_percent, Some(4.12));
        assert_eq!(lvs[1].size, Some(60.0));
        assert_eq!(lvs[2].origin, None);
        assert_eq!(lvs[2].data_percent, None);
        assert!(lvs.iter().all(|lv| !lv.merging));
    }

    #[test]
    fn empty_lv_report_is_no_data() {
        assert!(parse_lvs_json("").unwrap().is_empty());
        assert!(parse_lvs_json(r#"{"report":[]}"#).unwrap().is_empty());
        assert!(parse_lvs_json(r#"{"report":[{}]}"#).unwrap().is_empty());
    }

    #[test]
    fn malformed_lv_report_is_parse_error() {
        assert!(matches!(
            parse_lvs_json("{\"report\": [ {\"lv\": [ {\"vg_name\": "),
            Err(RollbackError::StructuredOutputParse { .. })
        ));
        assert!(matches!(
            parse_lvs_json(r#"{"volumes": []}"#),
            Err(RollbackError::StructuredOutputParse { .. })
        ));
    }

    #[test]
    fn parses_gigabyte_figures() {
        assert_eq!(parse_gigabytes("  2.00"), Some(2.0));
        assert_eq!(parse_gigabytes("2.00g"), Some(2.0));
        assert_eq!(parse_gigabytes("<19.50g"), Some(19.5));
        assert_eq!(parse_gigabytes(""), None);
        assert_eq!(parse_gigabytes("2.00t"), None);
    }

    #[test]
    fn parses_lvm_rows() {
        let vgs = parse_vgs("  rl\t99.00\t12.50\n");
        let pvs = parse_pvs("  /dev/sda3\trl\t99.00\t12.50\n  /dev/sdb\t\t10.00\t10.00\n");

        assert_eq!(vgs.len(), 1);
        assert_eq!(vgs[0].free, Some(12.5));
        assert_eq!(pvs.len(), 2);
        assert_eq!(pvs[0].vg_name.as_deref(), Some("rl"));
        assert!(!pvs[1].is_assigned());
    }

    #[test]
    fn parses_parted_free_regions() {
        let output = "BYT;\n\
            /dev/sda:51200MiB:scsi:512:512:gpt:ATA Disk:;\n\
            1:0.02MiB:1.00MiB:0.98MiB:free;\n\
            1:1.00MiB:1025MiB:1024MiB:xfs::;\n\
            2:1025MiB:30720MiB:29695MiB:::lvm;\n\
            1:30720MiB:51200MiB:20480MiB:free;\n";
        let rows = parse_parted(output);
        assert_eq!(partition_numbers(&rows), vec![1, 2]);
        let free = free_regions(&rows);
        assert_eq!(free.len(), 2);
        assert_eq!(free[1].start_mib, 30720.0);
        assert_eq!(free[1].size_mib, 20480.0);
    }

    #[test]
    fn parses_boot_entry_rows() {
        let entries = parse_boom_entries(
            "1a2b3c4\trl/snap-pre-2025\tRollback: 2025 (root snapshot)\n\
             9f8e7d6\t\tRocky Linux\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].root_lv.as_deref(), Some("rl/snap-pre-2025"));
        assert_eq!(entries[0].title, "Rollback: 2025 (root snapshot)");
        assert_eq!(entries[1].root_lv, None);
    }

    #[test]
    fn parses_profile_json_shapes() {
        let plural = parse_profiles_json(r#"{"profiles":[{"os_id":"3fc389b","os_name":"Rocky"}]}"#)
            .unwrap();
        assert_eq!(plural[0].id, "3fc389b");
        assert_eq!(plural[0].name.as_deref(), Some("Rocky"));

        let singular = parse_profiles_json(r#"{"profile":{"OsID":"abcdef1"}}"#).unwrap();
        assert_eq!(singular[0].id, "abcdef1");

        assert!(parse_profiles_json(r#"{"Profiles":[]}"#).unwrap().is_empty());
        assert!(parse_profiles_json("").unwrap().is_empty());
    }

    #[test]
    fn unknown_profile_shape_is_parse_error() {
        assert!(matches!(
            parse_profiles_json(r#"{"entries":[]}"#),
            Err(RollbackError::StructuredOutputParse { .. })
        ));
    }

    #[test]
    fn extracts_profile_ids_from_rows() {
        let table = "OsID    Name                     OsVersion\n\
                     3fc389b Rocky Linux              10.0\n";
        assert_eq!(parse_profile_rows(table)[0].id, "3fc389b");

        let pairs = "OS Profile (OsID 3fc389b)\n  Name: Rocky Linux\n";
        assert_eq!(parse_profile_rows(pairs)[0].id, "3fc389b");

        assert!(parse_profile_rows("no profiles here").is_empty());
    }

    #[test]
    fn extracts_created_boot_id() {
        assert_eq!(
            parse_created_boot_id("Created entry with boot_id 1a2b3c4:\n  title Rollback"),
            Some("1a2b3c4".to_string())
        );
        assert_eq!(parse_created_boot_id("done"), None);
    }

    #[test]
    fn parses_grubby_args() {
        let info = "index=0\nkernel=\"/boot/vmlinuz-6.12\"\nargs=\"ro rd.lvm.lv=rl/root quiet\"\nroot=\"/dev/mapper/rl-root\"\n";
        assert_eq!(
            parse_grubby_args(info),
            Some(vec![
                "ro".to_string(),
                "rd.lvm.lv=rl/root".to_string(),
                "quiet".to_string()
            ])
        );
        assert_eq!(parse_grubby_args("index=0"), None);
    }
}
