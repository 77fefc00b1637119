// SPDX-License-Identifier: GPL-3.0-only

//! Multipath component detection.
//!
//! A device that is a path member of a device-mapper multipath group must
//! not be treated as a first-class device. Three strategies are tried in
//! order: sysfs holders, membership in the multipath wwids file (pruned by
//! the multipath blacklist configuration), and udev properties supplied by
//! the external-info collaborator.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use devices_types::{DevNum, DevTypes, DeviceRecord};

use crate::sysfs::{dm_uuid_has_prefix, Sysfs};

const MPATH_PREFIX: &str = "mpath-";

/// Udev-property surface, consumed when `external_device_info_source` is
/// `udev`. Implemented by the collaborator that owns the udev context.
pub trait ExternalDeviceInfo {
    fn is_mpath_component(&self, dev: &DeviceRecord) -> bool;
}

#[derive(Debug)]
pub struct MpathDetector {
    sysfs: Sysfs,
    dev_dir: PathBuf,
    /// dm minor -> whether that dm device is a multipath group. Amortises
    /// repeated holder checks across a scan.
    minor_checked: HashMap<u32, bool>,
    /// Wwids from the multipath wwids file, minus blacklisted ones.
    /// `None` when wwid-based detection is disabled.
    wwid_set: Option<HashSet<String>>,
}

impl MpathDetector {
    pub fn new(sysfs: Sysfs, dev_dir: impl Into<PathBuf>) -> Self {
        MpathDetector {
            sysfs,
            dev_dir: dev_dir.into(),
            minor_checked: HashMap::new(),
            wwid_set: None,
        }
    }

    /// Load the multipath wwids file and prune it by the blacklist and
    /// blacklist_exceptions sections of the multipath configuration. An
    /// empty `wwids_file` disables wwid-based detection.
    pub fn load_wwids(&mut self, wwids_file: &str, conf: &Path, conf_dir: &Path) {
        if wwids_file.is_empty() {
            tracing::debug!("multipath wwids file disabled");
            return;
        }
        if !wwids_file.starts_with('/') {
            tracing::info!("ignoring unknown multipath_wwids_file");
            return;
        }

        let mut set = HashSet::new();
        let Ok(listing) = fs::read_to_string(wwids_file) else {
            tracing::debug!("multipath wwids file not found");
            return;
        };
        for line in listing.lines() {
            if let Some(wwid) = parse_wwids_line(line) {
                set.insert(wwid.to_string());
            }
        }
        tracing::debug!(count = set.len(), file = wwids_file, "multipath wwids read");

        let (ignored, exceptions) = read_blacklists(conf, conf_dir);
        let mut removed = 0;
        for wwid in ignored.difference(&exceptions) {
            if set.remove(wwid) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "multipath config ignored wwids");
        }

        self.wwid_set = Some(set);
    }

    /// Whether `dev` is a member of a multipath group.
    pub fn is_multipath_component(
        &mut self,
        dev: &DeviceRecord,
        types: &DevTypes,
        ext: Option<&dyn ExternalDeviceInfo>,
    ) -> bool {
        if self.component_holder(dev, types).is_some() {
            return true;
        }
        if self.in_wwid_set(dev) {
            return true;
        }
        if let Some(ext) = ext {
            if ext.is_mpath_component(dev) {
                return true;
            }
        }
        false
    }

    /// Sysfs-holders strategy: the devno of the multipath group holding
    /// `dev`, if there is one. Only SCSI and NVMe devices can be multipath
    /// members; partitions are checked through their primary device.
    pub fn component_holder(&mut self, dev: &DeviceRecord, types: &DevTypes) -> Option<DevNum> {
        if !types.is_scsi_major(dev.devno.major) && !dev.is_nvme {
            return None;
        }

        let name = if dev.part > 0 {
            let primary = dev.primary?;
            let name = self.sysfs.block_name_of(primary)?;
            tracing::debug!(
                dev = %dev.name,
                primary = %name,
                "partition, using primary device for mpath component detection"
            );
            name
        } else {
            dev.name.rsplit('/').next()?.to_string()
        };

        let holders = self.sysfs.holders_dir(&name);
        let entries = fs::read_dir(&holders).ok()?;

        for entry in entries.flatten() {
            let holder_name = entry.file_name();
            let Some(holder_name) = holder_name.to_str() else {
                continue;
            };

            let holder_path = self.dev_dir.join(holder_name);
            let Ok(meta) = fs::metadata(&holder_path) else {
                tracing::debug!(dev = %dev.name, holder = %holder_path.display(), "holder stat failed");
                continue;
            };
            let holder_devno = DevNum::from_rdev(meta.rdev());

            if holder_devno.major != types.device_mapper_major {
                continue;
            }

            if let Some(&known) = self.minor_checked.get(&holder_devno.minor) {
                if !known {
                    return None;
                }
                return Some(holder_devno);
            }

            let is_mpath = self
                .sysfs
                .read_named_attr(holder_name, "dm/uuid")
                .is_some_and(|uuid| dm_uuid_has_prefix(&uuid, MPATH_PREFIX));
            self.minor_checked.insert(holder_devno.minor, is_mpath);

            if is_mpath {
                tracing::debug!(dev = %dev.name, holder = holder_name, "ignore mpath component");
                return Some(holder_devno);
            }
        }

        None
    }

    /// Wwid-file strategy: the device's own WWID, stripped of its
    /// `<typestr>.` prefix, appears in the pruned wwids set.
    fn in_wwid_set(&self, dev: &DeviceRecord) -> bool {
        let Some(set) = &self.wwid_set else {
            return false;
        };

        let Some(sysbuf) = self
            .sysfs
            .read_block_attr(dev.devno, dev.primary, "device/wwid")
        else {
            return false;
        };

        // sysfs prints the wwid as <typestr>.<value>; the wwids file uses
        // '3'<value>, already stripped at load time
        let Some((_, wwid)) = sysbuf.split_once('.') else {
            return false;
        };

        if set.contains(wwid) {
            tracing::debug!(dev = %dev.name, wwid, "multipath wwid match");
            return true;
        }
        false
    }

    /// Representative WWID of a multipath group: the `device/wwid` of the
    /// first slave under `/sys/dev/block/M:m/slaves/`.
    pub fn group_wwid(&self, devno: DevNum) -> Option<String> {
        let slaves = self.sysfs.slaves_dir(devno);
        let mut names: Vec<String> = fs::read_dir(&slaves)
            .ok()?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();

        for slave in names {
            let Some(mut wwid) = self.sysfs.read_named_attr(&slave, "device/wwid") else {
                continue;
            };
            if wwid.contains("scsi_debug") {
                wwid = wwid.replace(' ', "_");
            }
            return Some(wwid);
        }
        None
    }
}

/// One line of the multipath wwids file: `/3<value>/`.
fn parse_wwids_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let rest = line.strip_prefix('/').unwrap_or(line);
    // the leading '3' is the SCSI type prefix, not part of the value
    let rest = rest.get(1..)?;
    let wwid = match rest.find('/') {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    if wwid.is_empty() {
        None
    } else {
        Some(wwid)
    }
}

/// Collect wwids from the `blacklist { }` and `blacklist_exceptions { }`
/// sections of the multipath configuration and its conf.d directory.
fn read_blacklists(conf: &Path, conf_dir: &Path) -> (HashSet<String>, HashSet<String>) {
    let mut ignored = HashSet::new();
    let mut exceptions = HashSet::new();

    read_blacklist_file(conf, &mut ignored, &mut exceptions);

    if let Ok(entries) = fs::read_dir(conf_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            read_blacklist_file(&entry.path(), &mut ignored, &mut exceptions);
        }
    }

    (ignored, exceptions)
}

fn read_blacklist_file(path: &Path, ignored: &mut HashSet<String>, exceptions: &mut HashSet<String>) {
    let Ok(text) = fs::read_to_string(path) else {
        return;
    };

    let mut in_black = false;
    let mut in_exceptions = false;

    for line in text.lines() {
        let word = line.trim_start();
        if word.is_empty() || word.starts_with('#') {
            continue;
        }

        if word.contains('{') {
            if word.starts_with("blacklist_exceptions") {
                in_exceptions = true;
            } else if word.starts_with("blacklist") {
                in_black = true;
            }
            continue;
        }
        if word.contains('}') {
            in_black = false;
            in_exceptions = false;
            continue;
        }
        if !in_black && !in_exceptions {
            continue;
        }

        let Some(pos) = word.find("wwid") else {
            continue;
        };
        let Some(wwid) = parse_blacklist_wwid(&word[pos + 4..]) else {
            continue;
        };

        tracing::debug!(
            %wwid,
            section = if in_exceptions { "blacklist_exceptions" } else { "blacklist" },
            file = %path.display(),
            "multipath wwid"
        );

        if in_exceptions {
            exceptions.insert(wwid);
        } else {
            ignored.insert(wwid);
        }
    }
}

/// A wwid value from a blacklist line: optionally quoted, with the leading
/// SCSI type-3 prefix stripped to match the wwids-file form. Values shorter
/// than eight characters are regexes or garbage, not wwids.
fn parse_blacklist_wwid(rest: &str) -> Option<String> {
    let mut value = String::new();
    let mut found_quote = false;
    let mut found_three = false;

    for c in rest.chars() {
        if c.is_whitespace() {
            if value.is_empty() {
                continue;
            }
            break;
        }
        if c == '"' {
            if found_quote {
                break;
            }
            found_quote = true;
            continue;
        }
        if c == '3' && !found_three {
            found_three = true;
            continue;
        }
        value.push(c);
    }

    if value.len() < 8 {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_attr(root: &Path, rel: &str, value: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{value}\n")).unwrap();
    }

    #[test]
    fn wwids_lines_strip_slashes_and_type_prefix() {
        assert_eq!(parse_wwids_line("/3600a0b80001234/"), Some("600a0b80001234"));
        assert_eq!(parse_wwids_line("3600a0b80005678"), Some("600a0b80005678"));
        assert_eq!(parse_wwids_line("# comment"), None);
        assert_eq!(parse_wwids_line(""), None);
    }

    #[test]
    fn blacklist_sections_and_quotes() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let conf = dir.path().join("multipath.conf");
        fs::write(
            &conf,
            concat!(
                "defaults {\n    user_friendly_names yes\n}\n",
                "blacklist {\n",
                "    wwid \"3600a0b8000aaaaaa\"\n",
                "    wwid 3600a0b8000bbbbbb\n",
                "    devnode \"^sdz\"\n",
                "}\n",
                "blacklist_exceptions {\n",
                "    wwid 3600a0b8000bbbbbb\n",
                "}\n",
            ),
        )
        .unwrap();

        let (ignored, exceptions) = read_blacklists(&conf, &dir.path().join("conf.d"));
        assert!(ignored.contains("600a0b8000aaaaaa"));
        assert!(ignored.contains("600a0b8000bbbbbb"));
        assert!(exceptions.contains("600a0b8000bbbbbb"));
    }

    #[test]
    fn exceptions_keep_wwids_in_the_set() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let wwids = dir.path().join("wwids");
        fs::write(&wwids, "/3600a0b8000aaaaaa/\n/3600a0b8000bbbbbb/\n").unwrap();
        let conf = dir.path().join("multipath.conf");
        fs::write(
            &conf,
            "blacklist {\n    wwid 3600a0b8000aaaaaa\n    wwid 3600a0b8000bbbbbb\n}\nblacklist_exceptions {\n    wwid 3600a0b8000bbbbbb\n}\n",
        )
        .unwrap();

        let mut detector = MpathDetector::new(Sysfs::new(dir.path()), dir.path().join("dev"));
        detector.load_wwids(
            wwids.to_str().unwrap(),
            &conf,
            &dir.path().join("conf.d"),
        );

        let set = detector.wwid_set.as_ref().expect("wwid set loaded");
        assert!(!set.contains("600a0b8000aaaaaa"));
        assert!(set.contains("600a0b8000bbbbbb"));
    }

    #[test]
    fn wwid_strategy_matches_after_typestr_strip() {
        let dir = tempfile::tempdir().expect("tmpdir");
        write_attr(dir.path(), "dev/block/8:0/device/wwid", "naa.600a0b8000cccccc");
        let wwids = dir.path().join("wwids");
        fs::write(&wwids, "/3600a0b8000cccccc/\n").unwrap();

        let mut detector = MpathDetector::new(Sysfs::new(dir.path()), dir.path().join("dev"));
        detector.load_wwids(
            wwids.to_str().unwrap(),
            &dir.path().join("none.conf"),
            &dir.path().join("conf.d"),
        );

        let dev = DeviceRecord::new("/dev/sda", DevNum::new(8, 0));
        let types = DevTypes::default();
        assert!(detector.is_multipath_component(&dev, &types, None));
    }

    #[test]
    fn holders_strategy_finds_mpath_group_and_memoises() {
        let dir = tempfile::tempdir().expect("tmpdir");
        // regular files stat with rdev 0, so a zero dm major routes the
        // fixture holder through the dm-uuid check
        let types = DevTypes {
            device_mapper_major: 0,
            ..DevTypes::default()
        };

        fs::create_dir_all(dir.path().join("sys/block/sda/holders")).unwrap();
        fs::write(dir.path().join("sys/block/sda/holders/dm-1"), "").unwrap();
        write_attr(dir.path(), "sys/block/dm-1/dm/uuid", "mpath-3600a0b80");
        fs::create_dir_all(dir.path().join("dev")).unwrap();
        fs::write(dir.path().join("dev/dm-1"), "").unwrap();

        let mut detector =
            MpathDetector::new(Sysfs::new(dir.path().join("sys")), dir.path().join("dev"));
        let dev = DeviceRecord::new("/dev/sda", DevNum::new(8, 0));

        assert!(detector.component_holder(&dev, &types).is_some());

        // memoised: the answer survives removal of the uuid attribute
        fs::remove_file(dir.path().join("sys/block/dm-1/dm/uuid")).unwrap();
        assert!(detector.component_holder(&dev, &types).is_some());
    }

    #[test]
    fn non_scsi_devices_are_never_components() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut detector =
            MpathDetector::new(Sysfs::new(dir.path()), dir.path().join("dev"));
        let types = DevTypes::default();

        let dev = DeviceRecord::new("/dev/dm-4", DevNum::new(253, 4));
        assert!(detector.component_holder(&dev, &types).is_none());
    }

    #[test]
    fn group_wwid_reads_the_first_slave() {
        let dir = tempfile::tempdir().expect("tmpdir");
        fs::create_dir_all(dir.path().join("dev/block/253:7/slaves")).unwrap();
        fs::write(dir.path().join("dev/block/253:7/slaves/sda"), "").unwrap();
        fs::write(dir.path().join("dev/block/253:7/slaves/sdb"), "").unwrap();
        write_attr(dir.path(), "block/sda/device/wwid", "naa.600a0b8000dddddd");

        let detector = MpathDetector::new(Sysfs::new(dir.path()), dir.path().join("dev"));
        assert_eq!(
            detector.group_wwid(DevNum::new(253, 7)).as_deref(),
            Some("naa.600a0b8000dddddd")
        );
    }
}
