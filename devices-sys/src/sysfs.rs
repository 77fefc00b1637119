// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use devices_types::DevNum;

/// Reader for the host's sysfs tree. The root is configurable so tests can
/// point it at a fixture directory.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Sysfs { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn devno_dir(&self, devno: DevNum) -> PathBuf {
        self.root
            .join("dev/block")
            .join(format!("{}:{}", devno.major, devno.minor))
    }

    fn read_trimmed(&self, path: &Path) -> Option<String> {
        let value = fs::read_to_string(path).ok()?;
        let value = value.trim_end_matches(['\n', '\r']).trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Read `/sys/dev/block/M:m/<suffix>` for a device; if the attribute is
    /// missing or empty and the device is a partition, retry on its primary
    /// device.
    pub fn read_block_attr(
        &self,
        devno: DevNum,
        primary: Option<DevNum>,
        suffix: &str,
    ) -> Option<String> {
        if let Some(value) = self.read_trimmed(&self.devno_dir(devno).join(suffix)) {
            return Some(value);
        }

        let primary = primary?;
        let value = self.read_trimmed(&self.devno_dir(primary).join(suffix))?;
        tracing::debug!(%devno, %primary, suffix, "using primary device attribute for partition");
        Some(value)
    }

    /// Read `/sys/block/<name>/<suffix>` where `name` is a kernel block
    /// device name such as `sda` or `dm-1`.
    pub fn read_named_attr(&self, name: &str, suffix: &str) -> Option<String> {
        self.read_trimmed(&self.root.join("block").join(name).join(suffix))
    }

    /// Resolve a devno to its kernel block name via the `/sys/dev/block`
    /// symlink.
    pub fn block_name_of(&self, devno: DevNum) -> Option<String> {
        let link = fs::read_link(self.devno_dir(devno)).ok()?;
        let name = link.file_name()?.to_str()?;
        Some(name.to_string())
    }

    pub fn holders_dir(&self, name: &str) -> PathBuf {
        self.root.join("block").join(name).join("holders")
    }

    pub fn slaves_dir(&self, devno: DevNum) -> PathBuf {
        self.devno_dir(devno).join("slaves")
    }
}

/// Test whether a DM UUID carries the given prefix. A kpartx-partitioned dm
/// device prepends `partN-` to the parent's uuid, e.g. `part1-mpath-abc`,
/// so the prefix is also checked after the first dash in that case.
pub fn dm_uuid_has_prefix(uuid: &str, prefix: &str) -> bool {
    if uuid.starts_with(prefix) {
        return true;
    }
    if let Some(rest) = uuid.strip_prefix("part") {
        if let Some((_, after_dash)) = rest.split_once('-') {
            return after_dash.starts_with(prefix);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_attr(root: &Path, devno: DevNum, suffix: &str, value: &str) {
        let path = root
            .join("dev/block")
            .join(format!("{}:{}", devno.major, devno.minor))
            .join(suffix);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{value}\n")).unwrap();
    }

    #[test]
    fn reads_and_trims_block_attributes() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        write_attr(dir.path(), DevNum::new(8, 0), "device/wwid", "naa.5000c500  ");

        let value = sysfs.read_block_attr(DevNum::new(8, 0), None, "device/wwid");
        assert_eq!(value.as_deref(), Some("naa.5000c500"));
        assert_eq!(sysfs.read_block_attr(DevNum::new(8, 0), None, "wwid"), None);
    }

    #[test]
    fn partition_falls_back_to_primary() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        write_attr(dir.path(), DevNum::new(8, 0), "device/serial", "SER123");

        let value = sysfs.read_block_attr(
            DevNum::new(8, 1),
            Some(DevNum::new(8, 0)),
            "device/serial",
        );
        assert_eq!(value.as_deref(), Some("SER123"));
    }

    #[test]
    fn dm_uuid_prefix_handles_kpartx_partitions() {
        assert!(dm_uuid_has_prefix("mpath-3600a0b80", "mpath-"));
        assert!(dm_uuid_has_prefix("part1-mpath-3600a0b80", "mpath-"));
        assert!(!dm_uuid_has_prefix("part1-CRYPT-LUKS1", "mpath-"));
        assert!(!dm_uuid_has_prefix("LVM-abcdef", "mpath-"));
        assert!(dm_uuid_has_prefix("part3-LVM-abcdef", "LVM-"));
    }
}
