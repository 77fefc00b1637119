// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Scope of the renamed-device search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Never read devices looking for a lost PVID.
    None,
    /// Read only devices that would themselves fall back to a devname
    /// identity; skip devices with a stable identity.
    #[default]
    Auto,
    /// Read every candidate device, and search even when an alternate
    /// devices file is in use.
    All,
}

/// Where the multipath detector may look beyond sysfs and the wwids file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalInfoSource {
    #[default]
    None,
    Udev,
}

pub const SYSTEM_DEVICES_FILE: &str = "system.devices";

/// Registry configuration. Every path the subsystem touches is a field so
/// tests can redirect the whole tree into a scratch directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for the devices file.
    pub enable_devices_file: bool,
    /// Alternate file name under `<system_dir>/devices/`. Using one disables
    /// the system-file-only optimisations such as the search sentinel.
    pub devicesfile: Option<String>,
    pub search_for_devnames: SearchMode,
    /// Permit LV-backed identities (`LVM-` DM UUIDs).
    pub scan_lvs: bool,
    /// Path of the multipath wwids file; empty string disables WWID-based
    /// multipath detection.
    pub multipath_wwids_file: String,
    pub external_device_info_source: ExternalInfoSource,
    pub system_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub run_dir: PathBuf,
    pub sysfs_dir: PathBuf,
    pub dev_dir: PathBuf,
    pub multipath_conf: PathBuf,
    pub multipath_conf_dir: PathBuf,
    pub system_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enable_devices_file: true,
            devicesfile: None,
            search_for_devnames: SearchMode::Auto,
            scan_lvs: false,
            multipath_wwids_file: "/etc/multipath/wwids".into(),
            external_device_info_source: ExternalInfoSource::None,
            system_dir: "/etc/lvm".into(),
            lock_dir: "/run/lock/lvm".into(),
            run_dir: "/run/lvm".into(),
            sysfs_dir: "/sys".into(),
            dev_dir: "/dev".into(),
            multipath_conf: "/etc/multipath.conf".into(),
            multipath_conf_dir: "/etc/multipath/conf.d".into(),
            system_id: None,
        }
    }
}

impl Config {
    pub fn devices_file_name(&self) -> &str {
        self.devicesfile.as_deref().unwrap_or(SYSTEM_DEVICES_FILE)
    }

    pub fn devices_dir(&self) -> PathBuf {
        self.system_dir.join("devices")
    }

    pub fn devices_file_path(&self) -> PathBuf {
        self.devices_dir().join(self.devices_file_name())
    }

    /// The advisory lock lives beside the lock directory, not the file, so
    /// read-only mounts of the system directory still lock.
    pub fn lockfile_path(&self) -> PathBuf {
        self.lock_dir.join(format!("D_{}", self.devices_file_name()))
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.run_dir.join("searched_devnames")
    }

    /// True when operating on the system devices file rather than an
    /// alternate one.
    pub fn uses_system_file(&self) -> bool {
        self.devicesfile.is_none()
    }

    pub fn with_root(root: &Path) -> Self {
        Config {
            system_dir: root.join("etc/lvm"),
            lock_dir: root.join("run/lock"),
            run_dir: root.join("run"),
            sysfs_dir: root.join("sys"),
            dev_dir: root.join("dev"),
            multipath_conf: root.join("etc/multipath.conf"),
            multipath_conf_dir: root.join("etc/multipath/conf.d"),
            multipath_wwids_file: root.join("etc/multipath/wwids").display().to_string(),
            ..Config::default()
        }
    }
}
