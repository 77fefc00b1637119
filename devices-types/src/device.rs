// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::IdentityKind;
use crate::pvid::Pvid;

/// A block device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DevNum {
    pub major: u32,
    pub minor: u32,
}

impl DevNum {
    pub fn new(major: u32, minor: u32) -> Self {
        DevNum { major, minor }
    }

    /// Decode a `st_rdev` value using the Linux encoding.
    pub fn from_rdev(rdev: u64) -> Self {
        let major = (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0xfff)) as u32;
        let minor = (((rdev >> 12) & 0xffff_ff00) | (rdev & 0xff)) as u32;
        DevNum { major, minor }
    }
}

impl fmt::Display for DevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Index of a device record in the [`DeviceCache`].
pub type DeviceIndex = usize;

/// One cached identity read for a device. A `name` of `None` records that
/// the kind was checked and is not available on this device, so repeated
/// sysfs probes are avoided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub kind: IdentityKind,
    pub name: Option<String>,
}

/// One enumerated block device, as mirrored from the surrounding scan
/// pipeline. Partition index and primary device come from the enumerator;
/// `pvid`, the scan flags, and the filtered reason are filled in by label
/// scanning; the identity cache and matched flag belong to the registry.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub devno: DevNum,
    pub name: String,
    pub part: u32,
    pub primary: Option<DevNum>,
    pub ids: Vec<DeviceIdentity>,
    pub active_id: Option<usize>,
    pub matched: bool,
    pub pvid: Option<Pvid>,
    pub scanned: bool,
    pub scan_not_read: bool,
    pub filtered_reason: Option<String>,
    pub is_nvme: bool,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, devno: DevNum) -> Self {
        let name = name.into();
        let is_nvme = name
            .rsplit('/')
            .next()
            .is_some_and(|base| base.starts_with("nvme"));
        DeviceRecord {
            devno,
            name,
            part: 0,
            primary: None,
            ids: Vec::new(),
            active_id: None,
            matched: false,
            pvid: None,
            scanned: false,
            scan_not_read: false,
            filtered_reason: None,
            is_nvme,
        }
    }

    /// The identity cached for `kind`, if that kind was queried before.
    pub fn cached_identity(&self, kind: IdentityKind) -> Option<&DeviceIdentity> {
        self.ids.iter().find(|id| id.kind == kind)
    }

    /// Record a (possibly negative) identity read, replacing any previous
    /// cache entry for the same kind. Returns the entry's index.
    pub fn remember_identity(&mut self, kind: IdentityKind, name: Option<String>) -> usize {
        if let Some(pos) = self.ids.iter().position(|id| id.kind == kind) {
            self.ids[pos].name = name;
            return pos;
        }
        self.ids.push(DeviceIdentity { kind, name });
        self.ids.len() - 1
    }

    /// The identity currently pairing this device to a use-entry.
    pub fn active_identity(&self) -> Option<&DeviceIdentity> {
        self.active_id.and_then(|pos| self.ids.get(pos))
    }

    /// A stable kind was already read successfully for this device.
    pub fn has_stable_cached_id(&self) -> bool {
        self.ids
            .iter()
            .any(|id| id.kind.is_stable() && id.name.is_some())
    }

    /// Clear the pairing state set by the matcher.
    pub fn clear_match(&mut self) {
        self.matched = false;
        self.active_id = None;
    }
}

/// In-memory mirror of enumerated block devices. Populated by the
/// collaborator that scans `/dev`; the registry only reads and annotates it.
#[derive(Debug, Default)]
pub struct DeviceCache {
    devices: Vec<DeviceRecord>,
    by_name: HashMap<String, DeviceIndex>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: DeviceRecord) -> DeviceIndex {
        let index = self.devices.len();
        self.by_name.insert(record.name.clone(), index);
        self.devices.push(record);
        index
    }

    pub fn get(&self, index: DeviceIndex) -> &DeviceRecord {
        &self.devices[index]
    }

    pub fn get_mut(&mut self, index: DeviceIndex) -> &mut DeviceRecord {
        &mut self.devices[index]
    }

    pub fn lookup_name(&self, name: &str) -> Option<DeviceIndex> {
        self.by_name.get(name).copied()
    }

    pub fn lookup_devno(&self, devno: DevNum) -> Option<DeviceIndex> {
        self.devices.iter().position(|dev| dev.devno == devno)
    }

    pub fn indices(&self) -> impl Iterator<Item = DeviceIndex> {
        0..self.devices.len()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
