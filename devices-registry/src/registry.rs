// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use devices_sys::identity::{dm_uuid_kind, system_read};
use devices_sys::lock::LockAcquired;
use devices_sys::{FileLock, LockMode, SysError, Sysfs};
use devices_types::{
    Config, DevNum, DevTypes, DeviceCache, DeviceIndex, FileVersion, IdentityKind, Pvid, UseEntry,
};

use crate::error::{RegistryError, Result};

/// The process-scoped registry: the in-memory mirror of the devices file
/// plus its lock state. One value per command, passed through the call
/// graph; there is no global file state.
#[derive(Debug)]
pub struct Registry {
    pub entries: Vec<UseEntry>,
    /// `SYSTEMID` read from the file header.
    pub file_system_id: Option<String>,
    /// `VERSION` read from the file header, if it parsed.
    pub version: Option<FileVersion>,
    /// Raw text of the version header, for the textual staleness check.
    pub(crate) version_raw: Option<String>,
    /// A VERSION line was present but unparseable; writes are refused.
    pub(crate) version_line_bad: bool,
    /// The devices file exists and was loaded; the identity filter is live.
    pub enabled: bool,
    /// A creation operation may write a brand-new file (implicit-creation
    /// rule) if the scan sees no existing PVs.
    pub pending_create: bool,
    /// In-memory state differs from the file.
    pub dirty: bool,
    /// Configured from an explicit device list instead of a file; pairing
    /// is by name only and nothing is persisted.
    pub(crate) from_list: bool,
    pub(crate) path: PathBuf,
    lock: FileLock,
    pub(crate) config: Config,
    pub(crate) command_name: String,
}

impl Registry {
    pub fn new(config: Config, command_name: impl Into<String>) -> Self {
        let path = config.devices_file_path();
        let lock = FileLock::new(config.lockfile_path());
        Registry {
            entries: Vec::new(),
            file_system_id: None,
            version: None,
            version_raw: None,
            version_line_bad: false,
            enabled: false,
            pending_create: false,
            dirty: false,
            from_list: false,
            path,
            lock,
            config,
            command_name: command_name.into(),
        }
    }

    /// Configure from an explicit list of device paths instead of a file.
    pub fn from_device_list(
        config: Config,
        command_name: impl Into<String>,
        devnames: &[String],
    ) -> Self {
        let mut registry = Registry::new(config, command_name);
        registry.from_list = true;
        registry.enabled = true;
        for devname in devnames {
            registry.entries.push(UseEntry {
                idtype: None,
                idname: None,
                devname: Some(devname.clone()),
                pvid: None,
                part: 0,
                dev: None,
            });
        }
        registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_exists(&self) -> bool {
        self.path.exists()
    }

    /// Create an empty devices file. The devices directory must exist.
    pub fn touch_file(&self) -> Result<()> {
        let dir = self.config.devices_dir();
        if !dir.exists() {
            return Err(RegistryError::FileMissing { path: dir });
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Mark that the running command may create the file from scratch
    /// (first-PV creation operations only).
    pub fn begin_create(&mut self) {
        self.pending_create = true;
    }

    // --- locking ---------------------------------------------------------

    pub fn lock(&mut self, mode: LockMode) -> Result<LockAcquired> {
        self.lock_inner(mode, false)
    }

    pub fn lock_try(&mut self, mode: LockMode) -> Result<LockAcquired> {
        self.lock_inner(mode, true)
    }

    fn lock_inner(&mut self, mode: LockMode, nonblock: bool) -> Result<LockAcquired> {
        if !self.config.enable_devices_file {
            return Ok(LockAcquired { already_held: true });
        }
        match self.lock.lock(mode, nonblock) {
            Ok(acquired) => Ok(acquired),
            Err(SysError::LockBusy(path)) => Err(RegistryError::LockBusy { path }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn unlock(&mut self) {
        self.lock.unlock();
    }

    // --- sentinel --------------------------------------------------------

    /// The rename-search sentinel applies to the system devices file only.
    pub fn sentinel_exists(&self) -> bool {
        self.config.uses_system_file() && self.config.sentinel_path().exists()
    }

    pub fn touch_sentinel(&self) {
        if !self.config.uses_system_file() {
            return;
        }
        let path = self.config.sentinel_path();
        if let Err(err) = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            tracing::debug!(path = %path.display(), "cannot touch search sentinel: {err}");
        }
    }

    pub fn unlink_sentinel(&self) {
        if !self.config.uses_system_file() {
            return;
        }
        let path = self.config.sentinel_path();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "unlinked search sentinel"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::debug!(path = %path.display(), "unlink sentinel: {err}"),
        }
    }

    // --- lookups ---------------------------------------------------------

    pub fn entry_for_device(&self, dev: DeviceIndex) -> Option<usize> {
        self.entries.iter().position(|entry| entry.dev == Some(dev))
    }

    pub fn entry_for_devno(&self, cache: &DeviceCache, devno: DevNum) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry
                .dev
                .is_some_and(|dev| cache.get(dev).devno == devno)
        })
    }

    pub fn entry_for_pvid(&self, pvid: &Pvid) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.pvid.as_ref() == Some(pvid))
    }

    pub fn entry_for_devname(&self, devname: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.devname.as_deref() == Some(devname))
    }

    pub fn entry_for_identity(&self, kind: IdentityKind, idname: &str) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.idtype == Some(kind) && entry.idname.as_deref() == Some(idname)
        })
    }

    /// Any entry relies on the unstable devname kind.
    pub fn uses_devname_ids(&self) -> bool {
        self.entries.iter().any(UseEntry::is_devname_kind)
    }

    // --- operations ------------------------------------------------------

    /// Add or update the entry for a device.
    ///
    /// Chooses the identity kind by the selection policy, caches the
    /// identity on the device record, analyses overlap with existing
    /// entries, and either updates the entry that truly refers to this
    /// device or appends a new one. A duplicate-PVID collision with a
    /// different device is refused with [`RegistryError::IdentityConflict`]
    /// unless `opts.yes` is set.
    pub fn add_device(
        &mut self,
        cache: &mut DeviceCache,
        sysfs: &Sysfs,
        types: &DevTypes,
        dev_index: DeviceIndex,
        pvid: Option<Pvid>,
        opts: &AddOptions,
    ) -> Result<()> {
        if !self.config.enable_devices_file && !self.pending_create {
            return Ok(());
        }

        let (kind, idname) = {
            let dev = cache.get(dev_index);
            choose_identity(sysfs, types, dev, opts)
        };

        {
            let dev = cache.get_mut(dev_index);
            let pos = dev.remember_identity(kind, Some(idname.clone()));
            dev.active_id = Some(pos);
            dev.matched = true;
        }

        let (devname, part, primary) = {
            let dev = cache.get(dev_index);
            (dev.name.clone(), dev.part, dev.primary)
        };

        let du_dev = self.entry_for_device(dev_index);
        let du_pvid = pvid.as_ref().and_then(|id| self.entry_for_pvid(id));
        let du_devid = self.entry_for_identity(kind, &idname);

        if let Some(i) = du_pvid {
            if self.entries[i].dev != Some(dev_index) {
                let holder = self.entries[i]
                    .dev
                    .map(|d| cache.get(d).name.clone())
                    .unwrap_or_else(|| "missing device".to_string());
                tracing::warn!(
                    dev = %devname,
                    pvid = %pvid.as_ref().map(Pvid::to_string).unwrap_or_default(),
                    holder = %holder,
                    "adding device with PVID already used for another entry"
                );
            }
        }

        if let Some(i) = du_devid {
            if self.entries[i].dev != Some(dev_index) {
                match self.entries[i].dev {
                    None => tracing::warn!(
                        dev = %devname,
                        idname = %idname,
                        "adding device with idname already used for missing device"
                    ),
                    Some(other) => {
                        let other_dev = cache.get(other);
                        // separate entries for partitions of one disk are fine
                        let same_primary = part > 0
                            && other_dev.part > 0
                            && primary.is_some()
                            && primary == other_dev.primary;
                        if same_primary {
                            tracing::debug!(
                                dev = %devname,
                                part,
                                other = %other_dev.name,
                                other_part = other_dev.part,
                                "separate entries for partitions of same device"
                            );
                        } else {
                            tracing::warn!(
                                dev = %devname,
                                idname = %idname,
                                other = %other_dev.name,
                                "adding device with idname already used for another device"
                            );
                        }
                    }
                }
            }
        }

        // pick the existing entry that is truly for this device, if any
        let update_target = if let Some(i) = du_dev {
            Some(i)
        } else if let Some(i) = du_pvid {
            let check_idname = if self.entries[i].idtype == Some(kind) {
                Some(idname.clone())
            } else {
                self.entries[i]
                    .idtype
                    .and_then(|other_kind| system_read(sysfs, cache.get(dev_index), other_kind))
            };

            if check_idname.is_some() && check_idname.as_deref() == self.entries[i].idname.as_deref()
            {
                Some(i)
            } else if !opts.yes {
                // two devices carry the same PVID; require confirmation
                // before listing both
                cache.get_mut(dev_index).clear_match();
                return Err(RegistryError::IdentityConflict {
                    devname,
                    reason: format!(
                        "PVID {} is already listed for another device",
                        pvid.as_ref().map(Pvid::to_string).unwrap_or_default()
                    ),
                });
            } else {
                None
            }
        } else {
            du_devid.filter(|&i| self.entries[i].dev == Some(dev_index))
        };

        let entry = match update_target {
            Some(i) => {
                tracing::debug!(dev = %devname, "updating existing devices file entry");
                &mut self.entries[i]
            }
            None => {
                tracing::debug!(
                    dev = %devname,
                    kind = %kind,
                    idname = %idname,
                    "adding new devices file entry"
                );
                self.entries.push(UseEntry::default());
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        };

        entry.idtype = Some(kind);
        entry.idname = Some(idname);
        entry.devname = Some(devname);
        entry.pvid = pvid;
        entry.part = part;
        entry.dev = Some(dev_index);

        self.dirty = true;
        self.unlink_sentinel();
        Ok(())
    }

    /// Remove the entry whose last-known device name is `devname`.
    pub fn remove_by_devname(&mut self, cache: &mut DeviceCache, devname: &str) -> Result<()> {
        let index = self
            .entry_for_devname(devname)
            .or_else(|| {
                self.entries.iter().position(|entry| {
                    entry.is_devname_kind() && entry.idname.as_deref() == Some(devname)
                })
            })
            .ok_or_else(|| RegistryError::EntryNotFound {
                what: devname.to_string(),
            })?;
        self.remove_at(cache, index);
        Ok(())
    }

    /// Remove the entry with the given identity.
    pub fn remove_by_identity(
        &mut self,
        cache: &mut DeviceCache,
        kind: IdentityKind,
        idname: &str,
    ) -> Result<()> {
        let index = self
            .entry_for_identity(kind, idname)
            .ok_or_else(|| RegistryError::EntryNotFound {
                what: format!("{kind} {idname}"),
            })?;
        self.remove_at(cache, index);
        Ok(())
    }

    fn remove_at(&mut self, cache: &mut DeviceCache, index: usize) {
        let entry = self.entries.remove(index);
        if let Some(dev) = entry.dev {
            cache.get_mut(dev).clear_match();
        }
        self.dirty = true;
        self.unlink_sentinel();
    }

    /// Blank the PVID of the entry matched to `dev` (the device stops being
    /// a PV but stays listed).
    pub fn clear_pvid(&mut self, cache: &DeviceCache, dev: DeviceIndex) {
        if !self.enabled {
            return;
        }
        match self.entry_for_device(dev) {
            Some(index) => {
                if self.entries[index].pvid.take().is_some() {
                    self.dirty = true;
                }
            }
            None => {
                tracing::warn!(dev = %cache.get(dev).name, "devices to use does not include device");
            }
        }
    }
}

/// Options for [`Registry::add_device`].
#[derive(Debug, Default)]
pub struct AddOptions {
    /// Caller-supplied kind, overriding the selection policy.
    pub idtype: Option<IdentityKind>,
    /// Caller-supplied identity name; only honoured together with `idtype`.
    pub idname: Option<String>,
    /// Accept identity conflicts without confirmation.
    pub yes: bool,
}

/// The identity-kind selection policy for a device being added.
fn choose_identity(
    sysfs: &Sysfs,
    types: &DevTypes,
    dev: &devices_types::DeviceRecord,
    opts: &AddOptions,
) -> (IdentityKind, String) {
    if let Some(kind) = opts.idtype {
        if let Some(name) = &opts.idname {
            return (kind, name.clone());
        }
        if let Some(name) = system_read(sysfs, dev, kind) {
            return (kind, name);
        }
        tracing::warn!(
            dev = %dev.name,
            kind = %kind,
            "ignoring requested identity kind not available for device"
        );
    }

    if dev.devno.major == types.device_mapper_major {
        if let Some((kind, name)) = dm_uuid_kind(sysfs, dev) {
            return (kind, name);
        }
    }

    if dev.devno.major == types.loop_major {
        if let Some(name) = system_read(sysfs, dev, IdentityKind::LoopFile) {
            return (IdentityKind::LoopFile, name);
        }
        return devname_identity(dev);
    }

    if dev.devno.major == types.md_major {
        if let Some(name) = system_read(sysfs, dev, IdentityKind::MdUuid) {
            return (IdentityKind::MdUuid, name);
        }
        return devname_identity(dev);
    }

    if let Some(name) = system_read(sysfs, dev, IdentityKind::SysWwid) {
        return (IdentityKind::SysWwid, name);
    }
    if let Some(name) = system_read(sysfs, dev, IdentityKind::SysSerial) {
        return (IdentityKind::SysSerial, name);
    }
    devname_identity(dev)
}

fn devname_identity(dev: &devices_types::DeviceRecord) -> (IdentityKind, String) {
    (IdentityKind::Devname, dev.name.clone())
}
