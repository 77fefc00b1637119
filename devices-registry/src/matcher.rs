// SPDX-License-Identifier: GPL-3.0-only

//! Pairing devices-file entries with devices from the cache.
//!
//! Matching is identity-based only: sysfs reads and name lookups, never
//! device I/O. Filters run after matching, so the matcher must not depend
//! on them.

use std::os::unix::fs::MetadataExt;

use devices_sys::identity::system_read;
use devices_sys::Sysfs;
use devices_types::{
    DevNum, DevTypes, DeviceCache, DeviceIndex, DeviceRecord, IdentityKind, UseEntry,
};

use crate::registry::Registry;

/// Pair every unmatched entry with a device. The last-known `devname` is
/// tried first since it is usually still correct; otherwise the whole cache
/// is swept.
pub fn match_all(reg: &mut Registry, cache: &mut DeviceCache, sysfs: &Sysfs, types: &DevTypes) {
    if reg.from_list {
        match_device_list(reg, cache);
        return;
    }
    if !reg.enabled {
        return;
    }

    tracing::debug!("comparing devices file entries to devices");

    for index in 0..reg.entries.len() {
        if let Some(dev) = reg.entries[index].dev {
            tracing::debug!(
                idname = reg.entries[index].idname.as_deref().unwrap_or("."),
                dev = %cache.get(dev).name,
                "entry previously matched"
            );
            continue;
        }

        if let Some(devname) = reg.entries[index].devname.clone() {
            if let Some(dev_index) = cache.lookup_name(&devname) {
                if try_match(&mut reg.entries[index], cache, dev_index, sysfs, types) {
                    continue;
                }
                // the node may exist while the device is disconnected; keep
                // looking for the identity on other devices
                tracing::debug!(%devname, "entry devname found but not matched");
            }
        }

        for dev_index in cache.indices() {
            if cache.get(dev_index).matched {
                continue;
            }
            if try_match(&mut reg.entries[index], cache, dev_index, sysfs, types) {
                break;
            }
        }
    }
}

/// List-mode pairing: entries came from explicit device paths, so pairing
/// is a name lookup and no identity is computed.
pub fn match_device_list(reg: &mut Registry, cache: &mut DeviceCache) {
    for entry in &mut reg.entries {
        if entry.dev.is_some() {
            continue;
        }
        let Some(devname) = entry.devname.as_deref() else {
            continue;
        };
        match cache.lookup_name(devname) {
            Some(dev_index) => {
                entry.dev = Some(dev_index);
                cache.get_mut(dev_index).matched = true;
            }
            None => tracing::warn!(devname, "device not found"),
        }
    }
}

/// Try to pair one entry with one device. On success the entry's `dev`, the
/// device's active identity, and the matched flag are set together.
fn try_match(
    entry: &mut UseEntry,
    cache: &mut DeviceCache,
    dev_index: DeviceIndex,
    sysfs: &Sysfs,
    types: &DevTypes,
) -> bool {
    // an impostor entry has lost its idname and holds only a PVID for the
    // rename search
    let (Some(kind), Some(idname)) = (entry.idtype, entry.idname.clone()) else {
        return false;
    };

    let dev = cache.get_mut(dev_index);

    if !kind.compatible_with_major(dev.devno.major, types) {
        return false;
    }
    if dev.part != entry.part {
        return false;
    }

    let (pos, name) = match dev.ids.iter().position(|id| id.kind == kind) {
        Some(pos) => (pos, dev.ids[pos].name.clone()),
        None => {
            let read_name = system_read(sysfs, dev, kind);
            // record negatives too, so the kind is not re-read for this device
            let pos = dev.remember_identity(kind, read_name.clone());
            (pos, read_name)
        }
    };

    if name.as_deref() == Some(idname.as_str()) {
        link(entry, dev, dev_index, pos);
        tracing::debug!(kind = %kind, %idname, dev = %dev.name, "match device id");
        return true;
    }

    // dm devices can carry differing names that still refer to the same
    // device
    if kind == IdentityKind::Devname && match_dm_devnames(dev, name.as_deref(), &idname, types) {
        link(entry, dev, dev_index, pos);
        tracing::debug!(kind = %kind, %idname, dev = %dev.name, "match device id: dm names");
        return true;
    }
    false
}

fn link(entry: &mut UseEntry, dev: &mut DeviceRecord, dev_index: DeviceIndex, id_pos: usize) {
    entry.dev = Some(dev_index);
    dev.active_id = Some(id_pos);
    dev.matched = true;
}

/// Device-mapper name equivalence: a stored idname of `/dev/dm-N` or
/// `/dev/mapper/foo` matches a dm device with a different current name when
/// a stat of the stored path lands on the same minor. This is the only
/// place the matcher dereferences a path from the file.
fn match_dm_devnames(
    dev: &DeviceRecord,
    cached_name: Option<&str>,
    entry_idname: &str,
    types: &DevTypes,
) -> bool {
    if dev.devno.major != types.device_mapper_major {
        return false;
    }

    if cached_name == Some(entry_idname) {
        return true;
    }

    if entry_idname == dev.name {
        tracing::debug!(
            idname = entry_idname,
            dev = %dev.name,
            "match device id: ignoring cached devname"
        );
        return true;
    }

    if entry_idname.starts_with("/dev/dm-") || entry_idname.starts_with("/dev/mapper/") {
        let Ok(meta) = std::fs::metadata(entry_idname) else {
            return false;
        };
        let stat_devno = DevNum::from_rdev(meta.rdev());
        if stat_devno.major == types.device_mapper_major && stat_devno.minor == dev.devno.minor {
            tracing::debug!(
                idname = entry_idname,
                dev = %dev.name,
                "match device id: using other dm name"
            );
            return true;
        }
    }

    false
}

/// Warn about entries that matched no device. Orphans are retained and
/// reported, never removed automatically.
pub fn report_orphans(reg: &Registry, cache: &DeviceCache) {
    for entry in &reg.entries {
        if let Some(dev) = entry.dev {
            if cache.get(dev).matched {
                continue;
            }
            tracing::error!(dev = %cache.get(dev).name, "device not matched to device id");
            continue;
        }

        let pvid = entry
            .pvid
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());

        match (entry.is_devname_kind(), entry.devname.as_deref()) {
            (true, Some(devname)) => {
                tracing::warn!(%pvid, devname, "devices file PVID last seen on devname not found")
            }
            (true, None) => tracing::warn!(%pvid, "devices file PVID not found"),
            (false, Some(devname)) => tracing::warn!(
                kind = entry.idtype.map(IdentityKind::as_str).unwrap_or("."),
                idname = entry.idname.as_deref().unwrap_or("none"),
                %pvid,
                devname,
                "devices file entry last seen on devname not found"
            ),
            (false, None) => tracing::warn!(
                kind = entry.idtype.map(IdentityKind::as_str).unwrap_or("."),
                idname = entry.idname.as_deref().unwrap_or("none"),
                %pvid,
                "devices file entry not found"
            ),
        }
    }
}
