// SPDX-License-Identifier: GPL-3.0-only

//! Post-scan validation of devices file entries.
//!
//! Label scanning has read the PVID off each matched device; the file could
//! be outdated, and the disk is authoritative. For stable identity kinds
//! the entry's PVID and devname are corrected in place. For the unreliable
//! devname kind the PVID is the tie-breaker: a mismatch unmatches the
//! entry and drops the impostor device.

use devices_types::{DeviceCache, DeviceIndex};

use crate::contracts::{FilterChain, PvCache};
use crate::registry::Registry;

#[derive(Debug, Default)]
pub struct ValidateOptions {
    /// Do not attempt the best-effort file update.
    pub noupdate: bool,
    /// The command runs during startup, when device names are still being
    /// established; skip devname corrections to avoid thrashing the file.
    pub startup: bool,
}

#[derive(Debug, Default)]
pub struct ValidateOutcome {
    /// Some entries are unusable or unproven; callers should not build
    /// derived state (hints) from them.
    pub ids_invalid: bool,
    pub checked: usize,
}

/// `scanned` limits PVID verification to devices the label scan actually
/// read; `None` means every matched device was scanned.
pub fn validate(
    reg: &mut Registry,
    cache: &mut DeviceCache,
    filter: &mut dyn FilterChain,
    pvs: &mut dyn PvCache,
    scanned: Option<&[DeviceIndex]>,
    opts: &ValidateOptions,
) -> ValidateOutcome {
    if !reg.enabled {
        return ValidateOutcome::default();
    }

    tracing::debug!("validating devices file entries");

    let mut outcome = ValidateOutcome::default();
    let mut update_file = false;
    let mut wrong_devs: Vec<DeviceIndex> = Vec::new();

    let was_scanned = |dev: DeviceIndex| scanned.map_or(true, |list| list.contains(&dev));

    // Entries with stable id types; the idname is the authority for the
    // pairing, so the PVID follows the disk.
    for index in 0..reg.entries.len() {
        let Some(dev_index) = reg.entries[index].dev else {
            continue;
        };
        if reg.entries[index].is_devname_kind() {
            continue;
        }
        if !was_scanned(dev_index) {
            continue;
        }
        let dev = cache.get(dev_index);
        if dev.scan_not_read {
            continue;
        }
        if !filter.passes(cache, dev_index, Some("persistent")) {
            let dev = cache.get(dev_index);
            tracing::warn!(
                dev = %dev.name,
                reason = dev.filtered_reason.as_deref().unwrap_or("unknown"),
                "devices file entry is excluded by filter"
            );
            continue;
        }

        outcome.checked += 1;
        let dev = cache.get(dev_index);
        let dev_pvid = dev.pvid;
        let dev_name = dev.name.clone();

        let entry = &mut reg.entries[index];
        match dev_pvid {
            Some(pvid) => {
                if entry.pvid != Some(pvid) {
                    tracing::warn!(
                        dev = %dev_name,
                        disk_pvid = %pvid,
                        file_pvid = %entry.pvid.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string()),
                        "device PVID differs from devices file"
                    );
                    entry.pvid = Some(pvid);
                    update_file = true;
                    outcome.ids_invalid = true;
                }
            }
            None => {
                if let Some(file_pvid) = entry.pvid.take() {
                    tracing::warn!(
                        dev = %dev_name,
                        file_pvid = %file_pvid,
                        "device has no PVID"
                    );
                    update_file = true;
                    outcome.ids_invalid = true;
                }
            }
        }

        if opts.startup {
            continue;
        }

        if entry.devname.as_deref() != Some(dev_name.as_str()) {
            tracing::warn!(
                dev = %dev_name,
                old = entry.devname.as_deref().unwrap_or("none"),
                "device has updated name"
            );
            entry.devname = Some(dev_name);
            update_file = true;
            outcome.ids_invalid = true;
        }
    }

    // Entries with the unreliable devname type; the PVID match overrides
    // the name match.
    for index in 0..reg.entries.len() {
        let Some(dev_index) = reg.entries[index].dev else {
            continue;
        };
        if !reg.entries[index].is_devname_kind() {
            continue;
        }
        if !was_scanned(dev_index) {
            continue;
        }
        if cache.get(dev_index).scan_not_read {
            continue;
        }
        if !filter.passes(cache, dev_index, Some("persistent")) {
            let dev = cache.get(dev_index);
            tracing::warn!(
                dev = %dev.name,
                reason = dev.filtered_reason.as_deref().unwrap_or("unknown"),
                "devices file entry is excluded by filter"
            );
            continue;
        }

        let Some(file_pvid) = reg.entries[index].pvid else {
            continue;
        };

        outcome.checked += 1;
        let dev = cache.get(dev_index);
        let dev_pvid = dev.pvid;
        let dev_name = dev.name.clone();
        let entry = &mut reg.entries[index];

        if dev_pvid == entry.pvid {
            if entry.idname.as_deref() != Some(dev_name.as_str()) {
                // shouldn't happen since the idname was the basis of the match
                tracing::error!(
                    pvid = %file_pvid,
                    idname = entry.idname.as_deref().unwrap_or("none"),
                    dev = %dev_name,
                    "unexpected idname mismatch for matched entry"
                );
                outcome.ids_invalid = true;
                continue;
            }
            if entry.devname.as_deref() != Some(dev_name.as_str()) {
                tracing::warn!(
                    dev = %dev_name,
                    old = entry.devname.as_deref().unwrap_or("none"),
                    "device has updated name"
                );
                entry.devname = Some(dev_name);
                update_file = true;
                outcome.ids_invalid = true;
            }
            continue;
        }

        // the pvid read from the device does not match the entry; the
        // entry's idname is wrong and the devname is probably wrong
        tracing::warn!(
            file_pvid = %file_pvid,
            dev = %dev_name,
            disk_pvid = %dev_pvid.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string()),
            "devices file PVID not found on device"
        );

        wrong_devs.push(dev_index);
        entry.idname = None;
        // keep the devname hint in place to preserve a clue about where
        // the PV was last seen
        entry.dev = None;
        cache.get_mut(dev_index).clear_match();
        update_file = true;
        outcome.ids_invalid = true;
    }

    // wrongly matched devices not referenced by another entry are dropped
    // from the downstream filter and PV cache
    for dev_index in wrong_devs {
        if reg.entry_for_device(dev_index).is_none() {
            tracing::debug!(dev = %cache.get(dev_index).name, "dropping incorrectly matched device");
            filter.wipe(cache, dev_index);
            pvs.drop_device(dev_index);
        }
    }

    // problems the rename search may fix shortly still make the ids invalid
    if !outcome.ids_invalid {
        outcome.ids_invalid = reg.entries.iter().any(|entry| {
            entry.idname.is_none()
                || (entry.is_devname_kind() && entry.dev.is_none() && entry.pvid.is_some())
        });
    }

    // a fresh mismatch permits a fresh search
    if update_file {
        reg.unlink_sentinel();
        reg.dirty = true;
    }

    if update_file && opts.noupdate {
        tracing::debug!(checked = outcome.checked, "validate update disabled");
    } else if update_file {
        tracing::debug!(checked = outcome.checked, "validate trying devices file update");
        reg.update_try();
    } else {
        tracing::debug!(checked = outcome.checked, "validate found no update needed");
    }

    outcome
}
