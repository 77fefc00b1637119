// SPDX-License-Identifier: GPL-3.0-only

//! The renamed-device search.
//!
//! A devname-kinded entry whose device disappeared still carries a PVID.
//! The search reads a 4 KiB header from candidate devices to find where
//! that PVID lives now, and rewrites the entry for the device's current
//! name. Candidates are restricted by the filter stages that do not need
//! device data, and in `auto` mode devices with a stable identity are
//! skipped since they could never hold a devname entry.

use devices_sys::identity::has_stable_id;
use devices_sys::Sysfs;
use devices_types::{
    DevTypes, DeviceCache, DeviceIndex, IdentityKind, Pvid, SearchMode,
};

use crate::contracts::{FilterChain, PvidReader};
use crate::registry::Registry;

#[derive(Debug, Default)]
pub struct SearchOptions {
    /// Do not attempt the best-effort file update.
    pub noupdate: bool,
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Devices newly matched by the search; the caller re-runs scanning on
    /// them.
    pub found: Vec<DeviceIndex>,
    /// Entries that wanted a search, whether or not one ran.
    pub wanted: usize,
}

struct WantedPvid {
    pvid: Pvid,
    dev: Option<DeviceIndex>,
}

/// The filter stages consulted before reading a candidate device.
const PRE_READ_STAGES: [&str; 4] = ["sysfs", "type", "usable", "mpath"];
/// The stages that use the data read from the device.
const POST_READ_STAGES: [&str; 4] = ["partitioned", "signature", "md", "fwraid"];

pub fn find_renamed(
    reg: &mut Registry,
    cache: &mut DeviceCache,
    sysfs: &Sysfs,
    types: &DevTypes,
    filter: &mut dyn FilterChain,
    reader: &mut dyn PvidReader,
    opts: &SearchOptions,
) -> SearchOutcome {
    let mut outcome = SearchOutcome::default();
    if !reg.enabled {
        return outcome;
    }

    let mode = reg.config().search_for_devnames;

    // an alternate devices file is searched only when explicitly asked
    if !reg.config().uses_system_file() && mode != SearchMode::All {
        return outcome;
    }

    let mut wanted: Vec<WantedPvid> = Vec::new();
    for entry in &reg.entries {
        if !entry.wants_rename_search() {
            continue;
        }
        // an entry whose old device is now filtered out (e.g. an mpath
        // component) also wants its PVID found elsewhere
        if let Some(dev) = entry.dev {
            if cache.get(dev).filtered_reason.is_none() {
                continue;
            }
        }

        let Some(pvid) = entry.pvid else {
            continue;
        };
        outcome.wanted += 1;
        tracing::debug!(%pvid, "search for PVID");
        if mode != SearchMode::None {
            wanted.push(WantedPvid { pvid, dev: None });
        }
    }

    if wanted.is_empty() {
        return outcome;
    }

    // a previous command searched and found nothing; don't repeat the work
    // until some event invalidates that result
    if reg.sentinel_exists() {
        tracing::debug!("search for PVIDs skipped by sentinel");
        return outcome;
    }

    let candidates: Vec<DeviceIndex> = cache
        .indices()
        .filter(|&dev| !cache.get(dev).matched)
        .filter(|&dev| {
            PRE_READ_STAGES
                .iter()
                .all(|&stage| filter.passes(cache, dev, Some(stage)))
        })
        .collect();

    tracing::debug!(count = candidates.len(), "search for PVIDs reading labels");

    let mut other_idtype = 0;
    let mut other_pvid = 0;
    let mut no_pvid = 0;

    'devs: for dev_index in candidates {
        // a device with a stable identity would never be listed by devname,
        // so in auto mode it cannot be the renamed home of a wanted PVID
        if mode == SearchMode::Auto && has_stable_id(sysfs, cache.get(dev_index), types) {
            other_idtype += 1;
            continue;
        }

        let pvid = match reader.read_pvid(cache.get(dev_index)) {
            Ok(Some(pvid)) => pvid,
            Ok(None) => {
                no_pvid += 1;
                continue;
            }
            Err(_) => {
                no_pvid += 1;
                continue;
            }
        };
        cache.get_mut(dev_index).pvid = Some(pvid);

        for stage in POST_READ_STAGES {
            if !filter.passes(cache, dev_index, Some(stage)) {
                continue 'devs;
            }
        }

        // keep scanning after a hit so duplicate PVIDs are detected
        let mut drop_ambiguous = None;
        for (pos, want) in wanted.iter_mut().enumerate() {
            if want.pvid != pvid {
                other_pvid += 1;
                continue;
            }
            match want.dev {
                Some(prev) => {
                    tracing::warn!(
                        pvid = %want.pvid,
                        first = %cache.get(prev).name,
                        second = %cache.get(dev_index).name,
                        "found PVID on multiple devices; duplicate PVIDs should be changed to be unique"
                    );
                    drop_ambiguous = Some(pos);
                }
                None => {
                    tracing::info!(pvid = %want.pvid, dev = %cache.get(dev_index).name, "devices file PVID found");
                    want.dev = Some(dev_index);
                }
            }
        }
        // an ambiguous PVID is not re-paired with any of its claimants
        if let Some(pos) = drop_ambiguous {
            wanted.remove(pos);
        }
    }

    tracing::debug!(other_pvid, no_pvid, other_idtype, "search for PVIDs finished");

    let mut update_file = false;
    let mut not_found = 0;

    for want in &wanted {
        let Some(dev_index) = want.dev else {
            not_found += 1;
            continue;
        };

        let Some(entry_index) = reg.entry_for_pvid(&want.pvid) else {
            continue;
        };
        if !reg.entries[entry_index].is_devname_kind() {
            continue;
        }

        let devname = cache.get(dev_index).name.clone();
        let part = cache.get(dev_index).part;
        if !opts.noupdate {
            tracing::warn!(pvid = %want.pvid, idname = %devname, "devices file entry updating IDNAME");
        }

        let entry = &mut reg.entries[entry_index];
        entry.idname = Some(devname.clone());
        entry.devname = Some(devname.clone());
        entry.dev = Some(dev_index);
        entry.part = part;

        let dev = cache.get_mut(dev_index);
        dev.ids.clear();
        let pos = dev.remember_identity(IdentityKind::Devname, Some(devname));
        dev.active_id = Some(pos);
        dev.matched = true;

        update_file = true;
        outcome.found.push(dev_index);
    }

    // the new devices must pass the full filter chain now that the identity
    // filter accepts them
    let mut still_found = Vec::new();
    for dev_index in outcome.found.drain(..) {
        filter.wipe(cache, dev_index);
        if filter.passes(cache, dev_index, None) {
            still_found.push(dev_index);
            continue;
        }
        let dev = cache.get_mut(dev_index);
        tracing::warn!(
            dev = %dev.name,
            reason = dev.filtered_reason.as_deref().unwrap_or("unknown"),
            "new device for PVID is excluded"
        );
        dev.clear_match();
        let name = dev.name.clone();
        if let Some(entry_index) = reg.entry_for_devname(&name) {
            reg.entries[entry_index].dev = None;
        }
    }
    outcome.found = still_found;

    if update_file {
        reg.dirty = true;
    }
    if update_file && opts.noupdate {
        tracing::debug!("search for PVIDs update disabled");
    } else if update_file {
        tracing::debug!("search for PVIDs updating devices file");
        reg.update_try();
    } else {
        tracing::debug!("search for PVIDs found no updates");
    }

    // remember that a full search found nothing, so detached devices do not
    // trigger a search from every subsequent command
    if not_found > 0 && outcome.found.is_empty() {
        reg.touch_sentinel();
    }

    outcome
}
