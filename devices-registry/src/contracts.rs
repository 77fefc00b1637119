// SPDX-License-Identifier: GPL-3.0-only

//! Contracts with the surrounding scan pipeline.
//!
//! The registry never enumerates devices, applies general filters, or owns
//! the PV summary cache; those live with collaborators reached through
//! these traits. Everything is synchronous: the registry runs on one thread
//! and the traits are called inline from the matcher, validator, and
//! rename search.

use devices_types::{DeviceCache, DeviceIndex, DeviceRecord, Pvid};

use devices_sys::{pvheader, SysError};

pub use devices_sys::ExternalDeviceInfo;

/// The command's filter chain, applied by named stage. A `None` stage runs
/// the whole chain. Stage names the registry uses: `sysfs`, `type`,
/// `usable`, `mpath` before reading a device; `partitioned`, `signature`,
/// `md`, `fwraid` after; `persistent` during validation.
pub trait FilterChain {
    fn passes(&mut self, cache: &DeviceCache, dev: DeviceIndex, stage: Option<&str>) -> bool;

    /// Forget any cached filter verdict for `dev`.
    fn wipe(&mut self, cache: &DeviceCache, dev: DeviceIndex);
}

/// The scanned-PV summary cache (lvmcache). The registry drops devices it
/// unmatched, and consults the PV count when deciding whether to create a
/// devices file implicitly.
pub trait PvCache {
    fn drop_device(&mut self, dev: DeviceIndex);

    /// Number of PVs the scan has seen on this host.
    fn pv_count(&self) -> usize;
}

/// Reads a device's PVID during the rename search. The production reader
/// does a 4 KiB header read from the device node; tests substitute a map.
pub trait PvidReader {
    fn read_pvid(&mut self, dev: &DeviceRecord) -> Result<Option<Pvid>, SysError>;
}

/// [`PvidReader`] backed by the real header read.
#[derive(Debug, Default)]
pub struct HeaderPvidReader;

impl PvidReader for HeaderPvidReader {
    fn read_pvid(&mut self, dev: &DeviceRecord) -> Result<Option<Pvid>, SysError> {
        pvheader::read_pvid(dev.name.as_ref())
    }
}
