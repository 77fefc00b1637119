// SPDX-License-Identifier: GPL-3.0-only

//! The identity-filter surface consumed by the scan pipeline.

use devices_types::{DeviceCache, DeviceIndex};

use crate::registry::Registry;

/// The predicate behind the `persistent` filter stage: a device passes iff
/// it was paired to a devices file entry.
pub fn is_listed(cache: &DeviceCache, dev: DeviceIndex) -> bool {
    cache.get(dev).matched
}

/// An identity suitable for embedding in volume-group metadata. Absent for
/// unlisted devices and for the unstable devname kind, which would go stale
/// inside copied metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataHint {
    pub idtype: &'static str,
    pub idname: String,
}

pub fn metadata_hint(
    reg: &Registry,
    cache: &DeviceCache,
    dev: DeviceIndex,
) -> Option<MetadataHint> {
    if !reg.enabled {
        return None;
    }
    let identity = cache.get(dev).active_identity()?;
    if !identity.kind.is_stable() {
        return None;
    }
    Some(MetadataHint {
        idtype: identity.kind.as_str(),
        idname: identity.name.clone()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devices_types::{Config, DevNum, DeviceRecord, IdentityKind};

    #[test]
    fn only_matched_devices_are_listed() {
        let mut cache = DeviceCache::new();
        let dev = cache.insert(DeviceRecord::new("/dev/sda", DevNum::new(8, 0)));
        assert!(!is_listed(&cache, dev));
        cache.get_mut(dev).matched = true;
        assert!(is_listed(&cache, dev));
    }

    #[test]
    fn devname_identities_produce_no_hint() {
        let mut reg = Registry::new(Config::default(), "test");
        reg.enabled = true;

        let mut cache = DeviceCache::new();
        let dev = cache.insert(DeviceRecord::new("/dev/sda", DevNum::new(8, 0)));

        let record = cache.get_mut(dev);
        let pos = record.remember_identity(IdentityKind::Devname, Some("/dev/sda".into()));
        record.active_id = Some(pos);
        record.matched = true;
        assert_eq!(metadata_hint(&reg, &cache, dev), None);

        let record = cache.get_mut(dev);
        let pos = record.remember_identity(IdentityKind::SysWwid, Some("naa.1".into()));
        record.active_id = Some(pos);
        let hint = metadata_hint(&reg, &cache, dev).expect("stable hint");
        assert_eq!(hint.idtype, "sys_wwid");
        assert_eq!(hint.idname, "naa.1");
    }
}
