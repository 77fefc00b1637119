// SPDX-License-Identifier: GPL-3.0-only

//! Per-kind identity reads from sysfs.

use devices_types::{DevTypes, DeviceRecord, IdentityKind};

use crate::sysfs::{dm_uuid_has_prefix, Sysfs};

/// Replace whitespace and control bytes so an identifier is a single token
/// in the devices file.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_whitespace() || c.is_control() { '_' } else { c })
        .collect()
}

/// Read the identity of `kind` for a device from sysfs. Returns `None` when
/// the kind is not available on the device, or when the value is known to be
/// unusable (non-unique QEMU WWIDs, deleted loop backing files).
pub fn system_read(sysfs: &Sysfs, dev: &DeviceRecord, kind: IdentityKind) -> Option<String> {
    let raw = match kind {
        IdentityKind::SysWwid => {
            let wwid = sysfs
                .read_block_attr(dev.devno, dev.primary, "device/wwid")
                .or_else(|| sysfs.read_block_attr(dev.devno, dev.primary, "wwid"))?;
            // qemu wwid begins "t10.ATA     QEMU HARDDISK ..." and is not unique
            if wwid.contains("QEMU HARDDISK") {
                return None;
            }
            wwid
        }
        IdentityKind::SysSerial => {
            sysfs.read_block_attr(dev.devno, dev.primary, "device/serial")?
        }
        IdentityKind::MpathUuid | IdentityKind::CryptUuid | IdentityKind::LvmlvUuid => {
            sysfs.read_block_attr(dev.devno, dev.primary, "dm/uuid")?
        }
        IdentityKind::MdUuid => sysfs.read_block_attr(dev.devno, dev.primary, "md/uuid")?,
        IdentityKind::LoopFile => {
            let backing = sysfs.read_block_attr(dev.devno, dev.primary, "loop/backing_file")?;
            if backing.contains("(deleted)") {
                return None;
            }
            backing
        }
        IdentityKind::Devname => return Some(dev.name.clone()),
    };

    let value = sanitize(&raw);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// The DM-UUID prefix kinds, in the order they are probed when adding a
/// device-mapper device.
pub const DM_UUID_KINDS: [(IdentityKind, &str); 3] = [
    (IdentityKind::MpathUuid, "mpath-"),
    (IdentityKind::CryptUuid, "CRYPT-"),
    (IdentityKind::LvmlvUuid, "LVM-"),
];

/// Which DM-UUID kind a device-mapper device would use, if any.
pub fn dm_uuid_kind(sysfs: &Sysfs, dev: &DeviceRecord) -> Option<(IdentityKind, String)> {
    let uuid = sysfs.read_block_attr(dev.devno, dev.primary, "dm/uuid")?;
    for (kind, prefix) in DM_UUID_KINDS {
        if dm_uuid_has_prefix(&uuid, prefix) {
            return Some((kind, sanitize(&uuid)));
        }
    }
    None
}

/// Whether this device would be listed under a stable kind, or would fall
/// back to a devname identity. Cached positive reads are trusted; otherwise
/// sysfs is probed without recording results on the device.
pub fn has_stable_id(sysfs: &Sysfs, dev: &DeviceRecord, types: &DevTypes) -> bool {
    if dev.has_stable_cached_id() {
        return true;
    }

    if system_read(sysfs, dev, IdentityKind::SysWwid).is_some() {
        return true;
    }
    if system_read(sysfs, dev, IdentityKind::SysSerial).is_some() {
        return true;
    }

    if dev.devno.major == types.loop_major
        && system_read(sysfs, dev, IdentityKind::LoopFile).is_some()
    {
        return true;
    }

    if dev.devno.major == types.device_mapper_major && dm_uuid_kind(sysfs, dev).is_some() {
        return true;
    }

    if dev.devno.major == types.md_major
        && system_read(sysfs, dev, IdentityKind::MdUuid).is_some()
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use devices_types::DevNum;
    use std::fs;
    use std::path::Path;

    fn write_attr(root: &Path, devno: DevNum, suffix: &str, value: &str) {
        let path = root
            .join("dev/block")
            .join(format!("{}:{}", devno.major, devno.minor))
            .join(suffix);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{value}\n")).unwrap();
    }

    #[test]
    fn wwid_falls_back_and_sanitizes() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        let dev = DeviceRecord::new("/dev/sda", DevNum::new(8, 0));
        write_attr(dir.path(), dev.devno, "wwid", "t10.ATA  WDC WD10EZEX");

        let wwid = system_read(&sysfs, &dev, IdentityKind::SysWwid);
        assert_eq!(wwid.as_deref(), Some("t10.ATA__WDC_WD10EZEX"));
    }

    #[test]
    fn qemu_wwids_are_discarded() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        let dev = DeviceRecord::new("/dev/sda", DevNum::new(8, 0));
        write_attr(
            dir.path(),
            dev.devno,
            "device/wwid",
            "t10.ATA     QEMU HARDDISK   QM00001",
        );

        assert_eq!(system_read(&sysfs, &dev, IdentityKind::SysWwid), None);
    }

    #[test]
    fn deleted_loop_backing_file_is_discarded() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        let dev = DeviceRecord::new("/dev/loop0", DevNum::new(7, 0));
        write_attr(
            dir.path(),
            dev.devno,
            "loop/backing_file",
            "/var/tmp/img (deleted)",
        );

        assert_eq!(system_read(&sysfs, &dev, IdentityKind::LoopFile), None);
    }

    #[test]
    fn devname_kind_reads_nothing() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        let dev = DeviceRecord::new("/dev/sdq", DevNum::new(65, 0));
        assert_eq!(
            system_read(&sysfs, &dev, IdentityKind::Devname).as_deref(),
            Some("/dev/sdq")
        );
    }

    #[test]
    fn stable_id_probe_recognises_dm_uuids() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sysfs = Sysfs::new(dir.path());
        let types = DevTypes::default();
        let dev = DeviceRecord::new("/dev/dm-2", DevNum::new(253, 2));
        assert!(!has_stable_id(&sysfs, &dev, &types));

        write_attr(dir.path(), dev.devno, "dm/uuid", "CRYPT-LUKS2-abc");
        assert!(has_stable_id(&sysfs, &dev, &types));
    }
}
