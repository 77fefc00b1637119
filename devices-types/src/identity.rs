// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::devtypes::DevTypes;

/// Identity schemes a device can be listed under.
///
/// Every kind except `Devname` is stable: it survives reboots, renames, and
/// reattachment. `Devname` is a last-resort fallback and the only kind the
/// renamed-device search exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    SysWwid,
    SysSerial,
    MpathUuid,
    CryptUuid,
    LvmlvUuid,
    MdUuid,
    LoopFile,
    Devname,
}

impl IdentityKind {
    pub const ALL: [IdentityKind; 8] = [
        IdentityKind::SysWwid,
        IdentityKind::SysSerial,
        IdentityKind::MpathUuid,
        IdentityKind::CryptUuid,
        IdentityKind::LvmlvUuid,
        IdentityKind::MdUuid,
        IdentityKind::LoopFile,
        IdentityKind::Devname,
    ];

    /// The tag written to and read from the devices file.
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityKind::SysWwid => "sys_wwid",
            IdentityKind::SysSerial => "sys_serial",
            IdentityKind::MpathUuid => "mpath_uuid",
            IdentityKind::CryptUuid => "crypt_uuid",
            IdentityKind::LvmlvUuid => "lvmlv_uuid",
            IdentityKind::MdUuid => "md_uuid",
            IdentityKind::LoopFile => "loop_file",
            IdentityKind::Devname => "devname",
        }
    }

    /// Parse a file tag. Unknown tags yield `None`; the entry is kept but
    /// can never match a device.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "sys_wwid" => Some(IdentityKind::SysWwid),
            "sys_serial" => Some(IdentityKind::SysSerial),
            "mpath_uuid" => Some(IdentityKind::MpathUuid),
            "crypt_uuid" => Some(IdentityKind::CryptUuid),
            "lvmlv_uuid" => Some(IdentityKind::LvmlvUuid),
            "md_uuid" => Some(IdentityKind::MdUuid),
            "loop_file" => Some(IdentityKind::LoopFile),
            "devname" => Some(IdentityKind::Devname),
            _ => None,
        }
    }

    pub fn is_stable(self) -> bool {
        !matches!(self, IdentityKind::Devname)
    }

    /// The sysfs attribute this kind is read from, relative to the device's
    /// `/sys/dev/block/M:m/` directory. `Devname` has no sysfs source.
    pub fn sysfs_attr(self) -> Option<&'static str> {
        match self {
            IdentityKind::SysWwid => Some("device/wwid"),
            IdentityKind::SysSerial => Some("device/serial"),
            IdentityKind::MpathUuid
            | IdentityKind::CryptUuid
            | IdentityKind::LvmlvUuid => Some("dm/uuid"),
            IdentityKind::MdUuid => Some("md/uuid"),
            IdentityKind::LoopFile => Some("loop/backing_file"),
            IdentityKind::Devname => None,
        }
    }

    /// Whether an entry of this kind can possibly belong to a device with
    /// the given major number. Lets the matcher skip whole classes of
    /// devices without touching sysfs.
    pub fn compatible_with_major(self, major: u32, types: &DevTypes) -> bool {
        // devname can be used with any kind of device
        if self == IdentityKind::Devname {
            return true;
        }

        match self {
            IdentityKind::MpathUuid | IdentityKind::CryptUuid | IdentityKind::LvmlvUuid => {
                return major == types.device_mapper_major;
            }
            IdentityKind::MdUuid => return major == types.md_major,
            IdentityKind::LoopFile => return major == types.loop_major,
            _ => {}
        }

        if major == types.device_mapper_major || major == types.md_major || major == types.loop_major
        {
            return false;
        }

        true
    }
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types() -> DevTypes {
        DevTypes {
            device_mapper_major: 253,
            md_major: 9,
            loop_major: 7,
            scsi_majors: vec![8, 65],
        }
    }

    #[test]
    fn tags_round_trip() {
        for kind in IdentityKind::ALL {
            assert_eq!(IdentityKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(IdentityKind::from_tag("drbd_uuid"), None);
    }

    #[test]
    fn devname_is_the_only_unstable_kind() {
        let unstable: Vec<_> = IdentityKind::ALL
            .iter()
            .filter(|kind| !kind.is_stable())
            .collect();
        assert_eq!(unstable, vec![&IdentityKind::Devname]);
    }

    #[test]
    fn dm_kinds_require_the_dm_major() {
        let types = types();
        assert!(IdentityKind::MpathUuid.compatible_with_major(253, &types));
        assert!(!IdentityKind::MpathUuid.compatible_with_major(8, &types));
        assert!(!IdentityKind::CryptUuid.compatible_with_major(9, &types));
        assert!(!IdentityKind::LvmlvUuid.compatible_with_major(7, &types));
    }

    #[test]
    fn special_majors_reject_wwid_and_serial() {
        let types = types();
        assert!(!IdentityKind::SysWwid.compatible_with_major(253, &types));
        assert!(!IdentityKind::SysSerial.compatible_with_major(9, &types));
        assert!(!IdentityKind::SysWwid.compatible_with_major(7, &types));
        assert!(IdentityKind::SysWwid.compatible_with_major(8, &types));
    }

    #[test]
    fn devname_is_compatible_everywhere() {
        let types = types();
        for major in [8, 9, 7, 253, 259] {
            assert!(IdentityKind::Devname.compatible_with_major(major, &types));
        }
    }
}
