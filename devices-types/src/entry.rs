// SPDX-License-Identifier: GPL-3.0-only

use crate::device::DeviceIndex;
use crate::identity::IdentityKind;
use crate::pvid::Pvid;

/// One row of the devices file.
///
/// `idtype` is `None` when the file carried a tag this implementation does
/// not recognise; such entries are preserved but never match. `idname` is
/// cleared when a devname-kinded entry is found to be an impostor, leaving
/// only the PVID for the rename search. `devname` is a hint, never an
/// authority. `dev` is set by the matcher and points into the device cache.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UseEntry {
    pub idtype: Option<IdentityKind>,
    pub idname: Option<String>,
    pub devname: Option<String>,
    pub pvid: Option<Pvid>,
    pub part: u32,
    pub dev: Option<DeviceIndex>,
}

impl UseEntry {
    pub fn new(idtype: IdentityKind, idname: impl Into<String>) -> Self {
        UseEntry {
            idtype: Some(idtype),
            idname: Some(idname.into()),
            ..UseEntry::default()
        }
    }

    pub fn is_devname_kind(&self) -> bool {
        self.idtype == Some(IdentityKind::Devname)
    }

    /// Whether this entry still needs the rename search: identified only by
    /// an unstable name, carrying a PVID to look for.
    pub fn wants_rename_search(&self) -> bool {
        self.is_devname_kind() && self.pvid.is_some()
    }
}
