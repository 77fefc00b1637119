// SPDX-License-Identifier: GPL-3.0-only

//! The 4 KiB header read used by the renamed-device search.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use devices_types::{Pvid, PVID_LEN};

use crate::error::Result;

/// Size of the header read. Reading on this boundary keeps the I/O aligned
/// for direct reads.
pub const HEADER_READ_SIZE: usize = 4096;

/// Sector offset of the label within the header.
const LABEL_OFFSET: usize = 512;
/// Offset of the label type field within the label.
const TYPE_OFFSET: usize = LABEL_OFFSET + 24;
/// The PV identifier is the first field after the 32-byte label header.
const PVID_OFFSET: usize = LABEL_OFFSET + 32;

const LABEL_ID: &[u8; 8] = b"LABELONE";
const LABEL_TYPE: &[u8; 8] = b"LVM2 001";

/// Read the first 4 KiB of a block device and extract the PVID if the
/// device carries a volume-manager label. `Ok(None)` means the device was
/// readable but is not a PV; an error means the device could not be read.
pub fn read_pvid(path: &Path) -> Result<Option<Pvid>> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_READ_SIZE];

    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled < PVID_OFFSET + PVID_LEN {
        return Ok(None);
    }

    Ok(extract_pvid(&buf))
}

/// Extract a PVID from an in-memory header buffer.
pub fn extract_pvid(buf: &[u8]) -> Option<Pvid> {
    if buf.len() < PVID_OFFSET + PVID_LEN {
        return None;
    }
    if &buf[LABEL_OFFSET..LABEL_OFFSET + 8] != LABEL_ID {
        return None;
    }
    // wipefs -a clears only the type field, leaving the rest of the label
    if &buf[TYPE_OFFSET..TYPE_OFFSET + 8] != LABEL_TYPE {
        return None;
    }
    Pvid::from_bytes(&buf[PVID_OFFSET..PVID_OFFSET + PVID_LEN])
}

/// Build a header buffer carrying `pvid`, for fixtures and tests.
pub fn format_header(pvid: &Pvid) -> [u8; HEADER_READ_SIZE] {
    let mut buf = [0u8; HEADER_READ_SIZE];
    buf[LABEL_OFFSET..LABEL_OFFSET + 8].copy_from_slice(LABEL_ID);
    buf[TYPE_OFFSET..TYPE_OFFSET + 8].copy_from_slice(LABEL_TYPE);
    buf[PVID_OFFSET..PVID_OFFSET + PVID_LEN].copy_from_slice(pvid.as_str().as_bytes());
    buf
}
