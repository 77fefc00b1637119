// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a physical-volume identifier.
pub const PVID_LEN: usize = 32;

/// A 32-byte physical-volume identifier as stored in the on-disk PV header
/// and in the devices file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pvid([u8; PVID_LEN]);

impl Pvid {
    /// Accepts exactly `PVID_LEN` printable ASCII bytes.
    pub fn parse(value: &str) -> Option<Self> {
        Self::from_bytes(value.as_bytes())
    }

    /// Accepts a raw 32-byte slice, e.g. cut from a PV header.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PVID_LEN {
            return None;
        }
        if !bytes.iter().all(|byte| byte.is_ascii_graphic()) {
            return None;
        }
        let mut id = [0u8; PVID_LEN];
        id.copy_from_slice(bytes);
        Some(Pvid(id))
    }

    pub fn as_str(&self) -> &str {
        // constructor enforces printable ASCII
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Display for Pvid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Pvid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pvid({})", self.as_str())
    }
}

impl Serialize for Pvid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pvid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Pvid::parse(&value).ok_or_else(|| D::Error::custom("invalid PVID"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_32_printable_bytes() {
        let id = "P000000000000000000000000000001X";
        assert_eq!(id.len(), 32);
        let pvid = Pvid::parse(id).expect("valid pvid");
        assert_eq!(pvid.as_str(), id);
    }

    #[test]
    fn rejects_wrong_length_and_control_bytes() {
        assert!(Pvid::parse("short").is_none());
        assert!(Pvid::parse(&"a".repeat(33)).is_none());
        let mut raw = [b'a'; PVID_LEN];
        raw[5] = b'\n';
        assert!(Pvid::from_bytes(&raw).is_none());
    }
}
