// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::Path;

/// Major numbers of the device classes the registry treats specially.
/// Read from `/proc/devices` at startup; the defaults match the classic
/// static assignments and are used when a name is missing from the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevTypes {
    pub device_mapper_major: u32,
    pub md_major: u32,
    pub loop_major: u32,
    pub scsi_majors: Vec<u32>,
}

impl Default for DevTypes {
    fn default() -> Self {
        DevTypes {
            device_mapper_major: 253,
            md_major: 9,
            loop_major: 7,
            scsi_majors: vec![8, 65, 66, 67, 68, 69, 70, 71, 128, 129, 130, 131, 132, 133, 134, 135],
        }
    }
}

impl DevTypes {
    /// Parse the block-device section of a `/proc/devices` listing.
    pub fn from_proc(path: &Path) -> io::Result<Self> {
        let listing = fs::read_to_string(path)?;
        Ok(Self::parse(&listing))
    }

    pub fn parse(listing: &str) -> Self {
        let mut types = DevTypes {
            scsi_majors: Vec::new(),
            ..DevTypes::default()
        };
        let mut in_block = false;

        for line in listing.lines() {
            if line.starts_with("Block devices:") {
                in_block = true;
                continue;
            }
            if line.starts_with("Character devices:") {
                in_block = false;
                continue;
            }
            if !in_block {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(major), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Ok(major) = major.parse::<u32>() else {
                continue;
            };

            match name {
                "device-mapper" => types.device_mapper_major = major,
                "md" => types.md_major = major,
                "loop" => types.loop_major = major,
                "sd" => types.scsi_majors.push(major),
                _ => {}
            }
        }

        if types.scsi_majors.is_empty() {
            types.scsi_majors = DevTypes::default().scsi_majors;
        }
        types
    }

    pub fn is_scsi_major(&self, major: u32) -> bool {
        self.scsi_majors.contains(&major)
    }
}
