// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use devices_registry::{FilterChain, PvCache, PvidReader, Registry};
use devices_sys::{SysError, Sysfs};
use devices_types::{Config, DevNum, DevTypes, DeviceCache, DeviceIndex, DeviceRecord, Pvid};

/// A scratch root holding the devices file, lock dir, run dir, and a fake
/// sysfs tree.
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub sysfs: Sysfs,
    pub types: DevTypes,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut config = Config::with_root(dir.path());
        config.system_id = Some("hostA".to_string());
        fs::create_dir_all(config.devices_dir()).expect("devices dir");
        fs::create_dir_all(&config.lock_dir).expect("lock dir");
        fs::create_dir_all(&config.run_dir).expect("run dir");
        let sysfs = Sysfs::new(config.sysfs_dir.clone());
        Fixture {
            dir,
            config,
            sysfs,
            types: DevTypes::default(),
        }
    }

    pub fn registry(&self, command: &str) -> Registry {
        Registry::new(self.config.clone(), command)
    }

    pub fn write_devices_file(&self, text: &str) {
        fs::write(self.config.devices_file_path(), text).expect("write devices file");
    }

    pub fn read_devices_file(&self) -> String {
        fs::read_to_string(self.config.devices_file_path()).expect("read devices file")
    }

    pub fn write_sys_attr(&self, devno: DevNum, suffix: &str, value: &str) {
        let path = self
            .config
            .sysfs_dir
            .join("dev/block")
            .join(format!("{}:{}", devno.major, devno.minor))
            .join(suffix);
        fs::create_dir_all(path.parent().unwrap()).expect("sysfs dirs");
        fs::write(path, format!("{value}\n")).expect("sysfs attr");
    }

    pub fn sentinel_exists(&self) -> bool {
        self.config.sentinel_path().exists()
    }
}

pub fn pvid(fill: char) -> Pvid {
    Pvid::parse(&fill.to_string().repeat(32)).expect("valid pvid")
}

pub fn insert_device(cache: &mut DeviceCache, name: &str, devno: DevNum) -> DeviceIndex {
    cache.insert(DeviceRecord::new(name, devno))
}

/// Filter chain that passes everything, recording wipes.
#[derive(Default)]
pub struct AllowAllFilter {
    pub wiped: Vec<DeviceIndex>,
}

impl FilterChain for AllowAllFilter {
    fn passes(&mut self, _cache: &DeviceCache, _dev: DeviceIndex, _stage: Option<&str>) -> bool {
        true
    }

    fn wipe(&mut self, _cache: &DeviceCache, dev: DeviceIndex) {
        self.wiped.push(dev);
    }
}

/// PV summary cache stub.
#[derive(Default)]
pub struct TestPvCache {
    pub dropped: Vec<DeviceIndex>,
    pub count: usize,
}

impl PvCache for TestPvCache {
    fn drop_device(&mut self, dev: DeviceIndex) {
        self.dropped.push(dev);
    }

    fn pv_count(&self) -> usize {
        self.count
    }
}

/// PVID reader backed by a device-name map instead of real header reads.
#[derive(Default)]
pub struct MapPvidReader {
    map: HashMap<String, Pvid>,
}

impl MapPvidReader {
    pub fn with(entries: &[(&str, Pvid)]) -> Self {
        MapPvidReader {
            map: entries
                .iter()
                .map(|(name, pvid)| (name.to_string(), *pvid))
                .collect(),
        }
    }
}

impl PvidReader for MapPvidReader {
    fn read_pvid(&mut self, dev: &DeviceRecord) -> Result<Option<Pvid>, SysError> {
        Ok(self.map.get(&dev.name).copied())
    }
}

pub fn file_line_for(path_contents: &str, needle: &str) -> Option<String> {
    path_contents
        .lines()
        .find(|line| line.contains(needle))
        .map(str::to_string)
}

pub fn version_line(path: &Path) -> String {
    let text = fs::read_to_string(path).expect("devices file");
    text.lines()
        .find(|line| line.starts_with("VERSION="))
        .expect("version line")
        .to_string()
}
