// SPDX-License-Identifier: GPL-3.0-only

//! Reading and writing the devices file.
//!
//! The format is line-oriented ASCII. `#` starts a comment, `SYSTEMID=` and
//! `VERSION=` are header lines, every other line is one entry of
//! `KEY=value` fields in any order. A literal `.` in a field means absent.

use std::fs;

use devices_sys::atomic;
use devices_types::{FileVersion, IdentityKind, Pvid, UseEntry, DEVICES_FILE_MAJOR};

use crate::error::{RegistryError, Result};
use crate::registry::Registry;

/// Outcome of loading the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Loaded,
    /// The feature is off: disabled by configuration, or the file does not
    /// exist on this host.
    Disabled,
}

/// Find `KEY=` in a whitespace-separated line and return its value, cut at
/// the next whitespace. Returns `None` when the key is missing; a value of
/// `.` comes back as `Some(None)`.
fn field_value<'a>(line: &'a str, key: &str) -> Option<Option<&'a str>> {
    for token in line.split_whitespace() {
        if let Some(value) = token.strip_prefix(key) {
            if let Some(value) = value.strip_prefix('=') {
                if value.is_empty() || value == "." {
                    return Some(None);
                }
                return Some(Some(value));
            }
        }
    }
    None
}

fn parse_entry_line(line: &str) -> Option<UseEntry> {
    // these two are the minimum required
    let idtype = field_value(line, "IDTYPE")?;
    let idname = field_value(line, "IDNAME")?;

    let mut entry = UseEntry::default();
    entry.idtype = idtype.and_then(IdentityKind::from_tag);
    entry.idname = idname.map(str::to_string);
    entry.devname = field_value(line, "DEVNAME")
        .flatten()
        .map(str::to_string);
    entry.pvid = field_value(line, "PVID").flatten().and_then(Pvid::parse);
    entry.part = field_value(line, "PART")
        .flatten()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    Some(entry)
}

impl Registry {
    /// Load the devices file into the registry. A missing file means the
    /// feature is disabled on this host, not an error; callers that require
    /// the file use [`Registry::read_required`].
    pub fn read(&mut self) -> Result<ReadState> {
        if !self.config.enable_devices_file {
            return Ok(ReadState::Disabled);
        }

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "devices file does not exist");
                return Ok(ReadState::Disabled);
            }
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %self.path.display(), "reading devices file");

        self.entries.clear();
        self.file_system_id = None;
        self.version = None;
        self.version_raw = None;
        self.version_line_bad = false;

        for line in text.lines() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            if let Some(value) = field_value(line, "SYSTEMID") {
                self.file_system_id = value.map(str::to_string);
                let local = self.config.system_id.as_deref();
                if self.file_system_id.as_deref() != local {
                    tracing::warn!(
                        file_system_id = self.file_system_id.as_deref().unwrap_or("none"),
                        local_system_id = local.unwrap_or("none"),
                        "devices file has unmatching system id"
                    );
                }
                continue;
            }

            if let Some(value) = field_value(line, "VERSION") {
                self.version_raw = value.map(str::to_string);
                match value {
                    Some(raw) => match FileVersion::parse(raw) {
                        Some(version) => self.version = Some(version),
                        None => {
                            tracing::warn!(raw, "devices file version is unparseable");
                            self.version_line_bad = true;
                        }
                    },
                    None => self.version_line_bad = true,
                }
                continue;
            }

            match parse_entry_line(line) {
                Some(entry) => self.entries.push(entry),
                None => tracing::warn!(line, "failed to process devices file entry"),
            }
        }

        self.enabled = true;
        self.dirty = false;
        Ok(ReadState::Loaded)
    }

    /// Like [`Registry::read`], but a missing file is an error.
    pub fn read_required(&mut self) -> Result<()> {
        match self.read()? {
            ReadState::Loaded => Ok(()),
            ReadState::Disabled => Err(RegistryError::FileMissing {
                path: self.path.clone(),
            }),
        }
    }

    fn serialize(&self, version: FileVersion) -> String {
        let mut out = String::new();
        out.push_str("# Devices listed in this file are the only ones the volume manager uses.\n");
        out.push_str(&format!(
            "# Created by command {} pid {}\n",
            self.command_name,
            std::process::id()
        ));

        if let Some(system_id) = &self.config.system_id {
            out.push_str(&format!("SYSTEMID={system_id}\n"));
        }
        out.push_str(&format!("VERSION={version}\n"));

        for entry in &self.entries {
            let idtype = entry
                .idtype
                .map(IdentityKind::as_str)
                .unwrap_or(".");
            let idname = entry.idname.as_deref().unwrap_or(".");
            let devname = match entry.devname.as_deref() {
                Some(name) if name.starts_with('/') => name,
                _ => ".",
            };
            let pvid = entry
                .pvid
                .as_ref()
                .map(Pvid::to_string)
                .unwrap_or_else(|| ".".to_string());

            if entry.part > 0 {
                out.push_str(&format!(
                    "IDTYPE={idtype} IDNAME={idname} DEVNAME={devname} PVID={pvid} PART={}\n",
                    entry.part
                ));
            } else {
                out.push_str(&format!(
                    "IDTYPE={idtype} IDNAME={idname} DEVNAME={devname} PVID={pvid}\n"
                ));
            }
        }
        out
    }

    /// Write the registry back to the devices file atomically, bumping the
    /// version counter.
    ///
    /// `pvs_seen` feeds the implicit-creation rule: a creation command with
    /// no existing file only creates one when the scan saw no PVs already
    /// on the host.
    pub fn write(&mut self, pvs_seen: usize) -> Result<()> {
        if !self.enabled && !self.pending_create {
            return Ok(());
        }
        if self.from_list {
            return Ok(());
        }

        if self.pending_create && !self.enabled {
            if !self.config.uses_system_file() || self.file_exists() {
                // pending creation only applies to a brand-new system file
            } else if pvs_seen > 0 {
                tracing::warn!("not creating devices file due to existing PVs");
                self.entries.clear();
                self.pending_create = false;
                return Ok(());
            } else {
                tracing::info!(path = %self.path.display(), "creating devices file");
            }
            self.enabled = true;
        }

        if self.version_line_bad {
            return Err(RegistryError::FileUnparseable {
                path: self.path.clone(),
                reason: "version header did not parse".to_string(),
            });
        }
        if let Some(version) = self.version {
            if version.major > DEVICES_FILE_MAJOR {
                return Err(RegistryError::VersionTooNew {
                    found: version.to_string(),
                    supported: format!("{DEVICES_FILE_MAJOR}"),
                });
            }
        }

        let version = self
            .version
            .map(FileVersion::next)
            .unwrap_or_else(FileVersion::first);
        let contents = self.serialize(version);

        atomic::replace_file_contents(&self.path, contents.as_bytes())?;

        // as if we had read this version, in case we write again
        self.version = Some(version);
        self.version_raw = Some(version.to_string());
        self.dirty = false;
        self.unlink_sentinel();

        tracing::debug!(version = %version, "wrote devices file");
        Ok(())
    }

    /// Whether the on-disk version header still matches what this registry
    /// read or wrote last. The comparison is textual, like the counter it
    /// protects.
    pub fn version_unchanged(&self) -> bool {
        let Ok(text) = fs::read_to_string(&self.path) else {
            tracing::warn!(path = %self.path.display(), "cannot open devices file to read");
            return false;
        };

        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            if let Some(value) = field_value(line, "VERSION") {
                let on_disk = value.map(str::to_string);
                tracing::debug!(
                    on_disk = on_disk.as_deref().unwrap_or("."),
                    prev = self.version_raw.as_deref().unwrap_or("."),
                    "checking devices file version"
                );
                return on_disk == self.version_raw;
            }
        }
        false
    }

    /// Best-effort update after validation or a rename search. Uses a
    /// non-blocking lock and only writes when the file is unchanged since
    /// it was read; any failure is swallowed, the next command will make
    /// the same corrections.
    pub fn update_try(&mut self) {
        let held = match self.lock_try(devices_sys::LockMode::Exclusive) {
            Ok(acquired) => acquired.already_held,
            Err(_) => {
                tracing::debug!("skipping devices file update (lock busy)");
                return;
            }
        };

        if self.version_unchanged() {
            if let Err(err) = self.write(0) {
                tracing::warn!("devices file update failed: {err}");
            }
        } else {
            tracing::debug!("skipping devices file update (file changed)");
        }

        if !held {
            self.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devices_types::Config;

    fn test_registry(dir: &std::path::Path) -> Registry {
        let mut config = Config::with_root(dir);
        config.system_id = Some("hostA".to_string());
        std::fs::create_dir_all(config.devices_dir()).unwrap();
        std::fs::create_dir_all(&config.lock_dir).unwrap();
        std::fs::create_dir_all(&config.run_dir).unwrap();
        Registry::new(config, "test")
    }

    fn pvid(fill: char) -> Pvid {
        Pvid::parse(&fill.to_string().repeat(32)).expect("valid pvid")
    }

    #[test]
    fn fields_parse_in_any_order() {
        let entry = parse_entry_line(
            "PVID=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa IDNAME=naa.5000 DEVNAME=/dev/sdb IDTYPE=sys_wwid PART=2",
        )
        .expect("entry parses");
        assert_eq!(entry.idtype, Some(IdentityKind::SysWwid));
        assert_eq!(entry.idname.as_deref(), Some("naa.5000"));
        assert_eq!(entry.devname.as_deref(), Some("/dev/sdb"));
        assert_eq!(entry.pvid, Some(pvid('a')));
        assert_eq!(entry.part, 2);
    }

    #[test]
    fn dot_fields_are_absent() {
        let entry =
            parse_entry_line("IDTYPE=devname IDNAME=. DEVNAME=. PVID=.").expect("entry parses");
        assert_eq!(entry.idtype, Some(IdentityKind::Devname));
        assert_eq!(entry.idname, None);
        assert_eq!(entry.devname, None);
        assert_eq!(entry.pvid, None);
        assert_eq!(entry.part, 0);
    }

    #[test]
    fn lines_missing_required_keys_are_skipped() {
        assert!(parse_entry_line("DEVNAME=/dev/sdb PVID=.").is_none());
        assert!(parse_entry_line("IDTYPE=sys_wwid DEVNAME=/dev/sdb").is_none());
    }

    #[test]
    fn unknown_idtype_is_preserved_as_absent() {
        let entry = parse_entry_line("IDTYPE=drbd_uuid IDNAME=x DEVNAME=/dev/drbd0 PVID=.")
            .expect("entry parses");
        assert_eq!(entry.idtype, None);
        assert_eq!(entry.idname.as_deref(), Some("x"));
    }

    #[test]
    fn read_missing_file_reports_disabled() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        assert_eq!(registry.read().expect("read"), ReadState::Disabled);
        assert!(!registry.enabled);
        assert!(matches!(
            registry.read_required(),
            Err(RegistryError::FileMissing { .. })
        ));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        registry.enabled = true;

        let mut entry = UseEntry::new(IdentityKind::SysWwid, "naa.500a1");
        entry.devname = Some("/dev/sdb".to_string());
        entry.pvid = Some(pvid('p'));
        registry.entries.push(entry);

        registry.write(0).expect("write");

        let mut reread = test_registry(dir.path());
        assert_eq!(reread.read().expect("read"), ReadState::Loaded);
        assert_eq!(reread.entries, registry.entries);
        assert_eq!(reread.version, Some(FileVersion::first()));
        assert_eq!(reread.file_system_id.as_deref(), Some("hostA"));
    }

    #[test]
    fn version_counter_increments_per_write() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        registry.enabled = true;

        registry.write(0).expect("first write");
        assert_eq!(registry.version.unwrap().counter, 1);
        registry.write(0).expect("second write");
        assert_eq!(registry.version.unwrap().counter, 2);

        let mut reread = test_registry(dir.path());
        reread.read().expect("read");
        assert_eq!(reread.version.unwrap().counter, 2);
    }

    #[test]
    fn newer_major_refuses_writes_but_reads() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        std::fs::write(
            registry.path(),
            "VERSION=2.0.7\nIDTYPE=devname IDNAME=/dev/sdc DEVNAME=/dev/sdc PVID=.\n",
        )
        .unwrap();

        assert_eq!(registry.read().expect("read"), ReadState::Loaded);
        assert_eq!(registry.entries.len(), 1);
        assert!(matches!(
            registry.write(0),
            Err(RegistryError::VersionTooNew { .. })
        ));
    }

    #[test]
    fn unparseable_version_refuses_writes() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        std::fs::write(registry.path(), "VERSION=squirrel\n").unwrap();

        registry.read().expect("read");
        assert!(matches!(
            registry.write(0),
            Err(RegistryError::FileUnparseable { .. })
        ));
    }

    #[test]
    fn cross_host_file_still_loads() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        std::fs::write(
            registry.path(),
            "SYSTEMID=hostB\nVERSION=1.1.4\nIDTYPE=devname IDNAME=/dev/sdd DEVNAME=/dev/sdd PVID=.\n",
        )
        .unwrap();

        assert_eq!(registry.read().expect("read"), ReadState::Loaded);
        assert_eq!(registry.file_system_id.as_deref(), Some("hostB"));
        assert_eq!(registry.entries.len(), 1);
    }

    #[test]
    fn pending_create_skips_when_pvs_exist() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        registry.begin_create();
        registry
            .entries
            .push(UseEntry::new(IdentityKind::SysWwid, "naa.1"));

        registry.write(3).expect("write is a no-op");
        assert!(!registry.file_exists());
        assert!(registry.entries.is_empty());
    }

    #[test]
    fn pending_create_writes_first_file() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry = test_registry(dir.path());
        registry.begin_create();
        registry
            .entries
            .push(UseEntry::new(IdentityKind::SysWwid, "naa.1"));

        registry.write(0).expect("write creates the file");
        assert!(registry.file_exists());
        assert!(registry.enabled);
        assert_eq!(registry.version, Some(FileVersion::first()));
    }

    #[test]
    fn version_unchanged_detects_racing_writer() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut registry_a = test_registry(dir.path());
        registry_a.enabled = true;
        registry_a.write(0).expect("seed file");

        let mut registry_b = test_registry(dir.path());
        registry_b.read().expect("read");
        assert!(registry_b.version_unchanged());

        registry_a.write(0).expect("racing write");
        assert!(!registry_b.version_unchanged());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_kind() -> impl Strategy<Value = IdentityKind> {
            prop::sample::select(IdentityKind::ALL.to_vec())
        }

        fn arb_token() -> impl Strategy<Value = String> {
            // a lone "." would serialise as the absent marker
            "[a-zA-Z0-9._:-]{1,24}".prop_filter("dot means absent", |token| token != ".")
        }

        fn arb_entry() -> impl Strategy<Value = UseEntry> {
            (
                arb_kind(),
                arb_token(),
                prop::option::of("[a-z0-9]{1,12}"),
                prop::bool::ANY,
                0u32..5,
            )
                .prop_map(|(kind, idname, devbase, has_pvid, part)| UseEntry {
                    idtype: Some(kind),
                    idname: Some(idname),
                    devname: devbase.map(|base| format!("/dev/{base}")),
                    pvid: has_pvid.then(|| pvid('k')),
                    part,
                    dev: None,
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn serialise_then_parse_round_trips(entries in prop::collection::vec(arb_entry(), 0..12)) {
                let dir = tempfile::tempdir().expect("tmpdir");
                let mut registry = test_registry(dir.path());
                registry.enabled = true;
                registry.entries = entries.clone();

                registry.write(0).expect("write");

                let mut reread = test_registry(dir.path());
                reread.read().expect("read");
                prop_assert_eq!(reread.entries, entries);
                prop_assert_eq!(reread.version, registry.version);
            }
        }
    }
}
