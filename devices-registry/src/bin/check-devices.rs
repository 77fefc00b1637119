// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use devices_registry::{ReadState, Registry};
use devices_sys::LockMode;
use devices_types::{Config, IdentityKind, Pvid, UseEntry};

#[derive(Debug, Parser)]
#[command(name = "check-devices")]
#[command(about = "Inspect the devices file and report its entries")]
struct Args {
    #[arg(long)]
    system_dir: Option<PathBuf>,

    /// Use an alternate devices file under the devices directory.
    #[arg(long)]
    devicesfile: Option<String>,

    #[arg(long)]
    json: bool,

    /// Exit non-zero if any entry is unusable (missing idname or unknown
    /// identity kind).
    #[arg(long)]
    check: bool,
}

#[derive(Debug, Serialize)]
struct EntryReport {
    idtype: Option<String>,
    idname: Option<String>,
    devname: Option<String>,
    pvid: Option<Pvid>,
    part: u32,
}

#[derive(Debug, Serialize)]
struct FileReport {
    path: PathBuf,
    system_id: Option<String>,
    version: Option<String>,
    entries: Vec<EntryReport>,
}

fn report_entry(entry: &UseEntry) -> EntryReport {
    EntryReport {
        idtype: entry.idtype.map(|kind| kind.as_str().to_string()),
        idname: entry.idname.clone(),
        devname: entry.devname.clone(),
        pvid: entry.pvid,
        part: entry.part,
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = Config::default();
    if let Some(system_dir) = args.system_dir {
        config.system_dir = system_dir;
    }
    config.devicesfile = args.devicesfile;

    let mut registry = Registry::new(config, "check-devices");
    registry.lock(LockMode::Shared)?;
    let state = registry.read();
    registry.unlock();

    if state? == ReadState::Disabled {
        println!("devices file not in use");
        return Ok(ExitCode::SUCCESS);
    }

    let report = FileReport {
        path: registry.path().to_path_buf(),
        system_id: registry.file_system_id.clone(),
        version: registry.version.map(|version| version.to_string()),
        entries: registry.entries.iter().map(report_entry).collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("devices file {}", report.path.display());
        println!(
            "system id {}  version {}",
            report.system_id.as_deref().unwrap_or("."),
            report.version.as_deref().unwrap_or(".")
        );
        println!();
        println!("{:<12} {:<36} {:<16} {:<34} PART", "IDTYPE", "IDNAME", "DEVNAME", "PVID");
        for entry in &report.entries {
            println!(
                "{:<12} {:<36} {:<16} {:<34} {}",
                entry.idtype.as_deref().unwrap_or("."),
                entry.idname.as_deref().unwrap_or("."),
                entry.devname.as_deref().unwrap_or("."),
                entry
                    .pvid
                    .map(|pvid| pvid.to_string())
                    .unwrap_or_else(|| ".".to_string()),
                entry.part
            );
        }
    }

    if args.check {
        let bad = registry
            .entries
            .iter()
            .filter(|entry| entry.idname.is_none() || entry.idtype.is_none())
            .count();
        if bad > 0 {
            eprintln!("{bad} entries need attention");
            return Ok(ExitCode::FAILURE);
        }
        let devname_entries = registry
            .entries
            .iter()
            .filter(|entry| entry.idtype == Some(IdentityKind::Devname))
            .count();
        if devname_entries > 0 {
            println!("{devname_entries} entries use the unstable devname kind");
        }
    }

    Ok(ExitCode::SUCCESS)
}
