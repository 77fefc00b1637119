// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the device-identity registry
//!
//! This crate provides the direct system interfaces the registry core sits
//! on top of:
//! - sysfs block-attribute reads (with partition-to-primary fallback)
//! - per-kind identity reads and sanitisation
//! - the advisory whole-file lock protocol
//! - atomic replace of the devices file
//! - the 4 KiB PV-header read used by the renamed-device search
//! - multipath component detection and multipath.conf blacklist ingest
//!
//! Everything here is synchronous; the registry is single-threaded and the
//! only inter-process synchroniser is the flock taken in [`lock`].

pub mod atomic;
pub mod error;
pub mod identity;
pub mod lock;
pub mod mpath;
pub mod pvheader;
pub mod sysfs;

pub use error::{Result, SysError};
pub use lock::{FileLock, LockMode};
pub use mpath::{ExternalDeviceInfo, MpathDetector};
pub use sysfs::Sysfs;
