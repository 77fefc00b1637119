// SPDX-License-Identifier: GPL-3.0-only

//! Device-identity registry
//!
//! Decides, stably across reboots, renames, and hotplug events, which block
//! devices on a host the volume manager is allowed to touch. Operators list
//! a device once; every later command recognises it by identity even when
//! the kernel name changed, detects impostors that reused an old name, and
//! refuses unlisted devices.
//!
//! The flow of one command:
//!
//! 1. [`Registry::read`] loads the devices file into use-entries
//! 2. [`matcher::match_all`] pairs entries against the device cache
//! 3. the scan pipeline reads PV headers for devices passing
//!    [`filter::is_listed`]
//! 4. [`validate::validate`] reconciles the entries against the PVIDs read
//!    from disk
//! 5. [`search::find_renamed`] re-pairs devname entries orphaned by a
//!    rename
//! 6. if anything changed, the file is rewritten under the advisory lock
//!
//! The registry is a single value passed through the call graph; there is
//! no global state, and concurrency between commands is handled solely by
//! the lock in [`devices_sys::lock`].

pub mod contracts;
pub mod error;
pub mod file;
pub mod filter;
pub mod matcher;
pub mod registry;
pub mod search;
pub mod validate;

pub use contracts::{ExternalDeviceInfo, FilterChain, HeaderPvidReader, PvCache, PvidReader};
pub use error::{RegistryError, Result};
pub use file::ReadState;
pub use filter::{is_listed, metadata_hint, MetadataHint};
pub use registry::{AddOptions, Registry};
pub use search::{find_renamed, SearchOptions, SearchOutcome};
pub use validate::{validate, ValidateOptions, ValidateOutcome};
