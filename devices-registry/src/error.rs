// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

use devices_sys::SysError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("devices file {path:?} does not exist")]
    FileMissing { path: PathBuf },

    #[error("devices file {path:?} cannot be updated: {reason}")]
    FileUnparseable { path: PathBuf, reason: String },

    #[error("devices file version {found} is newer than supported {supported}")]
    VersionTooNew { found: String, supported: String },

    #[error("devices file lock is busy: {path:?}")]
    LockBusy { path: PathBuf },

    #[error("device {devname} conflicts with an existing entry: {reason}")]
    IdentityConflict { devname: String, reason: String },

    #[error("no devices file entry for {what}")]
    EntryNotFound { what: String },

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
