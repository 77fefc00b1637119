// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock busy: {0}")]
    LockBusy(PathBuf),

    #[error("lock state error: {0}")]
    LockState(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
