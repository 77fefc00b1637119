// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SysError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Outcome of a lock acquisition. `already_held` is set when the caller
/// re-entered at the mode it already holds; the paired release must then be
/// a no-op.
#[derive(Debug, Clone, Copy)]
pub struct LockAcquired {
    pub already_held: bool,
}

/// Advisory whole-file lock on the registry's sibling lockfile.
///
/// The lockfile is created on first use. Re-locking at the held mode
/// succeeds and reports `already_held`; requesting a different mode while
/// locked is a state error rather than an upgrade.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
    mode: Option<LockMode>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLock {
            path: path.into(),
            file: None,
            mode: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Option<LockMode> {
        self.mode
    }

    pub fn lock(&mut self, mode: LockMode, nonblock: bool) -> Result<LockAcquired> {
        if self.mode == Some(mode) {
            return Ok(LockAcquired { already_held: true });
        }
        if self.mode.is_some() {
            return Err(SysError::LockState(format!(
                "lockfile {} already held in a different mode",
                self.path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&self.path)?;

        let mut op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        if nonblock {
            op |= libc::LOCK_NB;
        }

        let ret = unsafe { libc::flock(file.as_raw_fd(), op) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(SysError::LockBusy(self.path.clone()));
            }
            return Err(SysError::Io(err));
        }

        self.file = Some(file);
        self.mode = Some(mode);
        Ok(LockAcquired {
            already_held: false,
        })
    }

    /// Release the lock. Dropping the file closes the descriptor, which
    /// releases the flock.
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            if ret != 0 {
                tracing::warn!(
                    path = %self.path.display(),
                    "devices file unlock failed: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
        self.mode = None;
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.unlock();
    }
}
