// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// The temporary sibling a pending write goes to.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push("_new");
    path.with_file_name(name)
}

/// Replace `path` with `contents` so that a crash at any point leaves either
/// the prior file or the new one: write to `<path>_new`, flush, rename over
/// the target, then fsync the parent directory.
pub fn replace_file_contents(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);

    // a previous crashed write may have left the temp file behind
    let _ = fs::remove_file(&tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;

    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }

    Ok(())
}
