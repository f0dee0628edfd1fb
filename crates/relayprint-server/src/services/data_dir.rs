// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::io;
use std::path::{Path, PathBuf};

/// Overrides every other location when set.
pub const DATA_DIR_ENV: &str = "RELAYPRINT_DATA_DIR";

/// Return the application data directory, creating it if needed.
///
/// In the Home Assistant add-on `RELAYPRINT_DATA_DIR` points at `/data`, which
/// survives add-on restarts.
pub fn data_dir() -> io::Result<PathBuf> {
    let dir = resolve(|key| std::env::var(key).ok());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Return a subdirectory inside `base` (e.g. "print_jobs"), creating it.
pub fn data_subdir(base: &Path, name: &str) -> io::Result<PathBuf> {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn resolve(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    let set = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = set(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    // Try XDG data dir, then fallback to home
    if let Some(xdg) = set("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("relayprint");
    }
    if let Some(home) = set("HOME") {
        return PathBuf::from(home).join(".local").join("share").join("relayprint");
    }
    // Last resort
    PathBuf::from("/tmp/relayprint")
}
