//! Local file names for received payloads.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::error::{Result, StoreError};

const FALLBACK_NAME: &str = "received_file";

/// Reduce a sender-supplied name to a safe base name.
///
/// Directory parts (either separator) are dropped, and characters that are
/// unsafe on common filesystems are replaced with `_`.
pub fn sanitize_name(remote: &str) -> String {
    let base = remote
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return FALLBACK_NAME.to_string();
    }
    base.chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Candidate name for the `n`th collision: `report.txt` -> `report_2.txt`.
pub fn numbered_name(name: &str, n: u32) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    }
}

/// Create a new file for `name` in `dir` without replacing anything.
///
/// Tries `name`, then `name_1`, `name_2` and so on up to `max_suffix`.
pub fn create_unique(dir: &Path, name: &str, max_suffix: u32) -> Result<(PathBuf, File)> {
    for n in 0..=max_suffix {
        let candidate = if n == 0 {
            dir.join(name)
        } else {
            dir.join(numbered_name(name, n))
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(StoreError::Io {
                    path: candidate,
                    source,
                })
            }
        }
    }
    Err(StoreError::NamesExhausted {
        dir: dir.to_path_buf(),
        name: name.to_string(),
    })
}

/// `screenshot_<YYYYmmdd_HHMMSS>.png` for the given instant.
pub fn screenshot_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("screenshot_{}.png", at.format("%Y%m%d_%H%M%S"))
}
