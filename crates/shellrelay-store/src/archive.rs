//! Advisory integrity check for received archives.

use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, StoreError};

/// Archive formats that get opened after download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    Tar,
}

impl ArchiveKind {
    /// Detect the format from the file extension. `.jar` files are zips.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "zip" | "jar" => Some(ArchiveKind::Zip),
            "tar" => Some(ArchiveKind::Tar),
            _ => None,
        }
    }
}

/// Outcome of opening a received archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveCheck {
    Valid { kind: ArchiveKind, entries: usize },
    Corrupt { kind: ArchiveKind, reason: String },
}

/// Open the archive at `path` and count its entries.
pub fn inspect(path: &Path, kind: ArchiveKind) -> Result<usize> {
    let corrupt = |reason: String| StoreError::Archive {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match kind {
        ArchiveKind::Zip => {
            let archive = zip::ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;
            Ok(archive.len())
        }
        ArchiveKind::Tar => {
            let mut archive = tar::Archive::new(file);
            let mut entries = 0usize;
            for entry in archive.entries().map_err(|err| corrupt(err.to_string()))? {
                entry.map_err(|err| corrupt(err.to_string()))?;
                entries += 1;
            }
            Ok(entries)
        }
    }
}

/// Run [`inspect`] and fold the outcome into an [`ArchiveCheck`].
pub fn check(path: &Path, kind: ArchiveKind) -> ArchiveCheck {
    match inspect(path, kind) {
        Ok(entries) => ArchiveCheck::Valid { kind, entries },
        Err(err) => ArchiveCheck::Corrupt {
            kind,
            reason: err.to_string(),
        },
    }
}
