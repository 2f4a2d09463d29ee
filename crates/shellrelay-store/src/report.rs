use std::path::PathBuf;

use serde::Serialize;

use crate::archive::ArchiveCheck;

/// A received file, as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    /// Name declared by the sender.
    pub remote_name: String,
    /// Where the bytes landed.
    pub path: PathBuf,
    pub declared_size: u64,
    pub written: u64,
    pub size_mismatch: bool,
    pub chunks: u64,
    pub decode_errors: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveCheck>,
}

/// A received screenshot, as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotReport {
    pub path: PathBuf,
    pub declared_size: u64,
    /// Decoded image size.
    pub bytes: u64,
    pub size_mismatch: bool,
    pub width: u32,
    pub height: u32,
    pub lines: u64,
    pub elapsed_ms: u64,
}
