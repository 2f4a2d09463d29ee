use std::path::PathBuf;

/// Controls where and how received payloads are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory receiving files and screenshots. Created on first write.
    pub dest_dir: PathBuf,
    /// When true, received `.zip`, `.jar` and `.tar` files are opened and
    /// their entries counted.
    pub check_archives: bool,
    /// Highest `_N` suffix tried when a file name is already taken.
    pub max_name_suffix: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::from("."),
            check_archives: true,
            max_name_suffix: 10_000,
        }
    }
}

impl StoreConfig {
    /// Default config writing into `dest_dir`.
    pub fn in_dir(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            ..Self::default()
        }
    }
}
