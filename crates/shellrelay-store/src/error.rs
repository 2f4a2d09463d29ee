use std::path::PathBuf;

use shellrelay_frame::ChunkError;

/// Errors that can occur while materializing a received payload.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The destination could not be created or written.
    #[error("failed writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The screenshot body is not valid base64.
    #[error("screenshot payload could not be decoded: {0}")]
    Decode(#[from] ChunkError),

    /// The screenshot decoded but is not a readable PNG image.
    #[error("screenshot is not a valid PNG image: {0}")]
    InvalidImage(String),

    /// A received archive could not be opened. Advisory only.
    #[error("archive {} looks corrupted: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    /// The background save task panicked or was cancelled.
    #[error("save task failed: {0}")]
    Task(String),

    /// Every candidate file name in the destination is taken.
    #[error("no free file name for {name} in {}", dir.display())]
    NamesExhausted { dir: PathBuf, name: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
