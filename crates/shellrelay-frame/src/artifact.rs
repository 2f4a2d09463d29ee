use std::time::Duration;

use bytes::Bytes;

/// A reassembled file frame, ready for the materializer.
#[derive(Debug, Clone)]
pub struct FileArtifact {
    /// Name declared by the sender. Not sanitized.
    pub name: String,
    /// Size declared in the start marker. Advisory.
    pub declared_size: u64,
    /// Decoded bytes in arrival order.
    pub data: Bytes,
    /// Chunks decoded successfully.
    pub chunks: u64,
    /// Chunks skipped because they failed to decode.
    pub decode_errors: u64,
    /// Time from start marker to end marker.
    pub elapsed: Duration,
}

impl FileArtifact {
    /// Actual number of bytes received.
    pub fn received(&self) -> u64 {
        self.data.len() as u64
    }

    /// True when the received size differs from the declared one.
    pub fn size_mismatch(&self) -> bool {
        self.received() != self.declared_size
    }
}

/// A reassembled screenshot frame. The body is still encoded.
#[derive(Debug, Clone)]
pub struct ScreenshotArtifact {
    /// Image size in bytes declared in the start marker. Advisory.
    pub declared_size: u64,
    /// Concatenated base64 text of every body line.
    pub encoded: String,
    /// Number of body lines received.
    pub lines: u64,
    pub elapsed: Duration,
}

/// Snapshot of an in-progress file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub name: String,
    pub received: u64,
    pub expected: u64,
    /// `None` when the sender declared a size of zero.
    pub percent: Option<u8>,
    pub chunks: u64,
    pub elapsed: Duration,
}

impl TransferProgress {
    /// Average throughput in bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.received as f64 / secs
        } else {
            0.0
        }
    }
}
