/// Errors that can occur while writing or reading the line protocol.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A single line exceeded the configured maximum length.
    #[error("line too long ({len} bytes, max {max})")]
    LineTooLong { len: usize, max: usize },

    /// An I/O error occurred on the connection.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed while a write was in progress.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reading the local source of a file frame failed mid-transfer.
    ///
    /// The connection is still usable; the frame was aborted with an inline
    /// error notice and no end marker.
    #[error("failed reading {name}: {source}")]
    SourceRead {
        name: String,
        source: std::io::Error,
    },
}

impl FrameError {
    /// True when the connection must be considered dead.
    pub fn is_transport(&self) -> bool {
        !matches!(self, FrameError::SourceRead { .. })
    }
}

/// Why a single chunk line could not be decoded.
///
/// Always recoverable: the demultiplexer counts it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    /// The `CHUNK:` header is present but its fields cannot be parsed.
    #[error("malformed chunk header: {0}")]
    MalformedHeader(String),

    /// The header's encoded length disagrees with the payload carried.
    #[error("chunk {seq} declares {declared} encoded bytes but carries {actual}")]
    LengthMismatch {
        seq: u64,
        declared: usize,
        actual: usize,
    },

    /// No decode strategy accepted the payload.
    #[error("payload of {len} characters is not valid base64")]
    Undecodable { len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
