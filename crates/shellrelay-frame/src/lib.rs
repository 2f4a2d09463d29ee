//! Line protocol between a shellrelay agent and its console.
//!
//! Everything on the wire is a newline-terminated line. A response is one
//! of three frames:
//! - text: output lines closed by `---END---`
//! - file: `FILE_TRANSFER_START`, `CHUNK:` lines, `FILE_TRANSFER_END`
//! - screenshot: `SCREENSHOT_START`, base64 lines, `SCREENSHOT_END`
//!
//! [`FrameEncoder`] writes frames on the agent side. On the console side
//! [`LineCodec`] splits the stream and [`Demultiplexer`] turns lines into
//! [`DemuxEvent`]s without doing any I/O of its own.

pub mod artifact;
pub mod chunk;
pub mod codec;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod wire;

pub use artifact::{FileArtifact, ScreenshotArtifact, TransferProgress};
pub use chunk::{
    clean_payload, decode_chunk, decode_payload, encode_chunk, ChunkHeader, DecodeStrategy,
    DecodedChunk, DECODE_STRATEGIES, DEFAULT_SEGMENT_SIZE,
};
pub use codec::{encode_line, LineCodec, DEFAULT_MAX_LINE};
pub use demux::{DemuxConfig, DemuxEvent, DemuxState, Demultiplexer};
pub use encoder::{EncoderConfig, FrameEncoder, TransferSummary, DEFAULT_SCREENSHOT_LINE_LEN};
pub use error::{ChunkError, FrameError, Result};
pub use wire::{escape_text_line, FrameKind, Marker, RESPONSE_END};
