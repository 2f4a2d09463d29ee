//! Chunk codec: binary segments as text-safe lines.
//!
//! Wire format of one chunk:
//! ```text
//! CHUNK:<seq>:<encodedLen>:<standard base64 of the segment>\n
//! ```
//! The header is optional on input. A line without it is decoded as a bare
//! payload, which keeps older senders working.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

use crate::error::ChunkError;
use crate::wire::CHUNK_PREFIX;

/// Default size of the binary segment carried by one chunk: 32 KiB.
pub const DEFAULT_SEGMENT_SIZE: usize = 32 * 1024;

/// Parsed `CHUNK:` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// 1-based sequence number within the frame.
    pub seq: u64,
    /// Length of the encoded payload in characters.
    pub encoded_len: usize,
}

/// A successfully decoded chunk line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    /// `None` for legacy, header-less lines.
    pub header: Option<ChunkHeader>,
    pub bytes: Vec<u8>,
}

/// One way of turning cleaned payload text into bytes.
///
/// Strategies are pure; [`DECODE_STRATEGIES`] is tried in order and the
/// first success wins.
#[derive(Debug, Clone, Copy)]
pub struct DecodeStrategy {
    pub name: &'static str,
    decode: fn(&str) -> Option<Vec<u8>>,
}

impl DecodeStrategy {
    /// Run this strategy against an already cleaned payload.
    pub fn apply(&self, payload: &str) -> Option<Vec<u8>> {
        (self.decode)(payload)
    }
}

/// Decode fallbacks, in the order they are attempted.
pub const DECODE_STRATEGIES: &[DecodeStrategy] = &[
    DecodeStrategy {
        name: "standard",
        decode: decode_standard,
    },
    DecodeStrategy {
        name: "standard-no-pad",
        decode: decode_standard_no_pad,
    },
];

fn decode_standard(payload: &str) -> Option<Vec<u8>> {
    STANDARD.decode(payload).ok()
}

fn decode_standard_no_pad(payload: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD.decode(payload.trim_end_matches('=')).ok()
}

/// Encode one segment as a complete chunk line, newline included.
pub fn encode_chunk(seq: u64, segment: &[u8]) -> String {
    let encoded = STANDARD.encode(segment);
    format!("{CHUNK_PREFIX}{seq}:{}:{encoded}\n", encoded.len())
}

/// Decode one chunk line, headered or legacy.
pub fn decode_chunk(line: &str) -> Result<DecodedChunk, ChunkError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix(CHUNK_PREFIX) else {
        return Ok(DecodedChunk {
            header: None,
            bytes: decode_payload(line)?,
        });
    };

    let mut parts = rest.splitn(3, ':');
    let (Some(seq), Some(encoded_len), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ChunkError::MalformedHeader(truncate_for_log(line)));
    };
    let seq: u64 = seq
        .parse()
        .map_err(|_| ChunkError::MalformedHeader(format!("bad sequence number {seq:?}")))?;
    let encoded_len: usize = encoded_len
        .parse()
        .map_err(|_| ChunkError::MalformedHeader(format!("bad length {encoded_len:?}")))?;

    let cleaned = clean_payload(payload);
    if cleaned.len() != encoded_len {
        return Err(ChunkError::LengthMismatch {
            seq,
            declared: encoded_len,
            actual: cleaned.len(),
        });
    }

    Ok(DecodedChunk {
        header: Some(ChunkHeader { seq, encoded_len }),
        bytes: decode_cleaned(cleaned)?,
    })
}

/// Decode bare payload text (a legacy chunk or a whole screenshot body).
pub fn decode_payload(text: &str) -> Result<Vec<u8>, ChunkError> {
    decode_cleaned(clean_payload(text))
}

/// Remove whitespace and any line breaks introduced in transit.
pub fn clean_payload(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn decode_cleaned(mut payload: String) -> Result<Vec<u8>, ChunkError> {
    // Naive splitting upstream can drop trailing padding.
    while payload.len() % 4 != 0 {
        payload.push('=');
    }

    DECODE_STRATEGIES
        .iter()
        .find_map(|strategy| strategy.apply(&payload))
        .ok_or(ChunkError::Undecodable { len: payload.len() })
}

fn truncate_for_log(line: &str) -> String {
    const MAX: usize = 48;
    match line.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}
