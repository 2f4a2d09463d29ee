use bytes::{BufMut, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Default maximum line length: 1 MiB.
///
/// A full 32 KiB chunk encodes to roughly 44 KiB, so this leaves ample room
/// while bounding memory for an unterminated line.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// Append one line plus its `\n` terminator to `dst`.
///
/// `line` must not itself contain a newline; callers split first.
pub fn encode_line(line: &str, dst: &mut BytesMut) {
    dst.reserve(line.len() + 1);
    dst.put_slice(line.as_bytes());
    dst.put_u8(b'\n');
}

/// Newline-delimited codec for [`tokio_util::codec::FramedRead`].
///
/// Framing is delegated to [`AnyDelimiterCodec`], which resumes its search
/// where the previous call stopped. A trailing `\r` is dropped and bytes
/// that are not valid UTF-8 are replaced, never rejected.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: AnyDelimiterCodec,
    max_line: usize,
}

impl LineCodec {
    /// Create a codec with the default [`DEFAULT_MAX_LINE`] limit.
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Create a codec with an explicit line limit.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_line,
            ),
            max_line,
        }
    }

    /// Current line limit.
    pub fn max_line(&self) -> usize {
        self.max_line
    }

    fn map_error(&self, err: AnyDelimiterCodecError, buffered: usize) -> FrameError {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => FrameError::LineTooLong {
                len: buffered,
                max: self.max_line,
            },
            AnyDelimiterCodecError::Io(err) => FrameError::Io(err),
        }
    }
}

fn to_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(line).into_owned()
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let buffered = src.len();
        match self.inner.decode(src) {
            Ok(line) => Ok(line.map(|raw| to_line(&raw))),
            Err(err) => Err(self.map_error(err, buffered)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let buffered = src.len();
        match self.inner.decode_eof(src) {
            Ok(line) => Ok(line.map(|raw| to_line(&raw))),
            Err(err) => Err(self.map_error(err, buffered)),
        }
    }
}

impl Encoder<&str> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<()> {
        encode_line(line, dst);
        Ok(())
    }
}
