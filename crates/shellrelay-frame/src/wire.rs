//! Protocol markers.
//!
//! Every frame on the stream is a run of newline-terminated ASCII lines.
//! Text frames have no start marker and end with [`RESPONSE_END`]; file and
//! screenshot frames are bracketed by their own start/end markers. Marker
//! lines are reserved: the encoder escapes command output that would collide
//! with one.

use std::borrow::Cow;

/// Closes a text frame (and, by convention, every response).
pub const RESPONSE_END: &str = "---END---";

/// Opens a file frame: `FILE_TRANSFER_START:<name>:<size>`.
pub const FILE_START_PREFIX: &str = "FILE_TRANSFER_START:";

/// Closes a file frame.
pub const FILE_END: &str = "FILE_TRANSFER_END";

/// Prefix of a headered chunk line: `CHUNK:<seq>:<encodedLen>:<payload>`.
pub const CHUNK_PREFIX: &str = "CHUNK:";

/// Opens a screenshot frame: `SCREENSHOT_START:<size>`.
pub const SCREENSHOT_START_PREFIX: &str = "SCREENSHOT_START:";

/// Closes a screenshot frame.
pub const SCREENSHOT_END: &str = "SCREENSHOT_END";

/// Inline abort notice written by the agent when a file read fails mid-frame.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Payload kind of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    File,
    Screenshot,
}

impl FrameKind {
    /// Returns a human-readable name for the frame kind.
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Text => "text",
            FrameKind::File => "file",
            FrameKind::Screenshot => "screenshot",
        }
    }
}

/// A recognised marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker<'a> {
    ResponseEnd,
    FileStart { name: &'a str, size: u64 },
    FileEnd,
    ScreenshotStart { size: u64 },
    ScreenshotEnd,
    TransferError { message: &'a str },
}

impl<'a> Marker<'a> {
    /// Classify a line (without its terminator).
    ///
    /// Trailing whitespace is ignored; leading whitespace is not, which is
    /// what makes escaped output lines unambiguous.
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim_end();
        match line {
            RESPONSE_END => return Some(Marker::ResponseEnd),
            FILE_END => return Some(Marker::FileEnd),
            SCREENSHOT_END => return Some(Marker::ScreenshotEnd),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix(FILE_START_PREFIX) {
            // Split from the right so names containing ':' survive.
            let (name, size) = rest.rsplit_once(':')?;
            if name.is_empty() {
                return None;
            }
            let size = size.parse().ok()?;
            return Some(Marker::FileStart { name, size });
        }

        if let Some(rest) = line.strip_prefix(SCREENSHOT_START_PREFIX) {
            let size = rest.parse().ok()?;
            return Some(Marker::ScreenshotStart { size });
        }

        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            return Some(Marker::TransferError { message });
        }

        None
    }

    /// The wire form of this marker, newline included.
    pub fn to_line(&self) -> String {
        match self {
            Marker::ResponseEnd => format!("{RESPONSE_END}\n"),
            Marker::FileStart { name, size } => format!("{FILE_START_PREFIX}{name}:{size}\n"),
            Marker::FileEnd => format!("{FILE_END}\n"),
            Marker::ScreenshotStart { size } => format!("{SCREENSHOT_START_PREFIX}{size}\n"),
            Marker::ScreenshotEnd => format!("{SCREENSHOT_END}\n"),
            Marker::TransferError { message } => format!("{ERROR_PREFIX}{message}\n"),
        }
    }
}

/// Returns true if a text line would be taken for a frame marker.
///
/// `ERROR:` lines only carry meaning inside a file frame, where text output
/// never appears, so they are not reserved.
pub fn is_reserved(line: &str) -> bool {
    matches!(
        Marker::parse(line),
        Some(marker) if !matches!(marker, Marker::TransferError { .. })
    )
}

/// Escape a line of command output so it cannot be read as a marker.
pub fn escape_text_line(line: &str) -> Cow<'_, str> {
    if is_reserved(line) {
        Cow::Owned(format!(" {line}"))
    } else {
        Cow::Borrowed(line)
    }
}
