//! Console-side stream demultiplexer.
//!
//! [`Demultiplexer`] consumes the response stream one line at a time and
//! classifies each line against its current [`DemuxState`]. It never reads
//! from a socket itself, so every state can be driven directly in tests.
//!
//! | State | Line | Next |
//! |---|---|---|
//! | Idle | `FILE_TRANSFER_START:<name>:<size>` | ReceivingFile |
//! | Idle | `SCREENSHOT_START:<size>` | ReceivingScreenshot |
//! | Idle | `---END---` or any text | Idle |
//! | ReceivingFile | `FILE_TRANSFER_END` or `ERROR:<msg>` | Idle |
//! | ReceivingFile | chunk line or blank | ReceivingFile |
//! | ReceivingScreenshot | `SCREENSHOT_END` | Idle |
//! | ReceivingScreenshot | any other line | ReceivingScreenshot |
//!
//! Start markers are only recognised while idle. Inside a transfer they
//! are treated as body lines like anything else.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::artifact::{FileArtifact, ScreenshotArtifact, TransferProgress};
use crate::chunk::decode_chunk;
use crate::error::ChunkError;
use crate::wire::{FrameKind, Marker};

/// Demultiplexer tuning.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Report progress at least every N chunks, even if the percentage
    /// has not moved (or no size was declared).
    pub progress_chunk_interval: u64,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            progress_chunk_interval: 64,
        }
    }
}

/// Reassembly buffer of an in-progress file frame.
#[derive(Debug)]
pub struct FileAssembly {
    name: String,
    declared_size: u64,
    data: BytesMut,
    chunks: u64,
    decode_errors: u64,
    last_seq: Option<u64>,
    last_percent: Option<u8>,
    started: Instant,
}

impl FileAssembly {
    fn new(name: &str, declared_size: u64) -> Self {
        Self {
            name: name.to_string(),
            declared_size,
            data: BytesMut::with_capacity(initial_capacity(declared_size)),
            chunks: 0,
            decode_errors: 0,
            last_seq: None,
            last_percent: None,
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Decoded bytes accumulated so far.
    pub fn received(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    fn percent(&self) -> Option<u8> {
        if self.declared_size == 0 {
            return None;
        }
        let pct = self.received().saturating_mul(100) / self.declared_size;
        Some(pct.min(100) as u8)
    }

    fn progress(&self) -> TransferProgress {
        TransferProgress {
            name: self.name.clone(),
            received: self.received(),
            expected: self.declared_size,
            percent: self.percent(),
            chunks: self.chunks,
            elapsed: self.started.elapsed(),
        }
    }

    fn finish(self) -> FileArtifact {
        FileArtifact {
            name: self.name,
            declared_size: self.declared_size,
            data: self.data.freeze(),
            chunks: self.chunks,
            decode_errors: self.decode_errors,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Reassembly buffer of an in-progress screenshot frame.
#[derive(Debug)]
pub struct ScreenshotAssembly {
    declared_size: u64,
    encoded: String,
    lines: u64,
    started: Instant,
}

impl ScreenshotAssembly {
    fn new(declared_size: u64) -> Self {
        Self {
            declared_size,
            // base64 inflates by 4/3. Clamp first, the size is untrusted.
            encoded: String::with_capacity(
                initial_capacity(declared_size).saturating_mul(4) / 3 + 4,
            ),
            lines: 0,
            started: Instant::now(),
        }
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Encoded characters accumulated so far.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn finish(self) -> ScreenshotArtifact {
        ScreenshotArtifact {
            declared_size: self.declared_size,
            encoded: self.encoded,
            lines: self.lines,
            elapsed: self.started.elapsed(),
        }
    }
}

// The declared size comes off the wire; never trust it for a large upfront
// allocation.
fn initial_capacity(declared: u64) -> usize {
    const MAX_PREALLOC: u64 = 8 * 1024 * 1024;
    declared.min(MAX_PREALLOC) as usize
}

/// Reassembly state. At most one transfer is live at a time.
#[derive(Debug, Default)]
pub enum DemuxState {
    #[default]
    Idle,
    ReceivingFile(FileAssembly),
    ReceivingScreenshot(ScreenshotAssembly),
}

impl DemuxState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DemuxState::Idle)
    }

    /// Kind of the frame being reassembled, if any.
    pub fn transfer_kind(&self) -> Option<FrameKind> {
        match self {
            DemuxState::Idle => None,
            DemuxState::ReceivingFile(_) => Some(FrameKind::File),
            DemuxState::ReceivingScreenshot(_) => Some(FrameKind::Screenshot),
        }
    }
}

/// What a single line produced.
#[derive(Debug, Clone)]
pub enum DemuxEvent {
    /// One line of command output.
    Text(String),
    /// The agent finished answering a command.
    ResponseComplete,
    FileStarted {
        name: String,
        declared_size: u64,
    },
    Progress(TransferProgress),
    /// A chunk was skipped; the transfer continues.
    ChunkRejected {
        error: ChunkError,
        decode_errors: u64,
    },
    FileCompleted(FileArtifact),
    ScreenshotStarted {
        declared_size: u64,
    },
    ScreenshotCompleted(ScreenshotArtifact),
    /// A partial transfer was discarded.
    TransferAborted {
        kind: FrameKind,
        name: Option<String>,
        reason: String,
        received: u64,
    },
}

/// Line-at-a-time state machine over the response stream.
#[derive(Debug, Default)]
pub struct Demultiplexer {
    state: DemuxState,
    config: DemuxConfig,
}

impl Demultiplexer {
    /// Create a demultiplexer with default configuration.
    pub fn new() -> Self {
        Self::with_config(DemuxConfig::default())
    }

    /// Create a demultiplexer with explicit configuration.
    pub fn with_config(config: DemuxConfig) -> Self {
        Self {
            state: DemuxState::Idle,
            config,
        }
    }

    /// Current reassembly state.
    pub fn state(&self) -> &DemuxState {
        &self.state
    }

    /// Current demultiplexer configuration.
    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    /// Process one line (without its terminator).
    pub fn push_line(&mut self, line: &str) -> Option<DemuxEvent> {
        let (next, event) = match std::mem::take(&mut self.state) {
            DemuxState::Idle => Self::on_idle(line),
            DemuxState::ReceivingFile(assembly) => self.on_file_line(assembly, line),
            DemuxState::ReceivingScreenshot(assembly) => Self::on_screenshot_line(assembly, line),
        };
        self.state = next;
        event
    }

    /// Forced resync after the read side saw no data for an idle period.
    ///
    /// A stalled transfer is discarded; an idle demultiplexer is untouched.
    pub fn on_idle_timeout(&mut self, idle: Duration) -> Option<DemuxEvent> {
        self.abort(format!("no data for {}s", idle.as_secs()))
    }

    /// Discard any partial transfer, e.g. because the connection dropped.
    pub fn reset(&mut self) -> Option<DemuxEvent> {
        self.abort("connection closed".to_string())
    }

    fn abort(&mut self, reason: String) -> Option<DemuxEvent> {
        let event = match std::mem::take(&mut self.state) {
            DemuxState::Idle => return None,
            DemuxState::ReceivingFile(assembly) => DemuxEvent::TransferAborted {
                kind: FrameKind::File,
                received: assembly.received(),
                name: Some(assembly.name),
                reason,
            },
            DemuxState::ReceivingScreenshot(assembly) => DemuxEvent::TransferAborted {
                kind: FrameKind::Screenshot,
                name: None,
                reason,
                received: assembly.encoded.len() as u64,
            },
        };
        warn!(?event, "discarding partial transfer");
        Some(event)
    }

    fn on_idle(line: &str) -> (DemuxState, Option<DemuxEvent>) {
        match Marker::parse(line) {
            Some(Marker::FileStart { name, size }) => {
                info!(name, size, "receiving file");
                (
                    DemuxState::ReceivingFile(FileAssembly::new(name, size)),
                    Some(DemuxEvent::FileStarted {
                        name: name.to_string(),
                        declared_size: size,
                    }),
                )
            }
            Some(Marker::ScreenshotStart { size }) => {
                info!(size, "receiving screenshot");
                (
                    DemuxState::ReceivingScreenshot(ScreenshotAssembly::new(size)),
                    Some(DemuxEvent::ScreenshotStarted {
                        declared_size: size,
                    }),
                )
            }
            Some(Marker::ResponseEnd) => (DemuxState::Idle, Some(DemuxEvent::ResponseComplete)),
            _ => (DemuxState::Idle, Some(DemuxEvent::Text(line.to_string()))),
        }
    }

    fn on_file_line(
        &self,
        mut assembly: FileAssembly,
        line: &str,
    ) -> (DemuxState, Option<DemuxEvent>) {
        match Marker::parse(line) {
            Some(Marker::FileEnd) => {
                let artifact = assembly.finish();
                info!(
                    name = %artifact.name,
                    received = artifact.received(),
                    declared = artifact.declared_size,
                    chunks = artifact.chunks,
                    decode_errors = artifact.decode_errors,
                    "file transfer complete"
                );
                return (
                    DemuxState::Idle,
                    Some(DemuxEvent::FileCompleted(artifact)),
                );
            }
            Some(Marker::TransferError { message }) => {
                warn!(name = %assembly.name, message, "sender aborted file transfer");
                let event = DemuxEvent::TransferAborted {
                    kind: FrameKind::File,
                    received: assembly.received(),
                    name: Some(assembly.name),
                    reason: message.trim().to_string(),
                };
                return (DemuxState::Idle, Some(event));
            }
            _ => {}
        }

        if line.trim().is_empty() {
            return (DemuxState::ReceivingFile(assembly), None);
        }

        let event = match decode_chunk(line) {
            Ok(chunk) => {
                if let Some(header) = chunk.header {
                    if let Some(last) = assembly.last_seq {
                        if header.seq != last + 1 {
                            debug!(expected = last + 1, got = header.seq, "chunk sequence gap");
                        }
                    }
                    assembly.last_seq = Some(header.seq);
                }
                assembly.data.extend_from_slice(&chunk.bytes);
                assembly.chunks += 1;
                self.maybe_progress(&mut assembly)
            }
            Err(error) => {
                assembly.decode_errors += 1;
                warn!(
                    name = %assembly.name,
                    %error,
                    decode_errors = assembly.decode_errors,
                    "skipping undecodable chunk"
                );
                Some(DemuxEvent::ChunkRejected {
                    error,
                    decode_errors: assembly.decode_errors,
                })
            }
        };
        (DemuxState::ReceivingFile(assembly), event)
    }

    fn maybe_progress(&self, assembly: &mut FileAssembly) -> Option<DemuxEvent> {
        let percent = assembly.percent();
        let interval = self.config.progress_chunk_interval.max(1);
        let percent_moved = percent.is_some() && percent != assembly.last_percent;
        if !percent_moved && assembly.chunks % interval != 0 {
            return None;
        }
        assembly.last_percent = percent;
        Some(DemuxEvent::Progress(assembly.progress()))
    }

    fn on_screenshot_line(
        mut assembly: ScreenshotAssembly,
        line: &str,
    ) -> (DemuxState, Option<DemuxEvent>) {
        if matches!(Marker::parse(line), Some(Marker::ScreenshotEnd)) {
            let artifact = assembly.finish();
            info!(
                declared = artifact.declared_size,
                encoded_len = artifact.encoded.len(),
                lines = artifact.lines,
                "screenshot transfer complete"
            );
            return (
                DemuxState::Idle,
                Some(DemuxEvent::ScreenshotCompleted(artifact)),
            );
        }

        // Screenshot body lines carry no header.
        assembly.encoded.push_str(line.trim());
        assembly.lines += 1;
        (DemuxState::ReceivingScreenshot(assembly), None)
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    use super::*;
    use crate::chunk::encode_chunk;

    fn push_all(demux: &mut Demultiplexer, input: &str) -> Vec<DemuxEvent> {
        input.lines().filter_map(|line| demux.push_line(line)).collect()
    }

    #[test]
    fn text_lines_pass_through_idle() {
        let mut demux = Demultiplexer::new();
        let events = push_all(&mut demux, "hello\n  indented\n---END---\n");

        assert!(matches!(&events[0], DemuxEvent::Text(t) if t == "hello"));
        assert!(matches!(&events[1], DemuxEvent::Text(t) if t == "  indented"));
        assert!(matches!(events[2], DemuxEvent::ResponseComplete));
        assert!(demux.state().is_idle());
    }

    #[test]
    fn escaped_marker_stays_text() {
        let mut demux = Demultiplexer::new();
        let event = demux.push_line(" ---END---").unwrap();
        assert!(matches!(event, DemuxEvent::Text(t) if t == " ---END---"));
    }

    #[test]
    fn single_chunk_file_scenario() {
        let encoded = STANDARD.encode(b"\x00\x01\x02\x03\x04\x05");
        let input = format!("FILE_TRANSFER_START:a.bin:6\nCHUNK:1:8:{encoded}\nFILE_TRANSFER_END\n");

        let mut demux = Demultiplexer::new();
        let events = push_all(&mut demux, &input);

        assert!(matches!(
            &events[0],
            DemuxEvent::FileStarted { name, declared_size: 6 } if name == "a.bin"
        ));
        let artifact = match events.last() {
            Some(DemuxEvent::FileCompleted(artifact)) => artifact,
            other => panic!("expected FileCompleted, got {other:?}"),
        };
        assert_eq!(artifact.name, "a.bin");
        assert_eq!(artifact.data.as_ref(), b"\x00\x01\x02\x03\x04\x05");
        assert_eq!(artifact.chunks, 1);
        assert!(!artifact.size_mismatch());
        assert!(demux.state().is_idle());
    }

    #[test]
    fn bad_chunks_are_counted_and_skipped() {
        let good_a = encode_chunk(1, b"abc");
        let good_b = encode_chunk(3, b"defg");
        let truncated = {
            let line = encode_chunk(2, b"lost segment");
            line.trim_end()[..line.trim_end().len() - 1].to_string()
        };
        let input = format!(
            "FILE_TRANSFER_START:f.txt:19\n{good_a}{truncated}\n\nnot*base64\n{good_b}FILE_TRANSFER_END\n"
        );

        let mut demux = Demultiplexer::new();
        let events = push_all(&mut demux, &input);

        let rejected = events
            .iter()
            .filter(|e| matches!(e, DemuxEvent::ChunkRejected { .. }))
            .count();
        assert_eq!(rejected, 2);

        let artifact = match events.last() {
            Some(DemuxEvent::FileCompleted(artifact)) => artifact.clone(),
            other => panic!("expected FileCompleted, got {other:?}"),
        };
        assert_eq!(artifact.data.as_ref(), b"abcdefg");
        assert_eq!(artifact.chunks, 2);
        assert_eq!(artifact.decode_errors, 2);
        assert!(artifact.size_mismatch());
    }

    #[test]
    fn rejected_chunk_does_not_touch_buffer() {
        let mut demux = Demultiplexer::new();
        demux.push_line("FILE_TRANSFER_START:x.bin:8");
        demux.push_line(encode_chunk(1, b"1234").trim_end());

        let before = match demux.state() {
            DemuxState::ReceivingFile(asm) => asm.received(),
            _ => panic!("expected ReceivingFile"),
        };
        let line = encode_chunk(2, b"5678");
        let event = demux.push_line(&line.trim_end()[..line.trim_end().len() - 1]);
        assert!(matches!(event, Some(DemuxEvent::ChunkRejected { decode_errors: 1, .. })));

        match demux.state() {
            DemuxState::ReceivingFile(asm) => {
                assert_eq!(asm.received(), before);
                assert_eq!(asm.chunks(), 1);
                assert_eq!(asm.decode_errors(), 1);
            }
            _ => panic!("expected ReceivingFile"),
        }
    }

    #[test]
    fn received_bytes_equal_sum_of_decoded_segments() {
        let segments: Vec<Vec<u8>> = (0..20).map(|i| vec![i as u8; (i * 13) % 50]).collect();
        let mut demux = Demultiplexer::new();
        demux.push_line("FILE_TRANSFER_START:sum.bin:100000");

        let mut expected = 0u64;
        for (i, segment) in segments.iter().enumerate() {
            let line = encode_chunk(i as u64 + 1, segment);
            let line = if i % 3 == 0 && !segment.is_empty() {
                // Corrupt every third non-empty chunk.
                line.replace(':', "#")
            } else {
                expected += segment.len() as u64;
                line
            };
            demux.push_line(line.trim_end());
        }

        let event = demux.push_line("FILE_TRANSFER_END").unwrap();
        let DemuxEvent::FileCompleted(artifact) = event else {
            panic!("expected FileCompleted");
        };
        assert_eq!(artifact.received(), expected);
    }

    #[test]
    fn start_marker_mid_transfer_is_body() {
        let mut demux = Demultiplexer::new();
        demux.push_line("FILE_TRANSFER_START:a.bin:4");
        let event = demux.push_line("SCREENSHOT_START:10");
        assert!(matches!(event, Some(DemuxEvent::ChunkRejected { .. })));
        assert_eq!(demux.state().transfer_kind(), Some(FrameKind::File));

        let mut demux = Demultiplexer::new();
        demux.push_line("SCREENSHOT_START:10");
        assert!(demux.push_line("FILE_TRANSFER_START:b.bin:4").is_none());
        assert_eq!(demux.state().transfer_kind(), Some(FrameKind::Screenshot));
    }

    #[test]
    fn error_notice_aborts_file() {
        let mut demux = Demultiplexer::new();
        demux.push_line("FILE_TRANSFER_START:big.iso:1000");
        demux.push_line(encode_chunk(1, b"0123").trim_end());

        let event = demux.push_line("ERROR:Failed to read file: disk gone");
        assert!(matches!(
            event,
            Some(DemuxEvent::TransferAborted { kind: FrameKind::File, received: 4, .. })
        ));
        assert!(demux.state().is_idle());
    }

    #[test]
    fn screenshot_accumulates_raw_lines() {
        let image = b"not really a png but bytes all the same";
        let encoded = STANDARD.encode(image);
        let (a, b) = encoded.split_at(16);

        let mut demux = Demultiplexer::new();
        let events = push_all(
            &mut demux,
            &format!("SCREENSHOT_START:{}\n{a}\n{b}\nSCREENSHOT_END\n---END---\n", image.len()),
        );

        assert!(matches!(events[0], DemuxEvent::ScreenshotStarted { declared_size } if declared_size == image.len() as u64));
        let DemuxEvent::ScreenshotCompleted(artifact) = &events[1] else {
            panic!("expected ScreenshotCompleted");
        };
        assert_eq!(artifact.encoded, encoded);
        assert_eq!(artifact.lines, 2);
        assert!(matches!(events[2], DemuxEvent::ResponseComplete));
    }

    #[test]
    fn oversized_declared_sizes_start_transfers() {
        let mut demux = Demultiplexer::new();
        let event = demux.push_line("SCREENSHOT_START:18446744073709551615");
        assert!(matches!(
            event,
            Some(DemuxEvent::ScreenshotStarted { declared_size: u64::MAX })
        ));
        demux.push_line("aGk=");
        let Some(DemuxEvent::ScreenshotCompleted(artifact)) = demux.push_line("SCREENSHOT_END")
        else {
            panic!("expected ScreenshotCompleted");
        };
        assert_eq!(artifact.encoded, "aGk=");

        let event = demux.push_line("FILE_TRANSFER_START:big.bin:18446744073709551615");
        assert!(matches!(event, Some(DemuxEvent::FileStarted { declared_size: u64::MAX, .. })));
        let event = demux.push_line(encode_chunk(1, b"hi").trim_end());
        assert!(matches!(event, Some(DemuxEvent::Progress(p)) if p.percent == Some(0)));
    }

    #[test]
    fn progress_reported_on_percent_change() {
        let mut demux = Demultiplexer::with_config(DemuxConfig {
            progress_chunk_interval: 1000,
        });
        demux.push_line("FILE_TRANSFER_START:p.bin:4");

        let first = demux.push_line(encode_chunk(1, b"ab").trim_end());
        let Some(DemuxEvent::Progress(progress)) = first else {
            panic!("expected progress");
        };
        assert_eq!(progress.percent, Some(50));
        assert_eq!(progress.received, 2);

        let second = demux.push_line(encode_chunk(2, b"").trim_end());
        assert!(second.is_none(), "percent unchanged, no progress");

        let third = demux.push_line(encode_chunk(3, b"cd").trim_end());
        assert!(matches!(third, Some(DemuxEvent::Progress(p)) if p.percent == Some(100)));
    }

    #[test]
    fn progress_by_chunk_count_without_declared_size() {
        let mut demux = Demultiplexer::with_config(DemuxConfig {
            progress_chunk_interval: 2,
        });
        demux.push_line("FILE_TRANSFER_START:unknown.bin:0");

        assert!(demux.push_line(encode_chunk(1, b"a").trim_end()).is_none());
        let event = demux.push_line(encode_chunk(2, b"b").trim_end());
        assert!(matches!(event, Some(DemuxEvent::Progress(p)) if p.percent.is_none() && p.chunks == 2));
    }

    #[test]
    fn idle_timeout_discards_stalled_transfer() {
        let mut demux = Demultiplexer::new();
        assert!(demux.on_idle_timeout(Duration::from_secs(30)).is_none());

        demux.push_line("SCREENSHOT_START:100");
        demux.push_line("AAAA");
        let event = demux.on_idle_timeout(Duration::from_secs(30));
        assert!(matches!(
            event,
            Some(DemuxEvent::TransferAborted { kind: FrameKind::Screenshot, received: 4, .. })
        ));
        assert!(demux.state().is_idle());

        // Back to normal classification afterwards.
        assert!(matches!(demux.push_line("---END---"), Some(DemuxEvent::ResponseComplete)));
    }

    #[test]
    fn reset_discards_partial_file() {
        let mut demux = Demultiplexer::new();
        demux.push_line("FILE_TRANSFER_START:gone.bin:10");
        let event = demux.reset();
        assert!(matches!(
            event,
            Some(DemuxEvent::TransferAborted { name: Some(ref n), .. }) if n == "gone.bin"
        ));
        assert!(demux.reset().is_none());
    }
}
