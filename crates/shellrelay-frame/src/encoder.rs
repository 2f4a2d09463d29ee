use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::chunk::{encode_chunk, DEFAULT_SEGMENT_SIZE};
use crate::codec::encode_line;
use crate::error::{FrameError, Result};
use crate::wire::{escape_text_line, FrameKind, Marker};

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;

/// Default length of one screenshot body line, in base64 characters.
pub const DEFAULT_SCREENSHOT_LINE_LEN: usize = 1024;

/// Encoder tuning.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Binary bytes per file chunk. Default: 32 KiB.
    pub segment_size: usize,
    /// Base64 characters per screenshot line. Default: 1024.
    pub screenshot_line_len: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            screenshot_line_len: DEFAULT_SCREENSHOT_LINE_LEN,
        }
    }
}

/// What one emitted frame amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub kind: FrameKind,
    /// Payload bytes: text bytes, file bytes or image bytes.
    pub payload_bytes: u64,
    /// Body lines written, markers excluded.
    pub lines: u64,
    pub elapsed: Duration,
}

/// Writes complete response frames to any async stream.
///
/// Every write is checked. The first failure aborts the frame and is
/// returned as-is; there is no retry at this layer.
pub struct FrameEncoder<W> {
    inner: W,
    buf: BytesMut,
    config: EncoderConfig,
}

impl<W: AsyncWrite + Unpin> FrameEncoder<W> {
    /// Create a new frame encoder with default configuration.
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, EncoderConfig::default())
    }

    /// Create a new frame encoder with explicit configuration.
    pub fn with_config(inner: W, config: EncoderConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Send command output as a text frame.
    ///
    /// Invalid UTF-8 is replaced before splitting, empty lines are dropped
    /// and lines that look like markers are escaped.
    pub async fn send_text(&mut self, output: &[u8]) -> Result<TransferSummary> {
        let started = Instant::now();
        let text = String::from_utf8_lossy(output);
        let mut lines = 0u64;

        for line in text.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            self.write_line(&escape_text_line(line)).await?;
            lines += 1;
        }
        self.write_marker(&Marker::ResponseEnd).await?;
        self.flush().await?;

        Ok(TransferSummary {
            kind: FrameKind::Text,
            payload_bytes: output.len() as u64,
            lines,
            elapsed: started.elapsed(),
        })
    }

    /// Send the result of a command as a text frame.
    ///
    /// A failed command is reported as an error description followed by
    /// whatever partial output it produced.
    pub async fn send_command_result(
        &mut self,
        output: &[u8],
        error: Option<&str>,
    ) -> Result<TransferSummary> {
        match error {
            None => self.send_text(output).await,
            Some(error) => {
                let mut body = format!("Error executing command: {error}\n").into_bytes();
                body.extend_from_slice(output);
                self.send_text(&body).await
            }
        }
    }

    /// Send a local file as a file frame.
    ///
    /// A missing or unreadable file is answered with a text frame instead.
    pub async fn send_file(&mut self, path: &Path) -> Result<TransferSummary> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let notice = format!("File not found: {}", path.display());
                return self.send_text(notice.as_bytes()).await;
            }
            Err(err) => {
                let notice = format!("Failed to open file: {err}");
                return self.send_text(notice.as_bytes()).await;
            }
        };
        let size = match file.metadata().await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                let notice = format!("Not a regular file: {}", path.display());
                return self.send_text(notice.as_bytes()).await;
            }
            Err(err) => {
                let notice = format!("Failed to get file info: {err}");
                return self.send_text(notice.as_bytes()).await;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        self.send_file_from(&name, size, file).await
    }

    /// Send `size` bytes from `source` as a file frame named `name`.
    pub async fn send_file_from<R: AsyncRead + Unpin>(
        &mut self,
        name: &str,
        size: u64,
        mut source: R,
    ) -> Result<TransferSummary> {
        let started = Instant::now();
        self.write_marker(&Marker::FileStart { name, size }).await?;

        let mut segment = vec![0u8; self.config.segment_size.max(1)];
        let mut sent = 0u64;
        let mut seq = 0u64;
        let mut last_tenth = 0u64;

        loop {
            let n = match read_segment(&mut source, &mut segment).await {
                Ok(n) => n,
                Err(err) => {
                    warn!(name, %err, sent, "file read failed mid-transfer");
                    let message = format!("Failed to read file: {err}");
                    self.write_marker(&Marker::TransferError { message: &message })
                        .await?;
                    self.flush().await?;
                    return Err(FrameError::SourceRead {
                        name: name.to_string(),
                        source: err,
                    });
                }
            };
            if n == 0 {
                break;
            }

            seq += 1;
            self.write_raw(&encode_chunk(seq, &segment[..n])).await?;
            sent += n as u64;

            let percent = if size == 0 { 100 } else { sent * 100 / size };
            if percent / 10 > last_tenth / 10 || percent >= 100 {
                debug!(name, percent, sent, size, chunk = seq, "file transfer progress");
                last_tenth = percent;
            }
        }

        self.write_marker(&Marker::FileEnd).await?;
        self.write_marker(&Marker::ResponseEnd).await?;
        self.flush().await?;

        info!(name, bytes = sent, chunks = seq, "file sent");
        Ok(TransferSummary {
            kind: FrameKind::File,
            payload_bytes: sent,
            lines: seq,
            elapsed: started.elapsed(),
        })
    }

    /// Send an encoded image as a screenshot frame.
    pub async fn send_screenshot(&mut self, image: &[u8]) -> Result<TransferSummary> {
        let started = Instant::now();
        self.write_marker(&Marker::ScreenshotStart {
            size: image.len() as u64,
        })
        .await?;

        let encoded = STANDARD.encode(image);
        let mut lines = 0u64;
        // base64 output is ASCII, so byte chunks are valid str slices.
        for piece in encoded
            .as_bytes()
            .chunks(self.config.screenshot_line_len.max(4))
        {
            self.buf.clear();
            self.buf.extend_from_slice(piece);
            self.buf.extend_from_slice(b"\n");
            self.write_buf().await?;
            lines += 1;
        }

        self.write_marker(&Marker::ScreenshotEnd).await?;
        self.write_marker(&Marker::ResponseEnd).await?;
        self.flush().await?;

        info!(bytes = image.len(), lines, "screenshot sent");
        Ok(TransferSummary {
            kind: FrameKind::Screenshot,
            payload_bytes: image.len() as u64,
            lines,
            elapsed: started.elapsed(),
        })
    }

    /// Write one line, appending the terminator.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.buf.clear();
        encode_line(line, &mut self.buf);
        self.write_buf().await
    }

    async fn write_marker(&mut self, marker: &Marker<'_>) -> Result<()> {
        self.write_raw(&marker.to_line()).await
    }

    async fn write_raw(&mut self, line: &str) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(line.as_bytes());
        self.write_buf().await
    }

    async fn write_buf(&mut self) -> Result<()> {
        match self.inner.write_all(&self.buf).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::WriteZero => Err(FrameError::ConnectionClosed),
            Err(err) => Err(FrameError::Io(err)),
        }
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(FrameError::Io)
    }

    /// Consume the encoder and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Current encoder configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

/// Fill `segment` as far as the source allows. Returns 0 only at EOF.
async fn read_segment<R: AsyncRead + Unpin>(
    source: &mut R,
    segment: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < segment.len() {
        match source.read(&mut segment[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;
    use crate::chunk::decode_chunk;
    use crate::demux::{DemuxEvent, Demultiplexer};

    async fn wire_of<F, Fut>(f: F) -> String
    where
        F: FnOnce(FrameEncoder<Vec<u8>>) -> Fut,
        Fut: std::future::Future<Output = FrameEncoder<Vec<u8>>>,
    {
        let encoder = f(FrameEncoder::new(Vec::new())).await;
        String::from_utf8(encoder.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn text_frame_skips_blank_lines_and_ends_with_marker() {
        let wire = wire_of(|mut enc| async move {
            let summary = enc.send_text(b"one\r\n\ntwo\n").await.unwrap();
            assert_eq!(summary.lines, 2);
            assert_eq!(summary.kind, FrameKind::Text);
            enc
        })
        .await;

        assert_eq!(wire, "one\ntwo\n---END---\n");
    }

    #[tokio::test]
    async fn text_frame_replaces_invalid_utf8() {
        let wire = wire_of(|mut enc| async move {
            enc.send_text(b"bad \xff byte").await.unwrap();
            enc
        })
        .await;

        assert_eq!(wire, "bad \u{fffd} byte\n---END---\n");
    }

    #[tokio::test]
    async fn text_frame_escapes_markers() {
        let wire = wire_of(|mut enc| async move {
            enc.send_text(b"---END---\nFILE_TRANSFER_START:x:1\n").await.unwrap();
            enc
        })
        .await;

        assert_eq!(wire, " ---END---\n FILE_TRANSFER_START:x:1\n---END---\n");
    }

    #[tokio::test]
    async fn failed_command_prefixes_error() {
        let wire = wire_of(|mut enc| async move {
            enc.send_command_result(b"partial", Some("exit status: 1"))
                .await
                .unwrap();
            enc
        })
        .await;

        assert_eq!(
            wire,
            "Error executing command: exit status: 1\npartial\n---END---\n"
        );
    }

    #[tokio::test]
    async fn file_frame_chunks_and_markers() {
        let data: Vec<u8> = (0..10u8).collect();
        let wire = wire_of(|enc| {
            let data = data.clone();
            async move {
                let mut enc = FrameEncoder::with_config(
                    enc.into_inner(),
                    EncoderConfig {
                        segment_size: 4,
                        ..EncoderConfig::default()
                    },
                );
                let summary = enc
                    .send_file_from("ten.bin", 10, data.as_slice())
                    .await
                    .unwrap();
                assert_eq!(summary.lines, 3);
                assert_eq!(summary.payload_bytes, 10);
                enc
            }
        })
        .await;

        let lines: Vec<&str> = wire.lines().collect();
        assert_eq!(lines[0], "FILE_TRANSFER_START:ten.bin:10");
        assert_eq!(lines[4], "FILE_TRANSFER_END");
        assert_eq!(lines[5], "---END---");

        let decoded: Vec<u8> = lines[1..4]
            .iter()
            .flat_map(|line| decode_chunk(line).unwrap().bytes)
            .collect();
        assert_eq!(decoded, data);
        assert!(lines[3].starts_with("CHUNK:3:"));
    }

    #[tokio::test]
    async fn file_frame_from_disk_roundtrips_through_demux() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.dat");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let wire = wire_of(|mut enc| {
            let path = path.clone();
            async move {
                enc.send_file(&path).await.unwrap();
                enc
            }
        })
        .await;

        let mut demux = Demultiplexer::new();
        let artifact = wire
            .lines()
            .filter_map(|line| demux.push_line(line))
            .find_map(|event| match event {
                DemuxEvent::FileCompleted(artifact) => Some(artifact),
                _ => None,
            })
            .unwrap();
        assert_eq!(artifact.name, "payload.dat");
        assert_eq!(artifact.data.as_ref(), data.as_slice());
        assert_eq!(artifact.chunks, 4);
    }

    #[tokio::test]
    async fn missing_file_becomes_text_frame() {
        let wire = wire_of(|mut enc| async move {
            let summary = enc
                .send_file(Path::new("/definitely/not/here.txt"))
                .await
                .unwrap();
            assert_eq!(summary.kind, FrameKind::Text);
            enc
        })
        .await;

        assert_eq!(wire, "File not found: /definitely/not/here.txt\n---END---\n");
    }

    #[tokio::test]
    async fn empty_file_has_no_chunks() {
        let wire = wire_of(|mut enc| async move {
            enc.send_file_from("empty", 0, &b""[..]).await.unwrap();
            enc
        })
        .await;

        assert_eq!(wire, "FILE_TRANSFER_START:empty:0\nFILE_TRANSFER_END\n---END---\n");
    }

    #[tokio::test]
    async fn read_failure_writes_notice_without_end_marker() {
        let mut enc = FrameEncoder::with_config(
            Vec::new(),
            EncoderConfig {
                segment_size: 4,
                ..EncoderConfig::default()
            },
        );
        let source = FailAfter {
            data: b"abcd".to_vec(),
            served: false,
        };

        let err = enc.send_file_from("flaky.bin", 100, source).await.unwrap_err();
        assert!(matches!(err, FrameError::SourceRead { .. }));
        assert!(!err.is_transport());

        let wire = String::from_utf8(enc.into_inner()).unwrap();
        let lines: Vec<&str> = wire.lines().collect();
        assert_eq!(lines[0], "FILE_TRANSFER_START:flaky.bin:100");
        assert!(lines[1].starts_with("CHUNK:1:"));
        assert!(lines[2].starts_with("ERROR:Failed to read file:"));
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn screenshot_frame_splits_encoded_text() {
        let image = vec![7u8; 100];
        let wire = wire_of(|enc| {
            let image = image.clone();
            async move {
                let mut enc = FrameEncoder::with_config(
                    enc.into_inner(),
                    EncoderConfig {
                        screenshot_line_len: 64,
                        ..EncoderConfig::default()
                    },
                );
                let summary = enc.send_screenshot(&image).await.unwrap();
                // 100 bytes -> 136 base64 chars -> 64 + 64 + 8.
                assert_eq!(summary.lines, 3);
                enc
            }
        })
        .await;

        let lines: Vec<&str> = wire.lines().collect();
        assert_eq!(lines[0], "SCREENSHOT_START:100");
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines[3].len(), 8);
        assert_eq!(lines[4], "SCREENSHOT_END");
        assert_eq!(lines[5], "---END---");
        assert_eq!(lines[1..4].concat(), STANDARD.encode(&image));
    }

    #[tokio::test]
    async fn write_failure_aborts_frame() {
        let mut enc = FrameEncoder::new(ClosedWriter);
        let err = enc.send_text(b"hello").await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(err.is_transport());

        let mut enc = FrameEncoder::new(BrokenPipeWriter);
        let err = enc.send_screenshot(b"img").await.unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    struct FailAfter {
        data: Vec<u8>,
        served: bool,
    }

    impl AsyncRead for FailAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(std::io::Error::other("disk gone")));
            }
            self.served = true;
            let data = std::mem::take(&mut self.data);
            buf.put_slice(&data);
            Poll::Ready(Ok(()))
        }
    }

    struct ClosedWriter;

    impl AsyncWrite for ClosedWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenPipeWriter;

    impl AsyncWrite for BrokenPipeWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::from(ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
