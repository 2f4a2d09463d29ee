//! Console side of a connection.
//!
//! One session runs three loops until the agent disconnects or the token
//! is cancelled:
//!
//! - response reader: lines from the agent go through the
//!   [`Demultiplexer`] and on to the [`Materializer`] and surface
//! - input: operator lines are queued for the agent, `help` is answered
//!   locally
//! - dispatch: queued commands are written to the agent one per line
//!
//! When operator input ends, dispatch stops but the reader keeps going so
//! outstanding responses still arrive. Received payloads are written on
//! the blocking pool, so saving a large file never stalls input or
//! dispatch.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shellrelay_frame::{DemuxConfig, Demultiplexer, FrameError, LineCodec, DEFAULT_MAX_LINE};
use shellrelay_store::{ConsoleSurface, Materializer, StoreConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::queue::{command_queue, CommandReceiver, CommandSender, Enqueued};

/// Printed locally when the operator types `help`.
pub const CONSOLE_HELP: &str = r#"Help:
Input "cmd dir d:\test" to execute a shell command
Input "cmd capture screen" to take current picture and send back, which will be saved to the download folder as image
Input "ps <command>" to execute a PowerShell command
Input "send <path>" to fetch a file from the agent
Input "exit" to disconnect the agent
Input "help" to show this help message
"#;

/// Console session tuning.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Pending operator commands. Extra commands are dropped.
    pub queue_capacity: usize,
    /// Silence on the connection after which a stalled transfer is dropped.
    pub idle_timeout: Duration,
    /// Longest response line accepted.
    pub max_line: usize,
    pub demux: DemuxConfig,
    pub store: StoreConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            idle_timeout: Duration::from_secs(30),
            max_line: DEFAULT_MAX_LINE,
            demux: DemuxConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Counters for a finished console session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleSummary {
    pub lines_received: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    /// True if the session ended because the token was cancelled.
    pub cancelled: bool,
}

/// A console attached to one agent connection.
pub struct ConsoleSession {
    config: ConsoleConfig,
    cancel: CancellationToken,
}

impl ConsoleSession {
    pub fn new(config: ConsoleConfig) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Session that also stops when `cancel` fires.
    pub fn with_cancel(config: ConsoleConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Token that stops this session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the agent disconnects or the session is cancelled.
    ///
    /// `help_out` receives the local help text. Returns an error only when
    /// the connection fails.
    pub async fn run<R, W, I, H, S>(
        &self,
        reader: R,
        writer: W,
        input: I,
        help_out: H,
        surface: &mut S,
    ) -> Result<ConsoleSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        I: AsyncBufRead + Unpin,
        H: AsyncWrite + Unpin,
        S: ConsoleSurface + ?Sized,
    {
        let session = self.cancel.child_token();
        let (tx, rx) = command_queue(self.config.queue_capacity);

        let (read, input, sent) = tokio::join!(
            self.read_responses(reader, surface, &session),
            read_input(input, help_out, tx, &session),
            dispatch(rx, writer, &session),
        );

        let (lines_received, cancelled) = read?;
        let commands_sent = sent?;
        let commands_dropped = match input {
            Ok(dropped) => dropped,
            Err(err) => {
                warn!(%err, "operator input failed");
                0
            }
        };

        Ok(ConsoleSummary {
            lines_received,
            commands_sent,
            commands_dropped,
            cancelled,
        })
    }

    async fn read_responses<R, S>(
        &self,
        reader: R,
        surface: &mut S,
        session: &CancellationToken,
    ) -> Result<(u64, bool)>
    where
        R: AsyncRead + Unpin,
        S: ConsoleSurface + ?Sized,
    {
        let idle = self.config.idle_timeout;
        let mut framed = FramedRead::new(reader, LineCodec::with_max_line(self.config.max_line));
        let mut demux = Demultiplexer::with_config(self.config.demux.clone());
        let store = Materializer::new(self.config.store.clone());
        let mut lines = 0u64;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                () = session.cancelled() => break Ok(true),
                next = tokio::time::timeout(idle, framed.next()) => next,
            };

            match next {
                Err(_) => {
                    if let Some(event) = demux.on_idle_timeout(idle) {
                        store.deliver_async(event, surface).await;
                    }
                }
                Ok(None) => {
                    info!(lines, "agent disconnected");
                    break Ok(false);
                }
                Ok(Some(Err(err))) => {
                    warn!(%err, "response stream failed");
                    break Err(SessionError::Frame(err));
                }
                Ok(Some(Ok(line))) => {
                    lines += 1;
                    if let Some(event) = demux.push_line(&line) {
                        store.deliver_async(event, surface).await;
                    }
                }
            }
        };

        if let Some(event) = demux.reset() {
            store.deliver_async(event, surface).await;
        }
        session.cancel();
        outcome.map(|cancelled| (lines, cancelled))
    }
}

/// Read operator commands into the queue. Returns the number dropped.
async fn read_input<I, H>(
    input: I,
    mut help_out: H,
    tx: CommandSender,
    session: &CancellationToken,
) -> Result<u64>
where
    I: AsyncBufRead + Unpin,
    H: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut dropped = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            () = session.cancelled() => break,
            line = lines.next_line() => line.map_err(SessionError::Input)?,
        };
        let Some(line) = line else {
            debug!("operator input closed");
            break;
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "help" {
            help_out
                .write_all(CONSOLE_HELP.as_bytes())
                .await
                .map_err(SessionError::Input)?;
            help_out.flush().await.map_err(SessionError::Input)?;
            continue;
        }

        match tx.offer(command.to_string()) {
            Enqueued::Queued => {}
            Enqueued::Dropped => dropped += 1,
            Enqueued::Closed => break,
        }
    }
    Ok(dropped)
}

/// Write queued commands to the agent. Returns the number written.
async fn dispatch<W>(mut rx: CommandReceiver, writer: W, session: &CancellationToken) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, LineCodec::new());
    let mut sent = 0u64;

    loop {
        let command = tokio::select! {
            biased;
            () = session.cancelled() => break,
            command = rx.recv() => command,
        };
        let Some(command) = command else {
            debug!("command queue closed, dispatch stopped");
            break;
        };

        let result = tokio::select! {
            biased;
            () = session.cancelled() => break,
            result = framed.send(command.as_str()) => result,
        };
        if let Err(err) = result {
            warn!(%err, "failed to send command");
            session.cancel();
            return Err(match err {
                FrameError::Io(io) if io.kind() == std::io::ErrorKind::WriteZero => {
                    SessionError::Frame(FrameError::ConnectionClosed)
                }
                other => SessionError::Frame(other),
            });
        }
        info!(%command, "command sent");
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use shellrelay_store::RecordingSurface;
    use tokio::io::{duplex, split, AsyncReadExt, BufReader};
    use tracing::Level;

    use super::*;

    fn config_in(dir: &std::path::Path) -> ConsoleConfig {
        ConsoleConfig {
            store: StoreConfig::in_dir(dir),
            ..ConsoleConfig::default()
        }
    }

    #[tokio::test]
    async fn text_and_file_responses_reach_surface_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let session = ConsoleSession::new(config_in(dir.path()));
        let (console_io, mut agent_io) = duplex(64 * 1024);
        let (reader, writer) = split(console_io);
        let mut surface = RecordingSurface::new();

        let agent = async move {
            let mut command = String::new();
            BufReader::new(&mut agent_io)
                .read_line(&mut command)
                .await
                .unwrap();
            assert_eq!(command, "send a.bin\n");
            agent_io
                .write_all(
                    b"ok\n---END---\nFILE_TRANSFER_START:a.bin:6\nCHUNK:1:8:aGVsbG8h\nFILE_TRANSFER_END\n---END---\n",
                )
                .await
                .unwrap();
        };

        let (summary, ()) = tokio::join!(
            session.run(
                reader,
                writer,
                &b"\n  send a.bin  \n"[..],
                tokio::io::sink(),
                &mut surface
            ),
            agent
        );
        let summary = summary.unwrap();

        assert_eq!(summary.commands_sent, 1);
        assert_eq!(summary.lines_received, 6);
        assert!(!summary.cancelled);
        assert_eq!(surface.text(), ["ok"]);
        assert_eq!(surface.responses(), 2);
        assert_eq!(
            std::fs::read(dir.path().join("a.bin")).unwrap(),
            b"hello!"
        );
    }

    #[tokio::test]
    async fn screenshot_response_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let session = ConsoleSession::new(config_in(dir.path()));
        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(4, 4)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let encoded = STANDARD.encode(&png);
        let (head, tail) = encoded.split_at(encoded.len() / 2);
        let wire = format!(
            "SCREENSHOT_START:{}\n{head}\n{tail}\nSCREENSHOT_END\n---END---\n",
            png.len()
        );

        let mut surface = RecordingSurface::new();
        let summary = session
            .run(
                wire.as_bytes(),
                tokio::io::sink(),
                tokio::io::empty(),
                tokio::io::sink(),
                &mut surface,
            )
            .await
            .unwrap();

        assert_eq!(summary.lines_received, 5);
        let shots = surface.screenshots();
        assert_eq!(shots.len(), 1);
        assert_eq!(std::fs::read(&shots[0].path).unwrap(), png);
    }

    #[tokio::test]
    async fn help_is_answered_locally() {
        let session = ConsoleSession::new(ConsoleConfig::default());
        let (help_tx, mut help_rx) = duplex(4096);
        let (console_io, agent_io) = duplex(4096);
        let (reader, writer) = split(console_io);
        let mut surface = RecordingSurface::new();

        let agent = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(agent_io);
        };
        let (summary, ()) = tokio::join!(
            session.run(reader, writer, &b"help\n"[..], help_tx, &mut surface),
            agent
        );

        assert_eq!(summary.unwrap().commands_sent, 0);
        let mut help = String::new();
        help_rx.read_to_string(&mut help).await.unwrap();
        assert_eq!(help, CONSOLE_HELP);
    }

    #[tokio::test]
    async fn full_queue_drops_commands() {
        let session = ConsoleSession::new(ConsoleConfig {
            queue_capacity: 2,
            ..ConsoleConfig::default()
        });
        let cancel = session.cancel_token();
        // The agent never reads, so dispatch blocks once the pipe fills.
        let (console_io, _agent_io) = duplex(8);
        let (reader, writer) = split(console_io);
        let input: String = (0..20).map(|i| format!("cmd echo {i}\n")).collect();
        let mut surface = RecordingSurface::new();

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (summary, ()) = tokio::join!(
            session.run(
                reader,
                writer,
                BufReader::new(input.as_bytes()),
                tokio::io::sink(),
                &mut surface
            ),
            stopper
        );
        let summary = summary.unwrap();

        assert!(summary.cancelled);
        assert!(summary.commands_dropped > 0);
        assert!(summary.commands_dropped + summary.commands_sent <= 20);
    }

    #[tokio::test]
    async fn idle_timeout_discards_stalled_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let session = ConsoleSession::new(ConsoleConfig {
            idle_timeout: Duration::from_millis(50),
            ..config_in(dir.path())
        });
        let (console_io, mut agent_io) = duplex(4096);
        let (reader, writer) = split(console_io);
        let mut surface = RecordingSurface::new();

        let agent = async move {
            agent_io
                .write_all(b"FILE_TRANSFER_START:big.iso:1000\nCHUNK:1:4:AAAA\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            agent_io.write_all(b"after\n---END---\n").await.unwrap();
        };

        let (summary, ()) = tokio::join!(
            session.run(
                reader,
                writer,
                tokio::io::empty(),
                tokio::io::sink(),
                &mut surface
            ),
            agent
        );
        summary.unwrap();

        let warnings = surface.notices(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("big.iso"), "{warnings:?}");
        assert_eq!(surface.text(), ["after"]);
        assert!(!dir.path().join("big.iso").exists());
    }

    #[tokio::test]
    async fn disconnect_mid_transfer_reports_abort() {
        let session = ConsoleSession::new(ConsoleConfig::default());
        let mut surface = RecordingSurface::new();

        session
            .run(
                &b"SCREENSHOT_START:100\nAAAA\n"[..],
                tokio::io::sink(),
                tokio::io::empty(),
                tokio::io::sink(),
                &mut surface,
            )
            .await
            .unwrap();

        let warnings = surface.notices(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("screenshot"), "{warnings:?}");
    }

    #[tokio::test]
    async fn cancelling_twice_is_harmless() {
        let session = ConsoleSession::new(ConsoleConfig::default());
        let cancel = session.cancel_token();
        cancel.cancel();
        cancel.cancel();

        let (console_io, _agent_io) = duplex(64);
        let (reader, writer) = split(console_io);
        let mut surface = RecordingSurface::new();
        let summary = session
            .run(
                reader,
                writer,
                tokio::io::empty(),
                tokio::io::sink(),
                &mut surface,
            )
            .await
            .unwrap();
        assert!(summary.cancelled);
    }
}
