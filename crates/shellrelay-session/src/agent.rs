//! Agent side of a connection.
//!
//! A reader task queues incoming command lines; a single executor loop
//! handles them in order and is the only writer on the connection, so
//! responses can never interleave.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use shellrelay_frame::{EncoderConfig, FrameEncoder, FrameError, LineCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::ScreenCapture;
use crate::command::{AgentCommand, AGENT_HELP, EXIT_REPLY, UNKNOWN_COMMAND_REPLY};
use crate::error::{Result, SessionError};
use crate::exec::CommandExecutor;
use crate::queue::{command_queue, CommandReceiver, CommandSender, Enqueued};

/// Agent session tuning.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Pending commands waiting for the executor.
    pub queue_capacity: usize,
    /// How long the reader waits for queue room before dropping a command.
    pub enqueue_timeout: Duration,
    /// Longest command line accepted.
    pub max_command_line: usize,
    pub encoder: EncoderConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            enqueue_timeout: Duration::from_secs(5),
            max_command_line: 64 * 1024,
            encoder: EncoderConfig::default(),
        }
    }
}

/// Why an agent session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// The console sent `exit`.
    ExitRequested,
    /// The console closed the connection.
    Disconnected,
    Cancelled,
}

/// Serves console commands over one connection.
pub struct AgentSession<E, C> {
    config: AgentConfig,
    executor: E,
    capture: C,
    cancel: CancellationToken,
}

impl<E: CommandExecutor, C: ScreenCapture> AgentSession<E, C> {
    pub fn new(config: AgentConfig, executor: E, capture: C) -> Self {
        Self {
            config,
            executor,
            capture,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop this session when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the console disconnects, sends `exit`, or the session is
    /// cancelled.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<AgentExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = self.cancel.child_token();
        let (tx, rx) = command_queue(self.config.queue_capacity);

        let (read, exit) = tokio::join!(
            self.read_commands(reader, tx, &session),
            self.execute_commands(rx, writer, &session),
        );

        let exit = exit?;
        if let Err(err) = read {
            if exit != AgentExit::ExitRequested {
                return Err(err);
            }
            debug!(%err, "command stream failed after exit");
        }
        Ok(exit)
    }

    async fn read_commands<R>(
        &self,
        reader: R,
        tx: CommandSender,
        session: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut framed =
            FramedRead::new(reader, LineCodec::with_max_line(self.config.max_command_line));

        let outcome = loop {
            let next = tokio::select! {
                biased;
                () = session.cancelled() => break Ok(()),
                next = framed.next() => next,
            };

            match next {
                None => {
                    info!("console closed the connection");
                    break Ok(());
                }
                Some(Err(err)) => {
                    warn!(%err, "command stream failed");
                    break Err(SessionError::Frame(err));
                }
                Some(Ok(line)) => {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    info!(command, "received command");
                    if tx
                        .offer_within(command.to_string(), self.config.enqueue_timeout)
                        .await
                        == Enqueued::Closed
                    {
                        break Ok(());
                    }
                }
            }
        };

        // Let queued commands drain before the executor sees the end.
        drop(tx);
        if outcome.is_err() {
            session.cancel();
        }
        outcome
    }

    async fn execute_commands<W>(
        &self,
        mut rx: CommandReceiver,
        writer: W,
        session: &CancellationToken,
    ) -> Result<AgentExit>
    where
        W: AsyncWrite + Unpin,
    {
        let mut encoder = FrameEncoder::with_config(writer, self.config.encoder.clone());

        loop {
            let command = tokio::select! {
                biased;
                () = session.cancelled() => return Ok(AgentExit::Cancelled),
                command = rx.recv() => command,
            };
            let Some(command) = command else {
                return Ok(AgentExit::Disconnected);
            };

            match self.handle(&command, &mut encoder).await {
                Ok(true) => {}
                Ok(false) => {
                    session.cancel();
                    return Ok(AgentExit::ExitRequested);
                }
                Err(err) if !err.is_transport() => {
                    warn!(%err, %command, "response aborted");
                }
                Err(err) => {
                    warn!(%err, "failed to write response");
                    session.cancel();
                    return Err(SessionError::Frame(err));
                }
            }
        }
    }

    /// Answer one command. Returns false when the session should end.
    async fn handle<W>(
        &self,
        line: &str,
        encoder: &mut FrameEncoder<W>,
    ) -> std::result::Result<bool, FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        match AgentCommand::parse(line) {
            AgentCommand::Help => {
                encoder.send_text(AGENT_HELP.as_bytes()).await?;
            }
            AgentCommand::Exit => {
                info!("exit requested by console");
                encoder.send_text(EXIT_REPLY.as_bytes()).await?;
                return Ok(false);
            }
            AgentCommand::SendFile { path } => {
                info!(path, "sending file");
                encoder.send_file(Path::new(path)).await?;
            }
            AgentCommand::CaptureScreen => match self.capture.capture().await {
                Ok(png) => {
                    encoder.send_screenshot(&png).await?;
                }
                Err(err) => {
                    warn!(%err, "screen capture failed");
                    let notice = format!("Failed to capture screen: {err}\n");
                    encoder.send_text(notice.as_bytes()).await?;
                }
            },
            AgentCommand::Run { shell, command } => {
                let out = self.executor.execute(shell, command).await;
                encoder
                    .send_command_result(&out.output, out.error.as_deref())
                    .await?;
            }
            AgentCommand::Unknown => {
                encoder.send_text(UNKNOWN_COMMAND_REPLY.as_bytes()).await?;
            }
        }
        Ok(true)
    }
}
