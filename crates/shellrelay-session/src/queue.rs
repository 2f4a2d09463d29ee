//! Bounded command queues between a session's reader and its worker.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::warn;

/// Outcome of offering a command to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The queue stayed full; the command was dropped.
    Dropped,
    /// The worker is gone; nothing more will be accepted.
    Closed,
}

/// Sending half of a command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<String>,
}

/// Receiving half of a command queue.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<String>,
}

/// Create a queue holding at most `capacity` pending commands.
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandSender { tx }, CommandReceiver { rx })
}

impl CommandSender {
    /// Queue without waiting. A full queue drops the command.
    pub fn offer(&self, command: String) -> Enqueued {
        match self.tx.try_send(command) {
            Ok(()) => Enqueued::Queued,
            Err(TrySendError::Full(command)) => {
                warn!(%command, "command queue full, dropping command");
                Enqueued::Dropped
            }
            Err(TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }

    /// Queue, waiting up to `timeout` for room before dropping the command.
    pub async fn offer_within(&self, command: String, timeout: Duration) -> Enqueued {
        match self.tx.send_timeout(command, timeout).await {
            Ok(()) => Enqueued::Queued,
            Err(SendTimeoutError::Timeout(command)) => {
                warn!(%command, ?timeout, "command queue blocked, dropping command");
                Enqueued::Dropped
            }
            Err(SendTimeoutError::Closed(_)) => Enqueued::Closed,
        }
    }
}

impl CommandReceiver {
    /// Next queued command, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
