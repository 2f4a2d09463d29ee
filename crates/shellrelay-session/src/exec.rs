use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::Shell;

/// Output of one executed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr.
    pub output: Vec<u8>,
    /// Set when the command could not run or exited unsuccessfully.
    pub error: Option<String>,
}

/// Runs shell commands on behalf of the agent.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, shell: Shell, command: &str) -> impl Future<Output = CommandOutput> + Send;
}

/// Executes commands through the platform shell with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    fn command(shell: Shell, command: &str) -> Command {
        let mut cmd = match shell {
            Shell::System if cfg!(windows) => {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C");
                cmd
            }
            Shell::System => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c");
                cmd
            }
            Shell::PowerShell => {
                let mut cmd = Command::new("powershell");
                cmd.arg("-Command");
                cmd
            }
        };
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl CommandExecutor for ShellExecutor {
    async fn execute(&self, shell: Shell, command: &str) -> CommandOutput {
        debug!(?shell, command, "executing command");
        match Self::command(shell, command).output().await {
            Ok(out) => {
                let mut output = out.stdout;
                output.extend_from_slice(&out.stderr);
                let error = (!out.status.success()).then(|| out.status.to_string());
                if let Some(error) = &error {
                    debug!(command, %error, "command failed");
                }
                CommandOutput { output, error }
            }
            Err(err) => {
                warn!(?shell, command, %err, "failed to start command");
                CommandOutput {
                    output: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}
