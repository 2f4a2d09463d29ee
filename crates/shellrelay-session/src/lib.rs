//! Per-connection tasks for shellrelay.
//!
//! [`ConsoleSession`] drives the operator side: it forwards typed commands
//! and turns the agent's framed responses into output and files.
//! [`AgentSession`] drives the remote side: it executes commands one at a
//! time and answers each with exactly one frame.

pub mod agent;
pub mod capture;
pub mod command;
pub mod console;
pub mod error;
pub mod exec;
pub mod queue;

pub use agent::{AgentConfig, AgentExit, AgentSession};
pub use capture::{CaptureError, NoDisplay, PngFileCapture, ScreenCapture};
pub use command::{AgentCommand, Shell, AGENT_HELP};
pub use console::{ConsoleConfig, ConsoleSession, ConsoleSummary, CONSOLE_HELP};
pub use error::{Result, SessionError};
pub use exec::{CommandExecutor, CommandOutput, ShellExecutor};
pub use queue::{command_queue, CommandReceiver, CommandSender, Enqueued};
