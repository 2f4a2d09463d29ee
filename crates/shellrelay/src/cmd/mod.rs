use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use shellrelay_transport::DEFAULT_PORT;
use tokio_util::sync::CancellationToken;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod agent;
pub mod console;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for agents and send them commands typed on stdin.
    Console(ConsoleArgs),
    /// Connect to a console and execute the commands it sends.
    Agent(AgentArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Console(args) => console::run(args, format).await,
        Command::Agent(args) => agent::run(args).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    /// Port to listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
    /// Directory for received files and screenshots.
    #[arg(long, value_name = "DIR", default_value = ".", env = "SHELLRELAY_DEST")]
    pub dest: PathBuf,
    /// Silence after which a stalled transfer is dropped (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub idle_timeout: Duration,
    /// Do not open received archives to check them.
    #[arg(long)]
    pub no_archive_check: bool,
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Console host to connect to.
    #[arg(long, short = 's', env = "SHELLRELAY_SERVER")]
    pub server: String,
    /// Console port.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Wait between connection attempts (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub retry_interval: Duration,
    /// Give up on a single connection attempt after this long.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub connect_timeout: Duration,
    /// PNG file served for `cmd capture screen`.
    #[arg(long, value_name = "PNG")]
    pub capture_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> CliResult<()> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    handle.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupted, shutting down");
                token.cancel();
            }
            Err(err) => tracing::warn!(%err, "cannot listen for Ctrl-C"),
        }
    });
    Ok(())
}
