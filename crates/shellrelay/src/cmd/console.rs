use shellrelay_session::{ConsoleConfig, ConsoleSession};
use shellrelay_store::StoreConfig;
use shellrelay_transport::TcpTransport;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::cmd::{cancel_on_ctrl_c, ConsoleArgs};
use crate::exit::{session_error, transport_error, CliResult, SUCCESS};
use crate::output::{OutputFormat, TerminalSurface};

pub async fn run(args: ConsoleArgs, format: OutputFormat) -> CliResult<i32> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone())?;

    let config = ConsoleConfig {
        idle_timeout: args.idle_timeout,
        store: StoreConfig {
            dest_dir: args.dest.clone(),
            check_archives: !args.no_archive_check,
            ..StoreConfig::default()
        },
        ..ConsoleConfig::default()
    };

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpTransport::bind(&addr)
        .await
        .map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(addr = %listener.local_addr(), dest = %args.dest.display(), "waiting for agents");

    // Shared across sessions so typed-ahead input is not lost between agents.
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut surface = TerminalSurface::stdout(format);

    loop {
        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            conn = listener.accept() => conn.map_err(|err| transport_error("accept failed", err))?,
        };
        let peer = conn.peer_addr();
        if let Err(err) = conn.set_nodelay(true) {
            tracing::debug!(%peer, %err, "could not disable nagle");
        }
        tracing::info!(%peer, "agent connected, type 'help' for commands");

        let (reader, writer) = conn.into_split();
        let session = ConsoleSession::with_cancel(config.clone(), cancel.child_token());
        match session
            .run(reader, writer, &mut stdin, tokio::io::stdout(), &mut surface)
            .await
        {
            Ok(summary) => tracing::info!(
                %peer,
                lines = summary.lines_received,
                sent = summary.commands_sent,
                dropped = summary.commands_dropped,
                "session ended"
            ),
            Err(err) if err.is_disconnect() => {
                tracing::warn!(%peer, %err, "agent connection lost");
            }
            Err(err) => return Err(session_error("console session failed", err)),
        }
    }

    Ok(SUCCESS)
}
