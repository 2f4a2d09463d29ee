use std::time::Duration;

use shellrelay_session::{
    AgentConfig, AgentExit, AgentSession, NoDisplay, PngFileCapture, ScreenCapture, ShellExecutor,
};
use shellrelay_transport::connect_timeout;
use tokio_util::sync::CancellationToken;

use crate::cmd::{cancel_on_ctrl_c, AgentArgs};
use crate::exit::{CliResult, SUCCESS};

pub async fn run(args: AgentArgs) -> CliResult<i32> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone())?;

    match args.capture_file.clone() {
        Some(path) => serve(&args, PngFileCapture::new(path), cancel).await,
        None => serve(&args, NoDisplay, cancel).await,
    }
}

/// Connect, serve, and reconnect until `exit` or Ctrl-C.
async fn serve<C: ScreenCapture>(
    args: &AgentArgs,
    capture: C,
    cancel: CancellationToken,
) -> CliResult<i32> {
    let addr = format!("{}:{}", args.server, args.port);
    let session = AgentSession::new(AgentConfig::default(), ShellExecutor, capture)
        .with_cancel(cancel.clone());

    loop {
        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(SUCCESS),
            conn = connect_timeout(&addr, args.connect_timeout) => conn,
        };

        match conn {
            Ok(conn) => {
                let peer = conn.peer_addr();
                tracing::info!(%peer, "connected to console");
                let (reader, writer) = conn.into_split();
                match session.run(reader, writer).await {
                    Ok(AgentExit::ExitRequested) => {
                        tracing::info!("console requested exit");
                        return Ok(SUCCESS);
                    }
                    Ok(AgentExit::Cancelled) => return Ok(SUCCESS),
                    Ok(AgentExit::Disconnected) => {
                        tracing::warn!(%peer, "console disconnected");
                    }
                    Err(err) => tracing::warn!(%peer, %err, "session failed"),
                }
            }
            Err(err) => tracing::warn!(%addr, %err, "connection attempt failed"),
        }

        if !wait_retry(&cancel, args.retry_interval).await {
            return Ok(SUCCESS);
        }
    }
}

/// Sleep before reconnecting. Returns false if cancelled meanwhile.
async fn wait_retry(cancel: &CancellationToken, interval: Duration) -> bool {
    tracing::info!(?interval, "retrying");
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(interval) => true,
    }
}
