use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{Result, TransportError};

/// Port the console listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 2006;

/// TCP listener used by the console side.
pub struct TcpTransport {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr` (for example `0.0.0.0:2006`).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%addr, "listening for agents");

        Ok(Self { listener, addr })
    }

    /// Accept the next agent connection.
    pub async fn accept(&self) -> Result<Connection> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        Ok(Connection::from_tcp(stream, peer))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Connect to a listening console.
pub async fn connect(addr: &str) -> Result<Connection> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
    let peer = stream.peer_addr()?;
    debug!(%peer, "connected to console");
    Ok(Connection::from_tcp(stream, peer))
}

/// Connect, giving up after `timeout`.
pub async fn connect_timeout(addr: &str, timeout: Duration) -> Result<Connection> {
    match tokio::time::timeout(timeout, connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            addr: addr.to_string(),
            timeout,
        }),
    }
}
