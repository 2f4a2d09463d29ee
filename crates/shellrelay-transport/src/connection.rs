use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::Result;

/// Read half of a split [`Connection`].
pub type ConnectionReader = OwnedReadHalf;

/// Write half of a split [`Connection`].
pub type ConnectionWriter = OwnedWriteHalf;

/// A connected agent/console stream.
///
/// This is the fundamental I/O type returned by transport operations. It is
/// consumed by [`Connection::into_split`], which hands out one reader and one
/// writer; there is no way to obtain a second reader or writer for the same
/// socket.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub(crate) fn from_tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of this end.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().map_err(Into::into)
    }

    /// Disable Nagle's algorithm; frames are many small line writes.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.stream.set_nodelay(nodelay).map_err(Into::into)
    }

    /// Split into the single reader and the single writer for this socket.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        self.stream.into_split()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("type", &"tcp")
            .field("peer", &self.peer)
            .finish()
    }
}
