//! TCP transport for the shellrelay agent/console connection.
//!
//! The console listens, the agent connects out. Once established, a
//! [`Connection`] is split into exactly one read half and one write half so
//! that a single task reads responses and a single task writes commands.
//!
//! This is the lowest layer of shellrelay. Everything else builds on top of
//! the [`Connection`] type provided here.

pub mod connection;
pub mod error;
pub mod tcp;

pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use error::{Result, TransportError};
pub use tcp::{connect, connect_timeout, TcpTransport, DEFAULT_PORT};
