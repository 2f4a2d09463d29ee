/// Errors that can end a console or agent session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] shellrelay_transport::TransportError),

    /// Frame-level error on the connection.
    #[error("frame error: {0}")]
    Frame(#[from] shellrelay_frame::FrameError),

    /// Reading operator input failed.
    #[error("failed reading operator input: {0}")]
    Input(#[source] std::io::Error),
}

impl SessionError {
    /// True when the connection itself is gone, as opposed to a local fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Transport(_) => true,
            SessionError::Frame(err) => err.is_transport(),
            SessionError::Input(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
