//! Remote command agent and console.
//!
//! An agent connects out to a console, runs the commands it is sent and
//! answers each with one framed response: text, a file, or a screenshot.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener and connector
//! - [`frame`]: line protocol, chunk codec, encoder and demultiplexer
//! - [`store`]: writes received files and screenshots to disk
//! - [`session`]: console and agent session tasks

/// Re-export transport types.
pub mod transport {
    pub use shellrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use shellrelay_frame::*;
}

/// Re-export store types.
pub mod store {
    pub use shellrelay_store::*;
}

/// Re-export session types.
pub mod session {
    pub use shellrelay_session::*;
}
