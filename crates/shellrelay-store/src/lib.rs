//! Console-side storage for received payloads.
//!
//! [`Materializer`] takes what the demultiplexer produces and turns it into
//! files under a destination directory, reporting everything through a
//! [`ConsoleSurface`].

pub mod archive;
pub mod config;
pub mod error;
pub mod materializer;
pub mod naming;
pub mod report;
pub mod surface;

pub use archive::{ArchiveCheck, ArchiveKind};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use materializer::Materializer;
pub use report::{FileReport, ScreenshotReport};
pub use surface::{ConsoleSurface, RecordingSurface, SurfaceEvent};
