use std::future::Future;
use std::path::PathBuf;

/// Why a screenshot could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No display is attached to this agent.
    #[error("no display available for screen capture")]
    NoDisplay,

    #[error("failed reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Produces PNG-encoded screenshots.
pub trait ScreenCapture: Send + Sync {
    fn capture(&self) -> impl Future<Output = Result<Vec<u8>, CaptureError>> + Send;
}

/// Capture backend for headless agents. Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDisplay;

impl ScreenCapture for NoDisplay {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        Err(CaptureError::NoDisplay)
    }
}

/// Serves the current contents of a PNG file as the screenshot.
///
/// Useful with an external tool that keeps the file up to date.
#[derive(Debug, Clone)]
pub struct PngFileCapture {
    path: PathBuf,
}

impl PngFileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScreenCapture for PngFileCapture {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| CaptureError::Read {
                path: self.path.clone(),
                source,
            })
    }
}
