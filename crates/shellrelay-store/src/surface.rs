//! Where the console shows what arrives.

use shellrelay_frame::TransferProgress;
use tracing::Level;

use crate::report::{FileReport, ScreenshotReport};

/// Receives everything the operator should see.
///
/// Implementations decide presentation; the materializer only decides
/// what is shown.
pub trait ConsoleSurface {
    /// One line of command output, verbatim.
    fn text_line(&mut self, line: &str);

    /// The agent finished answering the current command.
    fn response_complete(&mut self);

    fn progress(&mut self, progress: &TransferProgress);

    /// A status message about the transfer machinery.
    fn notice(&mut self, level: Level, message: &str);

    fn file_saved(&mut self, report: &FileReport);

    fn screenshot_saved(&mut self, report: &ScreenshotReport);
}

/// What a [`RecordingSurface`] was told.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Text(String),
    ResponseComplete,
    Progress(TransferProgress),
    Notice(Level, String),
    FileSaved(FileReport),
    ScreenshotSaved(ScreenshotReport),
}

/// A surface that keeps every call in memory.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub events: Vec<SurfaceEvent>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text lines received so far.
    pub fn text(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SurfaceEvent::Text(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Notices at exactly `level`.
    pub fn notices(&self, level: Level) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SurfaceEvent::Notice(l, message) if *l == level => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<&FileReport> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SurfaceEvent::FileSaved(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    pub fn screenshots(&self) -> Vec<&ScreenshotReport> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SurfaceEvent::ScreenshotSaved(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    /// Number of completed responses.
    pub fn responses(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, SurfaceEvent::ResponseComplete))
            .count()
    }
}

impl ConsoleSurface for RecordingSurface {
    fn text_line(&mut self, line: &str) {
        self.events.push(SurfaceEvent::Text(line.to_string()));
    }

    fn response_complete(&mut self) {
        self.events.push(SurfaceEvent::ResponseComplete);
    }

    fn progress(&mut self, progress: &TransferProgress) {
        self.events.push(SurfaceEvent::Progress(progress.clone()));
    }

    fn notice(&mut self, level: Level, message: &str) {
        self.events
            .push(SurfaceEvent::Notice(level, message.to_string()));
    }

    fn file_saved(&mut self, report: &FileReport) {
        self.events.push(SurfaceEvent::FileSaved(report.clone()));
    }

    fn screenshot_saved(&mut self, report: &ScreenshotReport) {
        self.events
            .push(SurfaceEvent::ScreenshotSaved(report.clone()));
    }
}

impl<S: ConsoleSurface + ?Sized> ConsoleSurface for Box<S> {
    fn text_line(&mut self, line: &str) {
        (**self).text_line(line)
    }

    fn response_complete(&mut self) {
        (**self).response_complete()
    }

    fn progress(&mut self, progress: &TransferProgress) {
        (**self).progress(progress)
    }

    fn notice(&mut self, level: Level, message: &str) {
        (**self).notice(level, message)
    }

    fn file_saved(&mut self, report: &FileReport) {
        (**self).file_saved(report)
    }

    fn screenshot_saved(&mut self, report: &ScreenshotReport) {
        (**self).screenshot_saved(report)
    }
}
