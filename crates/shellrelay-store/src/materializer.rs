//! Turns completed frames into files on disk.

use std::io::Write;
use std::path::Path;

use image::ImageFormat;
use shellrelay_frame::{decode_payload, DemuxEvent, FileArtifact, ScreenshotArtifact};
use tracing::{info, warn, Level};

use crate::archive::{self, ArchiveCheck, ArchiveKind};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::naming::{create_unique, sanitize_name, screenshot_name};
use crate::report::{FileReport, ScreenshotReport};
use crate::surface::ConsoleSurface;

/// Writes received payloads under [`StoreConfig::dest_dir`].
#[derive(Debug, Clone)]
pub struct Materializer {
    config: StoreConfig,
}

impl Materializer {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Route one demultiplexer event to the surface, writing payloads to
    /// disk as they complete. Failures become surface notices.
    ///
    /// Disk work runs on the calling thread; async callers should use
    /// [`Materializer::deliver_async`].
    pub fn deliver<S: ConsoleSurface + ?Sized>(&self, event: DemuxEvent, surface: &mut S) {
        match event {
            DemuxEvent::FileCompleted(artifact) => {
                let saved = self.save_file(&artifact);
                report_file(&artifact.name, saved, surface);
            }
            DemuxEvent::ScreenshotCompleted(artifact) => {
                report_screenshot(self.save_screenshot(&artifact), surface);
            }
            DemuxEvent::Text(line) => surface.text_line(&line),
            DemuxEvent::ResponseComplete => surface.response_complete(),
            DemuxEvent::FileStarted {
                name,
                declared_size,
            } => surface.notice(
                Level::INFO,
                &format!("Receiving file: {name} ({declared_size} bytes)"),
            ),
            DemuxEvent::Progress(progress) => surface.progress(&progress),
            DemuxEvent::ChunkRejected {
                error,
                decode_errors,
            } => surface.notice(
                Level::WARN,
                &format!("Skipped chunk ({decode_errors} so far): {error}"),
            ),
            DemuxEvent::ScreenshotStarted { declared_size } => surface.notice(
                Level::INFO,
                &format!("Receiving screenshot ({declared_size} bytes)"),
            ),
            DemuxEvent::TransferAborted {
                kind,
                name,
                reason,
                received,
            } => {
                let what = match name {
                    Some(name) => format!("{} {name}", kind.name()),
                    None => kind.name().to_string(),
                };
                surface.notice(
                    Level::WARN,
                    &format!("Transfer of {what} aborted after {received} bytes: {reason}"),
                );
            }
        }
    }

    /// Like [`Materializer::deliver`], but payloads are written on the
    /// blocking pool so the calling task keeps its other work moving.
    pub async fn deliver_async<S: ConsoleSurface + ?Sized>(
        &self,
        event: DemuxEvent,
        surface: &mut S,
    ) {
        match event {
            DemuxEvent::FileCompleted(artifact) => {
                let name = artifact.name.clone();
                let store = self.clone();
                let saved = tokio::task::spawn_blocking(move || store.save_file(&artifact))
                    .await
                    .unwrap_or_else(|err| Err(StoreError::Task(err.to_string())));
                report_file(&name, saved, surface);
            }
            DemuxEvent::ScreenshotCompleted(artifact) => {
                let store = self.clone();
                let saved = tokio::task::spawn_blocking(move || store.save_screenshot(&artifact))
                    .await
                    .unwrap_or_else(|err| Err(StoreError::Task(err.to_string())));
                report_screenshot(saved, surface);
            }
            other => self.deliver(other, surface),
        }
    }

    /// Write a received file under a fresh local name.
    ///
    /// The declared size is advisory: a mismatch is flagged in the report
    /// but the bytes are written regardless.
    pub fn save_file(&self, artifact: &FileArtifact) -> Result<FileReport> {
        self.ensure_dest_dir()?;
        let local_name = sanitize_name(&artifact.name);
        let (path, file) =
            create_unique(&self.config.dest_dir, &local_name, self.config.max_name_suffix)?;
        fill_new_file(&path, file, &artifact.data)?;

        let size_mismatch = artifact.size_mismatch();
        if size_mismatch {
            warn!(
                name = %artifact.name,
                declared = artifact.declared_size,
                received = artifact.received(),
                "file size mismatch"
            );
        }

        let archive = self.check_archive(&path);
        info!(
            path = %path.display(),
            bytes = artifact.received(),
            chunks = artifact.chunks,
            decode_errors = artifact.decode_errors,
            "file saved"
        );

        Ok(FileReport {
            remote_name: artifact.name.clone(),
            path,
            declared_size: artifact.declared_size,
            written: artifact.received(),
            size_mismatch,
            chunks: artifact.chunks,
            decode_errors: artifact.decode_errors,
            elapsed_ms: millis(artifact.elapsed),
            archive,
        })
    }

    /// Decode, validate and write a received screenshot.
    ///
    /// Nothing is written unless the payload is a readable PNG. A file of
    /// the same name is replaced. As with files, the declared size is only
    /// compared and reported.
    pub fn save_screenshot(&self, artifact: &ScreenshotArtifact) -> Result<ScreenshotReport> {
        let bytes = decode_payload(&artifact.encoded)?;
        let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|err| StoreError::InvalidImage(err.to_string()))?;

        self.ensure_dest_dir()?;
        let path = self
            .config
            .dest_dir
            .join(screenshot_name(&chrono::Local::now()));
        std::fs::write(&path, &bytes).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        let received = bytes.len() as u64;
        let size_mismatch = received != artifact.declared_size;
        if size_mismatch {
            warn!(
                declared = artifact.declared_size,
                received,
                "screenshot size mismatch"
            );
        }
        info!(
            path = %path.display(),
            bytes = received,
            width = image.width(),
            height = image.height(),
            "screenshot saved"
        );

        Ok(ScreenshotReport {
            path,
            declared_size: artifact.declared_size,
            bytes: received,
            size_mismatch,
            width: image.width(),
            height: image.height(),
            lines: artifact.lines,
            elapsed_ms: millis(artifact.elapsed),
        })
    }

    fn check_archive(&self, path: &Path) -> Option<ArchiveCheck> {
        if !self.config.check_archives {
            return None;
        }
        let kind = ArchiveKind::from_path(path)?;
        let check = archive::check(path, kind);
        if let ArchiveCheck::Corrupt { reason, .. } = &check {
            warn!(path = %path.display(), %reason, "received archive failed to open");
        }
        Some(check)
    }

    fn ensure_dest_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.dest_dir).map_err(|source| StoreError::Io {
            path: self.config.dest_dir.clone(),
            source,
        })
    }
}

fn report_file<S: ConsoleSurface + ?Sized>(
    name: &str,
    saved: Result<FileReport>,
    surface: &mut S,
) {
    match saved {
        Ok(report) => {
            if report.size_mismatch {
                surface.notice(
                    Level::WARN,
                    &format!(
                        "Size mismatch for {}: expected {} bytes, received {}",
                        report.remote_name, report.declared_size, report.written
                    ),
                );
            }
            if let Some(ArchiveCheck::Corrupt { reason, .. }) = &report.archive {
                surface.notice(Level::WARN, reason);
            }
            surface.file_saved(&report);
        }
        Err(err) => surface.notice(Level::ERROR, &format!("Failed to save {name}: {err}")),
    }
}

fn report_screenshot<S: ConsoleSurface + ?Sized>(
    saved: Result<ScreenshotReport>,
    surface: &mut S,
) {
    match saved {
        Ok(report) => {
            if report.size_mismatch {
                surface.notice(
                    Level::WARN,
                    &format!(
                        "Size mismatch for screenshot: expected {} bytes, received {}",
                        report.declared_size, report.bytes
                    ),
                );
            }
            surface.screenshot_saved(&report);
        }
        Err(err) => surface.notice(Level::ERROR, &format!("Screenshot not saved: {err}")),
    }
}

/// Write `data` into a file `create_unique` just claimed. On failure the
/// file is removed so no partial payload is left under the name.
fn fill_new_file<W: Write>(path: &Path, mut file: W, data: &[u8]) -> Result<()> {
    let written = file.write_all(data).and_then(|()| file.flush());
    drop(file);
    written.map_err(|source| {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), %err, "could not remove partial file");
        }
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn millis(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
