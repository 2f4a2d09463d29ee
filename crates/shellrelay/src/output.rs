use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use shellrelay_frame::TransferProgress;
use shellrelay_store::{ArchiveCheck, ConsoleSurface, FileReport, ScreenshotReport};
use tracing::Level;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Printed after each complete agent response in human formats.
const RESPONSE_SEPARATOR: &str = "--- Command execution completed ---";

/// One JSON line per surface call.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Text {
        line: &'a str,
    },
    ResponseComplete,
    Progress {
        name: &'a str,
        received: u64,
        expected: u64,
        percent: Option<u8>,
        chunks: u64,
        bytes_per_sec: u64,
    },
    Notice {
        level: &'a str,
        message: &'a str,
    },
    FileSaved(&'a FileReport),
    ScreenshotSaved(&'a ScreenshotReport),
}

/// Console surface writing to a terminal (or any writer).
///
/// Command output is always printed verbatim; `format` only shapes the
/// transfer reports and notices.
pub struct TerminalSurface<W: Write> {
    out: W,
    format: OutputFormat,
    progress_active: bool,
}

impl TerminalSurface<std::io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            progress_active: false,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit_json(&mut self, event: &JsonEvent<'_>) {
        let line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
        let _ = writeln!(self.out, "{line}");
    }

    /// Finish an in-place progress line before printing anything else.
    fn end_progress(&mut self) {
        if self.progress_active {
            self.progress_active = false;
            let _ = writeln!(self.out);
        }
    }
}

impl<W: Write> ConsoleSurface for TerminalSurface<W> {
    fn text_line(&mut self, line: &str) {
        self.end_progress();
        match self.format {
            OutputFormat::Json => self.emit_json(&JsonEvent::Text { line }),
            OutputFormat::Table | OutputFormat::Pretty => {
                let _ = writeln!(self.out, "{line}");
            }
        }
    }

    fn response_complete(&mut self) {
        self.end_progress();
        match self.format {
            OutputFormat::Json => self.emit_json(&JsonEvent::ResponseComplete),
            OutputFormat::Table | OutputFormat::Pretty => {
                let _ = writeln!(self.out, "{RESPONSE_SEPARATOR}");
            }
        }
        let _ = self.out.flush();
    }

    fn progress(&mut self, progress: &TransferProgress) {
        match self.format {
            OutputFormat::Json => self.emit_json(&JsonEvent::Progress {
                name: &progress.name,
                received: progress.received,
                expected: progress.expected,
                percent: progress.percent,
                chunks: progress.chunks,
                bytes_per_sec: progress.bytes_per_sec() as u64,
            }),
            OutputFormat::Table | OutputFormat::Pretty => {
                let percent = progress
                    .percent
                    .map(|p| format!("{p:>3}%"))
                    .unwrap_or_else(|| "   ?".to_string());
                let _ = write!(
                    self.out,
                    "\rReceiving {}: {percent} ({}/{} bytes, {}/s)",
                    progress.name,
                    progress.received,
                    progress.expected,
                    human_bytes(progress.bytes_per_sec() as u64),
                );
                let _ = self.out.flush();
                self.progress_active = true;
            }
        }
    }

    fn notice(&mut self, level: Level, message: &str) {
        self.end_progress();
        match self.format {
            OutputFormat::Json => self.emit_json(&JsonEvent::Notice {
                level: level.as_str(),
                message,
            }),
            OutputFormat::Table | OutputFormat::Pretty => {
                let _ = writeln!(self.out, "[{level}] {message}");
            }
        }
    }

    fn file_saved(&mut self, report: &FileReport) {
        self.end_progress();
        match self.format {
            OutputFormat::Json => self.emit_json(&JsonEvent::FileSaved(report)),
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["FILE", "SAVED AS", "BYTES", "CHUNKS", "ERRORS", "ARCHIVE"])
                    .add_row(vec![
                        report.remote_name.clone(),
                        report.path.display().to_string(),
                        size_cell(report.written, report.declared_size),
                        report.chunks.to_string(),
                        report.decode_errors.to_string(),
                        archive_cell(report.archive.as_ref()),
                    ]);
                let _ = writeln!(self.out, "{table}");
            }
            OutputFormat::Pretty => {
                let _ = writeln!(
                    self.out,
                    "File saved: {} ({} bytes, {} chunks, {} ms)",
                    report.path.display(),
                    report.written,
                    report.chunks,
                    report.elapsed_ms
                );
            }
        }
    }

    fn screenshot_saved(&mut self, report: &ScreenshotReport) {
        self.end_progress();
        match self.format {
            OutputFormat::Json => self.emit_json(&JsonEvent::ScreenshotSaved(report)),
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["SCREENSHOT", "SIZE", "BYTES"])
                    .add_row(vec![
                        report.path.display().to_string(),
                        format!("{}x{}", report.width, report.height),
                        report.bytes.to_string(),
                    ]);
                let _ = writeln!(self.out, "{table}");
            }
            OutputFormat::Pretty => {
                let _ = writeln!(
                    self.out,
                    "Screenshot saved: {} ({}x{}, {} bytes)",
                    report.path.display(),
                    report.width,
                    report.height,
                    report.bytes
                );
            }
        }
    }
}

fn size_cell(written: u64, declared: u64) -> String {
    if written == declared {
        written.to_string()
    } else {
        format!("{written} (expected {declared})")
    }
}

fn archive_cell(check: Option<&ArchiveCheck>) -> String {
    match check {
        None => "-".to_string(),
        Some(ArchiveCheck::Valid { entries, .. }) => format!("ok, {entries} entries"),
        Some(ArchiveCheck::Corrupt { .. }) => "corrupt".to_string(),
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
