use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use video_compress::print_error;

use crate::job::{FileTask, JobResult, Outcome};

/// Header row of the outcome log.
pub const HEADER: &str = "Filename,Original Size (MB),Compressed Size (MB),Compression Ratio (%),Skipped";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One row of the outcome log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub(crate) filename: String,
    pub(crate) original_size_mb: f64,
    pub(crate) compressed_size_mb: f64,
    pub(crate) skipped: bool,
}

/// Append-only CSV record of per-file outcomes.
#[derive(Debug, Clone)]
pub struct OutcomeLog {
    path: PathBuf,
}

impl LogRecord {
    pub fn from_result(task: &FileTask, result: &JobResult) -> Self {
        Self {
            filename: task.display_name.clone(),
            original_size_mb: result.original_size as f64 / BYTES_PER_MB,
            compressed_size_mb: result.compressed_size as f64 / BYTES_PER_MB,
            skipped: !matches!(result.outcome, Outcome::Compressed),
        }
    }

    /// Percentage of space saved, or zero if the original size is unknown.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size_mb > 0.0 {
            100.0 - (self.compressed_size_mb / self.original_size_mb * 100.0)
        } else {
            0.0
        }
    }

    fn to_csv_row(&self) -> String {
        format!(
            "{},{:.2},{:.2},{:.2},{}",
            quote_field(&self.filename),
            self.original_size_mb,
            self.compressed_size_mb,
            self.compression_ratio(),
            u8::from(self.skipped)
        )
    }
}

impl OutcomeLog {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with the header row if it does not exist yet.
    /// An existing log is left untouched.
    pub fn initialize(&self) -> io::Result<()> {
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => writeln!(file, "{HEADER}"),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Append one row. Errors are printed and otherwise ignored.
    pub fn append(&self, record: &LogRecord) {
        if let Err(error) = self.try_append(record) {
            print_error!("Failed to write to log {}: {error}", self.path.display());
        }
    }

    fn try_append(&self, record: &LogRecord) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", record.to_csv_row())
    }

    /// Read all lines of the log.
    #[cfg(test)]
    pub fn read_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.path)
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }
}

/// Quote a CSV field if it contains a separator, quote, or line break.
fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Create a directory and its parents if missing.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
