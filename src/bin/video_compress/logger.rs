use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;

use crate::config::Config;
use crate::probe::EncoderProfile;
use crate::stats::{BatchSummary, CompressionStats};

/// Simple session logger with buffered writes
pub struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    /// Create a new file logger, writing to ~/logs/video-compress/vcompress_<timestamp>.log
    pub(crate) fn new() -> Result<Self> {
        let log_dir = video_compress::config::LOG_DIR
            .as_deref()
            .context("Failed to get home directory")?;

        if !log_dir.exists() {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }

        let log_path = log_dir.join(format!("vcompress_{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S")));
        Self::with_path(&log_path)
    }

    /// Create a file logger appending to the given file.
    pub(crate) fn with_path(log_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Log when starting the batch
    pub(crate) fn log_init(&mut self, config: &Config, profile: &EncoderProfile) {
        let _ = writeln!(
            self.writer,
            "[{}] INIT \"{}\"",
            Self::timestamp(),
            config.path.display()
        );
        let _ = writeln!(self.writer, "  encoder: {profile}");
        let _ = writeln!(self.writer, "  quality: {}", config.quality);
        let _ = writeln!(self.writer, "  extension: {}", config.extension);
        let _ = writeln!(self.writer, "  output: {}", config.output_dir.display());
        let _ = writeln!(self.writer, "  skipped: {}", config.skipped_dir.display());
        let _ = writeln!(self.writer, "  log: {}", config.log_file.display());
        if let Some(count) = config.count {
            let _ = writeln!(self.writer, "  count: {count}");
        }
        let _ = writeln!(self.writer, "  verbose: {}", config.verbose);
        let _ = self.writer.flush();
    }

    /// Log when starting to compress a file
    pub(crate) fn log_start(&mut self, file_path: &Path, file_index: &str) {
        let _ = writeln!(
            self.writer,
            "[{}] START   {} - \"{}\"",
            Self::timestamp(),
            file_index,
            file_path.display()
        );
        let _ = self.writer.flush();
    }

    /// Log when a file was compressed successfully
    pub(crate) fn log_success(
        &mut self,
        file_path: &Path,
        file_index: &str,
        duration: Duration,
        stats: &CompressionStats,
    ) {
        let _ = writeln!(
            self.writer,
            "[{}] SUCCESS {} - \"{}\" | Time: {} | {}",
            Self::timestamp(),
            file_index,
            file_path.display(),
            video_compress::format_duration(duration),
            stats
        );
        let _ = self.writer.flush();
    }

    /// Log when a file was skipped
    pub(crate) fn log_skip(&mut self, file_path: &Path, file_index: &str, reason: &str) {
        let _ = writeln!(
            self.writer,
            "[{}] SKIP    {} - \"{}\" | {}",
            Self::timestamp(),
            file_index,
            file_path.display(),
            reason
        );
        let _ = self.writer.flush();
    }

    /// Log when compressing a file fails
    pub(crate) fn log_failure(&mut self, file_path: &Path, file_index: &str, error: &str) {
        let _ = writeln!(
            self.writer,
            "[{}] ERROR   {} - \"{}\" | {}",
            Self::timestamp(),
            file_index,
            file_path.display(),
            error
        );
        let _ = self.writer.flush();
    }

    /// Log final statistics
    pub(crate) fn log_stats(&mut self, summary: &BatchSummary) {
        let _ = writeln!(self.writer, "[{}] STATISTICS", Self::timestamp());
        let _ = writeln!(self.writer, "  Files compressed: {}", summary.files_compressed);
        let _ = writeln!(self.writer, "  Files failed:     {}", summary.files_failed);
        let _ = writeln!(self.writer, "  Files skipped:    {}", summary.total_skipped());
        if summary.total_skipped() > 0 {
            let _ = writeln!(
                self.writer,
                "    - Not smaller:       {}",
                summary.files_skipped_ineffective
            );
            let _ = writeln!(
                self.writer,
                "    - Already processed: {}",
                summary.files_skipped_processed
            );
        }

        if summary.files_compressed > 0 {
            let _ = writeln!(
                self.writer,
                "  Total original size:   {}",
                video_compress::format_size(summary.total_original_size)
            );
            let _ = writeln!(
                self.writer,
                "  Total compressed size: {}",
                video_compress::format_size(summary.total_compressed_size)
            );
            let _ = writeln!(
                self.writer,
                "  Space saved: {}",
                video_compress::format_size(summary.space_saved())
            );
        }

        let _ = writeln!(
            self.writer,
            "  Total time: {}",
            video_compress::format_duration(summary.total_duration)
        );
        let _ = writeln!(self.writer, "[{}] END", Self::timestamp());
        let _ = self.writer.flush();
    }
}
