use std::time::Duration;

use colored::Colorize;

use crate::config::Config;
use crate::job::{JobResult, Outcome};

/// Statistics for the batch run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub(crate) files_compressed: usize,
    pub(crate) files_skipped_ineffective: usize,
    pub(crate) files_skipped_processed: usize,
    pub(crate) files_failed: usize,
    pub(crate) total_original_size: u64,
    pub(crate) total_compressed_size: u64,
    pub(crate) total_duration: Duration,
}

/// Size change for a single compressed file
#[derive(Debug, Default, Clone, Copy)]
pub struct CompressionStats {
    original_size: u64,
    compressed_size: u64,
}

impl CompressionStats {
    pub(crate) const fn new(original_size: u64, compressed_size: u64) -> Self {
        Self {
            original_size,
            compressed_size,
        }
    }

    /// Percentage of the original size saved
    fn saved_percentage(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        let diff = self.original_size.saturating_sub(self.compressed_size);
        diff as f64 / self.original_size as f64 * 100.0
    }
}

impl BatchSummary {
    pub(crate) fn add_result(&mut self, result: &JobResult, duration: Duration) {
        self.total_duration += duration;
        match &result.outcome {
            Outcome::Compressed => {
                self.files_compressed += 1;
                *self += CompressionStats::new(result.original_size, result.compressed_size);
            }
            Outcome::SkippedIneffective => self.files_skipped_ineffective += 1,
            Outcome::SkippedAlreadyProcessed => self.files_skipped_processed += 1,
            Outcome::Failed(_) => self.files_failed += 1,
        }
    }

    /// Count a file found in the skipped directory before running a job for it.
    pub(crate) const fn add_already_processed(&mut self) {
        self.files_skipped_processed += 1;
    }

    pub(crate) const fn total_skipped(&self) -> usize {
        self.files_skipped_ineffective + self.files_skipped_processed
    }

    pub(crate) const fn total_processed(&self) -> usize {
        self.files_compressed + self.total_skipped() + self.files_failed
    }

    pub(crate) const fn space_saved(&self) -> u64 {
        self.total_original_size.saturating_sub(self.total_compressed_size)
    }

    pub(crate) fn print_summary(&self, config: &Config) {
        println!("{}", "\n--- Compression Summary ---".bold().magenta());
        println!("Files compressed:       {}", self.files_compressed);
        println!(
            "Files failed:           {}",
            if self.files_failed > 0 {
                self.files_failed.to_string().red()
            } else {
                "0".normal()
            }
        );
        println!("Files skipped:          {}", self.total_skipped());
        if self.total_skipped() > 0 {
            println!("  - Not smaller:        {}", self.files_skipped_ineffective);
            println!("  - Already processed:  {}", self.files_skipped_processed);
        }
        println!();

        if self.files_compressed > 0 {
            println!(
                "Total original size:    {}",
                video_compress::format_size(self.total_original_size)
            );
            println!(
                "Total compressed size:  {}",
                video_compress::format_size(self.total_compressed_size)
            );
            if self.total_original_size > 0 {
                let ratio = self.space_saved() as f64 / self.total_original_size as f64 * 100.0;
                println!(
                    "Space saved:            {} ({ratio:.1}%)",
                    video_compress::format_size(self.space_saved())
                );
            }
            println!();
        }

        println!(
            "Compressed files:       {}",
            video_compress::path_to_string_relative(&config.output_dir)
        );
        println!(
            "Skipped files:          {}",
            video_compress::path_to_string_relative(&config.skipped_dir)
        );
        println!(
            "Outcome log:            {}",
            video_compress::path_to_string_relative(&config.log_file)
        );
        println!(
            "Total time:             {}",
            video_compress::format_duration(self.total_duration)
        );
    }
}

impl std::fmt::Display for CompressionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} ({:.1}% saved)",
            video_compress::format_size(self.original_size),
            video_compress::format_size(self.compressed_size),
            self.saved_percentage()
        )
    }
}

impl std::ops::AddAssign<CompressionStats> for BatchSummary {
    fn add_assign(&mut self, stats: CompressionStats) {
        self.total_original_size += stats.original_size;
        self.total_compressed_size += stats.compressed_size;
    }
}
