use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::ProgressBar;
#[cfg(not(test))]
use indicatif::ProgressStyle;
use walkdir::WalkDir;

use video_compress::{print_error, print_warning};

use crate::abort::AbortSignal;
use crate::config::{Config, has_extension};
use crate::job::{CompressionJob, FileTask, JobResult, OUTPUT_PREFIX, Outcome};
use crate::logger::FileLogger;
use crate::outcome_log::{LogRecord, OutcomeLog, ensure_parent_dir};
use crate::probe::{self, EncoderProfile};
use crate::stats::{BatchSummary, CompressionStats};

#[cfg(not(test))]
const PROGRESS_BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s ({eta})";
#[cfg(not(test))]
const PROGRESS_BAR_CHARS: &str = "=>-";

/// Runs compression jobs for all matching files in the input directory.
pub struct BatchCoordinator {
    config: Config,
    outcome_log: OutcomeLog,
    logger: Option<RefCell<FileLogger>>,
    abort: Arc<AbortSignal>,
}

impl BatchCoordinator {
    /// Create a coordinator writing a session log to the default log directory.
    pub fn new(config: Config) -> Self {
        let logger = if config.dryrun {
            None
        } else {
            FileLogger::new()
                .map_err(|e| print_warning!("Session log disabled: {e}"))
                .ok()
        };
        Self::with_parts(config, logger, Arc::default())
    }

    pub fn with_parts(config: Config, logger: Option<FileLogger>, abort: Arc<AbortSignal>) -> Self {
        Self {
            outcome_log: OutcomeLog::new(config.log_file.clone()),
            config,
            logger: logger.map(RefCell::new),
            abort,
        }
    }

    /// Compress all files and print a summary.
    pub fn run(&self) -> Result<()> {
        self.abort.install_handler()?;
        let summary = self.run_batch()?;
        if !self.config.dryrun && summary.total_processed() > 0 {
            summary.print_summary(&self.config);
        }
        Ok(())
    }

    /// Process files sequentially until done, stopped, or the file limit is reached.
    ///
    /// Only failing to enumerate the input directory or to create the output directories is an error.
    /// Per-file failures are recorded and the batch continues.
    pub fn run_batch(&self) -> Result<BatchSummary> {
        let files = self.gather_files()?;
        let mut summary = BatchSummary::default();
        if files.is_empty() {
            println!("No {} files found in {}", self.config.extension, self.config.path.display());
            return Ok(summary);
        }

        if self.config.verbose {
            println!("Found {} file(s) to process", files.len());
        }

        let profile = self
            .config
            .encoder
            .map_or_else(|| probe::detect(&self.config.ffmpeg), probe::EncoderKind::profile);
        println!("{}", format!("Using encoder: {profile}").bold());

        if self.config.dryrun {
            self.print_commands(&files, &profile);
            return Ok(summary);
        }

        self.bootstrap()?;
        self.log_init(&profile);

        let total = files.len();
        let num_digits = total.to_string().chars().count();
        let mut processed_files: usize = 0;
        let mut aborted = false;

        for (index, task) in files.iter().enumerate() {
            if self.abort.should_stop() {
                aborted = true;
                break;
            }
            if self.config.count.is_some_and(|limit| processed_files >= limit) {
                println!("\nReached file limit");
                break;
            }

            let file_index = format!("[{:>width$}/{total}]", index + 1, width = num_digits);
            let progress_bar = Self::file_progress_bar();
            let job = CompressionJob::new(&self.config, &profile, &self.abort, progress_bar.clone());

            if job.skipped_path(task).exists() {
                summary.add_already_processed();
                if self.config.verbose {
                    println!("{file_index} {}", format!("⊘ Already processed: {}", task.display_name).dimmed());
                }
                self.log_skip(&task.source_path, &file_index, "already processed");
                continue;
            }

            println!("{} {}", file_index.bold(), task.display_name);
            self.log_start(&task.source_path, &file_index);

            let start = Instant::now();
            let result = job.run(task);
            let duration = start.elapsed();
            progress_bar.finish_and_clear();

            if result.is_interrupted() {
                print_warning!("Interrupted: {}", task.display_name);
                self.log_failure(&task.source_path, &file_index, "interrupted");
                aborted = true;
                break;
            }

            self.outcome_log.append(&LogRecord::from_result(task, &result));
            self.report(task, &job, &result, &file_index, duration);
            summary.add_result(&result, duration);
            processed_files += 1;
        }

        if aborted {
            println!("\n{}", "Aborted by user".bold().red());
        }
        self.log_stats(&summary);
        Ok(summary)
    }

    /// Collect matching files from the input directory, sorted by name.
    fn gather_files(&self) -> Result<Vec<FileTask>> {
        let path = &self.config.path;
        let mut files = Vec::new();
        for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to read directory: {}", path.display()))?;
            if entry.file_type().is_file()
                && !video_compress::is_hidden(&entry)
                && !entry.file_name().to_string_lossy().starts_with(OUTPUT_PREFIX)
                && has_extension(entry.path(), &self.config.extension)
            {
                files.push(FileTask::new(entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Create the output and skipped directories and the outcome log.
    fn bootstrap(&self) -> Result<()> {
        for dir in [&self.config.output_dir, &self.config.skipped_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        if let Err(error) = ensure_parent_dir(self.outcome_log.path()).and_then(|()| self.outcome_log.initialize()) {
            print_error!("Failed to create log {}: {error}", self.outcome_log.path().display());
        }
        Ok(())
    }

    fn print_commands(&self, files: &[FileTask], profile: &EncoderProfile) {
        let limit = self.config.count.unwrap_or(usize::MAX);
        let job = CompressionJob::new(&self.config, profile, &self.abort, ProgressBar::hidden());
        for task in files.iter().filter(|task| !job.skipped_path(task).exists()).take(limit) {
            let cmd = job.build_command(task);
            let args: Vec<String> = std::iter::once(cmd.get_program())
                .chain(cmd.get_args())
                .map(|arg| quote_arg(&arg.to_string_lossy()))
                .collect();
            println!("{}", args.join(" "));
        }
    }

    fn report(
        &self,
        task: &FileTask,
        job: &CompressionJob,
        result: &JobResult,
        file_index: &str,
        duration: std::time::Duration,
    ) {
        match &result.outcome {
            Outcome::Compressed => {
                let stats = CompressionStats::new(result.original_size, result.compressed_size);
                println!(
                    "{}",
                    format!(
                        "✓ Compressed in {}: {stats}",
                        video_compress::format_duration(duration)
                    )
                    .green()
                );
                self.log_success(&job.output_path(task), file_index, duration, &stats);
            }
            Outcome::SkippedIneffective => {
                println!(
                    "{}",
                    format!(
                        "⊘ Skipped: output not smaller than original ({})",
                        video_compress::format_size(result.original_size)
                    )
                    .yellow()
                );
                self.log_skip(&task.source_path, file_index, "output not smaller than original");
            }
            Outcome::SkippedAlreadyProcessed => {
                println!("{}", "⊘ Skipped: already processed".yellow());
                self.log_skip(&task.source_path, file_index, "already processed");
            }
            Outcome::Failed(error) => {
                print_error!("{}: {error}", task.display_name);
                self.log_failure(&task.source_path, file_index, &error.to_string());
            }
        }
    }

    fn file_progress_bar() -> ProgressBar {
        #[cfg(test)]
        let progress_bar = ProgressBar::hidden();
        #[cfg(not(test))]
        let progress_bar = {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_BAR_TEMPLATE) {
                pb.set_style(style.progress_chars(PROGRESS_BAR_CHARS));
            }
            pb
        };
        progress_bar
    }

    fn log_init(&self, profile: &EncoderProfile) {
        if let Some(logger) = &self.logger {
            logger.borrow_mut().log_init(&self.config, profile);
        }
    }

    fn log_start(&self, file_path: &Path, file_index: &str) {
        if let Some(logger) = &self.logger {
            logger.borrow_mut().log_start(file_path, file_index);
        }
    }

    fn log_success(&self, file_path: &Path, file_index: &str, duration: std::time::Duration, stats: &CompressionStats) {
        if let Some(logger) = &self.logger {
            logger.borrow_mut().log_success(file_path, file_index, duration, stats);
        }
    }

    fn log_skip(&self, file_path: &Path, file_index: &str, reason: &str) {
        if let Some(logger) = &self.logger {
            logger.borrow_mut().log_skip(file_path, file_index, reason);
        }
    }

    fn log_failure(&self, file_path: &Path, file_index: &str, error: &str) {
        if let Some(logger) = &self.logger {
            logger.borrow_mut().log_failure(file_path, file_index, error);
        }
    }

    fn log_stats(&self, summary: &BatchSummary) {
        if let Some(logger) = &self.logger {
            logger.borrow_mut().log_stats(summary);
        }
    }
}

/// Quote a command argument for printing if it contains whitespace or quotes.
fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}
