use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use indicatif::ProgressBar;
use thiserror::Error;

use video_compress::print_error;

use crate::abort::AbortSignal;
use crate::config::Config;
use crate::probe::EncoderProfile;
use crate::progress::{DiagnosticLines, ProgressSample, parse_line};

/// Prefix added to the file name of compressed outputs.
pub const OUTPUT_PREFIX: &str = "compressed_";

/// How often the abort signal is checked while waiting for encoder output.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A video file to compress.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileTask {
    pub(crate) display_name: String,
    pub(crate) source_path: PathBuf,
}

/// Per-file errors. All of them end up as a failed outcome.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("File not found: {}", .0.display())]
    FileMissing(PathBuf),
    #[error("ffmpeg failed with exit code {code}")]
    EncodeFailed { code: i32 },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("Interrupted by user")]
    Interrupted,
}

/// Terminal state of a single file.
#[derive(Debug)]
pub enum Outcome {
    Compressed,
    /// Output was not smaller than the original
    SkippedIneffective,
    /// Original already in the skipped directory
    SkippedAlreadyProcessed,
    Failed(JobError),
}

/// Result of processing a single file.
#[derive(Debug)]
pub struct JobResult {
    pub(crate) original_size: u64,
    /// Only meaningful for [`Outcome::Compressed`]
    pub(crate) compressed_size: u64,
    pub(crate) outcome: Outcome,
}

/// Compresses one file with ffmpeg and moves it to its final state.
pub struct CompressionJob<'a> {
    config: &'a Config,
    profile: &'a EncoderProfile,
    abort: &'a AbortSignal,
    progress_bar: ProgressBar,
}

/// Attach a context message to I/O errors.
trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T, JobError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T, JobError> {
        self.map_err(|source| JobError::Io {
            context: context(),
            source,
        })
    }
}

impl FileTask {
    pub fn new(path: &Path) -> Self {
        Self {
            display_name: video_compress::path_to_filename_string(path),
            source_path: path.to_path_buf(),
        }
    }
}

impl JobResult {
    const fn compressed(original_size: u64, compressed_size: u64) -> Self {
        Self {
            original_size,
            compressed_size,
            outcome: Outcome::Compressed,
        }
    }

    /// Ineffective compression reports the original size for both sizes.
    const fn ineffective(original_size: u64) -> Self {
        Self {
            original_size,
            compressed_size: original_size,
            outcome: Outcome::SkippedIneffective,
        }
    }

    const fn already_processed() -> Self {
        Self {
            original_size: 0,
            compressed_size: 0,
            outcome: Outcome::SkippedAlreadyProcessed,
        }
    }

    const fn failed(original_size: u64, error: JobError) -> Self {
        Self {
            original_size,
            compressed_size: 0,
            outcome: Outcome::Failed(error),
        }
    }

    pub const fn is_interrupted(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(JobError::Interrupted))
    }
}

impl<'a> CompressionJob<'a> {
    pub const fn new(
        config: &'a Config,
        profile: &'a EncoderProfile,
        abort: &'a AbortSignal,
        progress_bar: ProgressBar,
    ) -> Self {
        Self {
            config,
            profile,
            abort,
            progress_bar,
        }
    }

    /// Compress the file and return its terminal outcome.
    ///
    /// On failure the partial output is removed and the original is moved to the skipped directory,
    /// so it is not retried on the next run. An interrupted file is left in place.
    pub fn run(&self, task: &FileTask) -> JobResult {
        let destination = self.output_path(task);
        let original_size = match self.prepare(task) {
            Ok(Some(size)) => size,
            Ok(None) => return JobResult::already_processed(),
            Err(error) => return self.fail(task, &destination, 0, error),
        };

        match self.encode(task, &destination, original_size) {
            Ok(result) => result,
            Err(error) => self.fail(task, &destination, original_size, error),
        }
    }

    /// Output path for the compressed file.
    pub fn output_path(&self, task: &FileTask) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{OUTPUT_PREFIX}{}", task.display_name))
    }

    /// Path of the original once moved to the skipped directory.
    pub fn skipped_path(&self, task: &FileTask) -> PathBuf {
        self.config.skipped_dir.join(&task.display_name)
    }

    /// Build the ffmpeg command for compressing the given file.
    pub fn build_command(&self, task: &FileTask) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg);
        cmd.args(["-hide_banner", "-y", "-hwaccel", self.profile.hwaccel()])
            .arg("-i")
            .arg(&task.source_path)
            .args(["-c:v", self.profile.encoder])
            .args(["-preset", self.profile.preset])
            .arg(self.profile.quality_flag)
            .arg(self.config.quality.to_string())
            // Options after the output path are ignored by ffmpeg
            .args(self.profile.extra_flags)
            .args(["-c:a", "copy"])
            .args(["-movflags", "+faststart"])
            .arg(self.output_path(task));
        cmd
    }

    /// Check the source and return its size,
    /// or `None` if it was already moved to the skipped directory earlier.
    fn prepare(&self, task: &FileTask) -> Result<Option<u64>, JobError> {
        if !task.source_path.exists() {
            return Err(JobError::FileMissing(task.source_path.clone()));
        }
        if self.skipped_path(task).exists() {
            return Ok(None);
        }
        let metadata = fs::metadata(&task.source_path)
            .io_context(|| format!("Failed to read size of {}", task.source_path.display()))?;
        Ok(Some(metadata.len()))
    }

    fn encode(&self, task: &FileTask, destination: &Path, original_size: u64) -> Result<JobResult, JobError> {
        let mut cmd = self.build_command(task);
        let status = self.run_encoder(&mut cmd)?;
        if !status.success() {
            return Err(JobError::EncodeFailed {
                code: status.code().unwrap_or(-1),
            });
        }

        let compressed_size = fs::metadata(destination)
            .io_context(|| format!("Failed to read size of {}", destination.display()))?
            .len();

        if compressed_size >= original_size {
            fs::remove_file(destination)
                .io_context(|| format!("Failed to remove {}", destination.display()))?;
            self.move_to_skipped(task)?;
            return Ok(JobResult::ineffective(original_size));
        }

        Ok(JobResult::compressed(original_size, compressed_size))
    }

    /// Run ffmpeg while draining its stderr on a separate thread.
    ///
    /// The reader thread is joined before the exit status is returned.
    fn run_encoder(&self, cmd: &mut Command) -> Result<ExitStatus, JobError> {
        isolate_process_group(cmd);
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .io_context(|| format!("Failed to execute {}", self.config.ffmpeg.display()))?;

        let Some(stderr) = child.stderr.take() else {
            kill_and_wait(&mut child);
            return Err(JobError::Io {
                context: "Failed to capture ffmpeg output".to_string(),
                source: io::Error::other("stderr not captured"),
            });
        };

        let (sender, receiver) = mpsc::channel::<String>();
        let reader = thread::spawn(move || {
            for line in DiagnosticLines::new(BufReader::new(stderr)).map_while(Result::ok) {
                if sender.send(line).is_err() {
                    break;
                }
            }
        });

        let mut sample = ProgressSample::default();
        loop {
            if self.abort.should_kill() {
                kill_and_wait(&mut child);
                drop(receiver);
                let _ = reader.join();
                return Err(JobError::Interrupted);
            }
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if sample.apply(parse_line(&line)) {
                        self.show_progress(&sample);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let _ = reader.join();
        child.wait().io_context(|| "Failed to wait for ffmpeg".to_string())
    }

    fn show_progress(&self, sample: &ProgressSample) {
        if let Some(total) = sample.total_duration_seconds {
            self.progress_bar.set_length(total.round() as u64);
        }
        let position = sample
            .fraction()
            .zip(sample.total_duration_seconds)
            .map_or(sample.elapsed_seconds, |(fraction, total)| fraction * total);
        self.progress_bar.set_position(position.round() as u64);
    }

    fn move_to_skipped(&self, task: &FileTask) -> Result<(), JobError> {
        let target = self.skipped_path(task);
        move_file(&task.source_path, &target).io_context(|| {
            format!(
                "Failed to move {} to {}",
                task.source_path.display(),
                target.display()
            )
        })
    }

    fn fail(&self, task: &FileTask, destination: &Path, original_size: u64, error: JobError) -> JobResult {
        if destination.exists()
            && let Err(e) = fs::remove_file(destination)
        {
            print_error!("Failed to remove partial output {}: {e}", destination.display());
        }

        if !matches!(error, JobError::Interrupted)
            && task.source_path.exists()
            && let Err(e) = self.move_to_skipped(task)
        {
            print_error!("{e}");
        }

        JobResult::failed(original_size, error)
    }
}

/// Rename the file, falling back to copy and remove when the target is on another filesystem.
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => copy_and_remove(source, target),
        result => result,
    }
}

fn copy_and_remove(source: &Path, target: &Path) -> io::Result<()> {
    if let Err(error) = fs::copy(source, target) {
        let _ = fs::remove_file(target);
        return Err(error);
    }
    fs::remove_file(source)
}

fn kill_and_wait(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run the command in a new process group to prevent Ctrl+C from propagating to it.
/// This allows the main program to handle the signal and finish the current file gracefully.
fn isolate_process_group(cmd: &mut Command) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
    #[cfg(unix)]
    {
        // Set process group to 0 to prevent SIGINT propagation
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::probe::EncoderKind;

    fn command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|arg| arg.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn builds_command_for_hardware_profile() {
        let config = Config::for_directory(Path::new("/videos"));
        let profile = EncoderKind::Nvidia.profile();
        let abort = AbortSignal::default();
        let job = CompressionJob::new(&config, &profile, &abort, ProgressBar::hidden());
        let task = FileTask::new(Path::new("/videos/holiday.mp4"));

        let cmd = job.build_command(&task);
        assert_eq!(cmd.get_program(), "ffmpeg");
        assert_eq!(
            command_args(&cmd),
            vec![
                "-hide_banner",
                "-y",
                "-hwaccel",
                "auto",
                "-i",
                "/videos/holiday.mp4",
                "-c:v",
                "h264_nvenc",
                "-preset",
                "p6",
                "-qp",
                "23",
                "-rc:v",
                "constqp",
                "-c:a",
                "copy",
                "-movflags",
                "+faststart",
                "/videos/compressed/compressed_holiday.mp4",
            ]
        );
    }

    #[test]
    fn hardware_profile_uses_configured_quality() {
        let mut config = Config::for_directory(Path::new("/videos"));
        config.quality = 35;
        let profile = EncoderKind::Nvidia.profile();
        let abort = AbortSignal::default();
        let job = CompressionJob::new(&config, &profile, &abort, ProgressBar::hidden());

        let args = command_args(&job.build_command(&FileTask::new(Path::new("/videos/a.mp4"))));
        let qp = args.iter().position(|arg| arg == "-qp").unwrap();
        let rate_control = args.iter().position(|arg| arg == "-rc:v").unwrap();
        let output = args.len() - 1;
        assert_eq!(args[qp + 1], "35");
        assert_eq!(args[rate_control + 1], "constqp");
        assert!(rate_control < output);
        assert!(!args.iter().any(|arg| arg == "-cq:v"));
    }

    #[test]
    fn builds_command_for_software_profile() {
        let mut config = Config::for_directory(Path::new("/videos"));
        config.quality = 30;
        let profile = EncoderKind::Cpu.profile();
        let abort = AbortSignal::default();
        let job = CompressionJob::new(&config, &profile, &abort, ProgressBar::hidden());
        let task = FileTask::new(Path::new("/videos/clip.mp4"));

        let args = command_args(&job.build_command(&task));
        assert_eq!(args[2..4], ["-hwaccel", "none"]);
        assert_eq!(args[6..12], ["-c:v", "libx264", "-preset", "fast", "-crf", "30"]);
        assert_eq!(args.last().unwrap(), "/videos/compressed/compressed_clip.mp4");
    }

    #[test]
    fn task_uses_file_name_for_display() {
        let task = FileTask::new(Path::new("/videos/sub/My Clip.mp4"));
        assert_eq!(task.display_name, "My Clip.mp4");
        assert_eq!(task.source_path, PathBuf::from("/videos/sub/My Clip.mp4"));
    }

    #[test]
    fn copy_and_remove_moves_contents() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("clip.mp4");
        let target = target_dir.path().join("clip.mp4");
        fs::write(&source, b"video data").unwrap();

        copy_and_remove(&source, &target).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"video data");
    }

    #[test]
    fn failed_copy_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let target = dir.path().join("missing").join("clip.mp4");
        fs::write(&source, b"video data").unwrap();

        assert!(copy_and_remove(&source, &target).is_err());
        assert!(move_file(&source, &target).is_err());
        assert!(source.exists());
        assert!(!target.exists());
    }

    #[test]
    fn move_file_renames_on_same_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let target = dir.path().join("skipped.mp4");
        fs::write(&source, b"video data").unwrap();

        move_file(&source, &target).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"video data");
    }

    #[test]
    fn job_error_messages() {
        assert_eq!(
            JobError::FileMissing(PathBuf::from("/videos/a.mp4")).to_string(),
            "File not found: /videos/a.mp4"
        );
        assert_eq!(
            JobError::EncodeFailed { code: 1 }.to_string(),
            "ffmpeg failed with exit code 1"
        );
        assert_eq!(JobError::Interrupted.to_string(), "Interrupted by user");
    }

    #[cfg(unix)]
    mod encoding {
        use super::*;

        use tempfile::{TempDir, tempdir};

        use crate::test_utils::{FAKE_FFMPEG, create_video, set_failure, set_hang, set_output_size, wait_for_file};

        struct Fixture {
            dir: TempDir,
            config: Config,
            profile: EncoderProfile,
            abort: AbortSignal,
        }

        impl Fixture {
            fn new() -> Self {
                let dir = tempdir().unwrap();
                let mut config = Config::for_directory(dir.path());
                config.ffmpeg.clone_from(&FAKE_FFMPEG);
                fs::create_dir_all(&config.output_dir).unwrap();
                fs::create_dir_all(&config.skipped_dir).unwrap();
                Self {
                    dir,
                    config,
                    profile: EncoderKind::Cpu.profile(),
                    abort: AbortSignal::default(),
                }
            }

            fn job(&self) -> CompressionJob<'_> {
                CompressionJob::new(&self.config, &self.profile, &self.abort, ProgressBar::hidden())
            }

            fn video(&self, name: &str, size: u64) -> FileTask {
                FileTask::new(&create_video(self.dir.path(), name, size))
            }
        }

        #[test]
        fn compresses_smaller_output() {
            let fixture = Fixture::new();
            let task = fixture.video("a.mp4", 1000);
            set_output_size(&task.source_path, 400);

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::Compressed));
            assert_eq!(result.original_size, 1000);
            assert_eq!(result.compressed_size, 400);
            assert_eq!(fs::metadata(job.output_path(&task)).unwrap().len(), 400);
            assert!(task.source_path.exists());
            assert!(!job.skipped_path(&task).exists());
        }

        #[test]
        fn one_byte_smaller_is_still_compressed() {
            let fixture = Fixture::new();
            let task = fixture.video("a.mp4", 1000);
            set_output_size(&task.source_path, 999);

            let result = fixture.job().run(&task);
            assert!(matches!(result.outcome, Outcome::Compressed));
            assert_eq!(result.compressed_size, 999);
        }

        #[test]
        fn larger_output_is_ineffective() {
            let fixture = Fixture::new();
            let task = fixture.video("b.mp4", 1000);
            set_output_size(&task.source_path, 1100);

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::SkippedIneffective));
            assert_eq!(result.original_size, 1000);
            assert_eq!(result.compressed_size, 1000);
            assert!(!job.output_path(&task).exists());
            assert!(!task.source_path.exists());
            assert_eq!(fs::metadata(job.skipped_path(&task)).unwrap().len(), 1000);
        }

        #[test]
        fn equal_size_output_is_ineffective() {
            let fixture = Fixture::new();
            let task = fixture.video("b.mp4", 1000);
            set_output_size(&task.source_path, 1000);

            let job = fixture.job();
            let result = job.run(&task);
            assert!(matches!(result.outcome, Outcome::SkippedIneffective));
            assert!(!job.output_path(&task).exists());
            assert!(job.skipped_path(&task).exists());
        }

        #[test]
        fn encoder_failure_cleans_up_and_quarantines() {
            let fixture = Fixture::new();
            let task = fixture.video("broken.mp4", 1000);
            set_output_size(&task.source_path, 300);
            set_failure(&task.source_path);

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::Failed(JobError::EncodeFailed { code: 1 })));
            assert_eq!(result.original_size, 1000);
            assert_eq!(result.compressed_size, 0);
            assert!(!job.output_path(&task).exists());
            assert!(!task.source_path.exists());
            assert!(job.skipped_path(&task).exists());
        }

        #[test]
        fn failing_encoder_leaves_partial_output_behind() {
            let fixture = Fixture::new();
            let task = fixture.video("broken.mp4", 1000);
            set_failure(&task.source_path);

            let job = fixture.job();
            let status = job.build_command(&task).stderr(Stdio::null()).status().unwrap();

            assert_eq!(status.code(), Some(1));
            assert_eq!(fs::metadata(job.output_path(&task)).unwrap().len(), 500);
        }

        #[test]
        fn missing_source_fails() {
            let fixture = Fixture::new();
            let task = FileTask::new(&fixture.dir.path().join("gone.mp4"));

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::Failed(JobError::FileMissing(_))));
            assert_eq!(result.original_size, 0);
            assert!(!job.output_path(&task).exists());
            assert!(!job.skipped_path(&task).exists());
        }

        #[test]
        fn already_skipped_file_is_not_encoded() {
            let fixture = Fixture::new();
            let task = fixture.video("done.mp4", 1000);
            create_video(&fixture.config.skipped_dir, "done.mp4", 1000);

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::SkippedAlreadyProcessed));
            assert_eq!(result.original_size, 0);
            assert_eq!(result.compressed_size, 0);
            assert!(!job.output_path(&task).exists());
            assert!(task.source_path.exists());
        }

        #[test]
        fn missing_encoder_quarantines_source() {
            let mut fixture = Fixture::new();
            fixture.config.ffmpeg = fixture.dir.path().join("no-such-ffmpeg");
            let task = fixture.video("a.mp4", 1000);

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::Failed(JobError::Io { .. })));
            assert!(!task.source_path.exists());
            assert!(job.skipped_path(&task).exists());
        }

        #[test]
        fn missing_output_directory_is_an_io_failure() {
            let fixture = Fixture::new();
            fs::remove_dir(&fixture.config.output_dir).unwrap();
            let task = fixture.video("a.mp4", 1000);
            set_output_size(&task.source_path, 400);

            let job = fixture.job();
            let result = job.run(&task);

            assert!(matches!(result.outcome, Outcome::Failed(_)));
            assert!(!result.is_interrupted());
            assert!(job.skipped_path(&task).exists());
        }

        #[test]
        fn interrupted_job_keeps_source_in_place() {
            let fixture = Fixture::new();
            let task = fixture.video("long.mp4", 1000);
            set_hang(&task.source_path);

            let job = fixture.job();
            let output = job.output_path(&task);
            let (result, partial_output_written) = thread::scope(|scope| {
                let interrupter = scope.spawn(|| {
                    let written = wait_for_file(&output);
                    fixture.abort.request();
                    fixture.abort.request();
                    written
                });
                let result = job.run(&task);
                (result, interrupter.join().unwrap())
            });

            assert!(partial_output_written);
            assert!(result.is_interrupted());
            assert!(!job.output_path(&task).exists());
            assert!(task.source_path.exists());
            assert!(!job.skipped_path(&task).exists());
        }
    }
}
