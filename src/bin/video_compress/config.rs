use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use video_compress::print_error;

use crate::VideoCompressArgs;
use crate::probe::EncoderKind;

/// Default encoder quality level (CRF / CQ / QP depending on the encoder).
pub const DEFAULT_QUALITY: u8 = 23;

/// Highest quality level accepted by the supported encoders.
pub const MAX_QUALITY: u8 = 51;

/// Default input file extension.
const DEFAULT_EXTENSION: &str = "mp4";

/// Default directory name for compressed files inside the input directory.
const OUTPUT_DIR_NAME: &str = "compressed";

/// Default directory name for skipped and failed originals inside the input directory.
const SKIPPED_DIR_NAME: &str = "skipped";

/// Default outcome log file name inside the input directory.
const LOG_FILE_NAME: &str = "processing_log.csv";

/// Default ffmpeg executable, resolved from `PATH`.
const DEFAULT_FFMPEG: &str = "ffmpeg";

/// User configuration from the config file.
#[derive(Debug, Default, Deserialize)]
pub struct VideoCompressConfig {
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    encoder: Option<EncoderKind>,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    ffmpeg_path: Option<PathBuf>,
    #[serde(default)]
    log_file: Option<PathBuf>,
    #[serde(default)]
    output_dir: Option<PathBuf>,
    #[serde(default)]
    quality: Option<u8>,
    #[serde(default)]
    skipped_dir: Option<PathBuf>,
    #[serde(default)]
    verbose: bool,
}

/// Final config combined from CLI arguments and user config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) count: Option<usize>,
    pub(crate) dryrun: bool,
    pub(crate) encoder: Option<EncoderKind>,
    pub(crate) extension: String,
    pub(crate) ffmpeg: PathBuf,
    pub(crate) log_file: PathBuf,
    pub(crate) output_dir: PathBuf,
    pub(crate) path: PathBuf,
    pub(crate) quality: u8,
    pub(crate) skipped_dir: PathBuf,
    pub(crate) verbose: bool,
}

/// Wrapper needed for parsing the config file section.
#[derive(Debug, Default, Deserialize)]
struct UserConfig {
    #[serde(default)]
    vcompress: VideoCompressConfig,
}

impl VideoCompressConfig {
    /// Try to read user config from the file if it exists.
    /// Otherwise, fall back to default config.
    pub fn get_user_config() -> Self {
        video_compress::config::CONFIG_PATH
            .as_deref()
            .filter(|path| path.exists())
            .and_then(|path| {
                fs::read_to_string(path)
                    .map_err(|e| {
                        print_error!("Error reading config file {}: {e}", path.display());
                    })
                    .ok()
            })
            .and_then(|config_string| {
                Self::from_toml_str(&config_string)
                    .map_err(|e| {
                        print_error!("Error reading config file: {e}");
                    })
                    .ok()
            })
            .unwrap_or_default()
    }

    /// Parse the `[vcompress]` section from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str::<UserConfig>(toml_str)
            .map(|config| config.vcompress)
            .context("Failed to parse config TOML")
    }
}

impl Config {
    /// Create config from given command line args and user config file.
    pub(crate) fn try_from_args(args: VideoCompressArgs, user_config: VideoCompressConfig) -> Result<Self> {
        let path = video_compress::resolve_input_path(args.path.as_deref())?;
        if !path.is_dir() {
            anyhow::bail!("Input path must be a directory: '{}'", path.display());
        }

        // CLI args take priority over user config
        let quality = args.quality.or(user_config.quality).unwrap_or(DEFAULT_QUALITY);
        if quality > MAX_QUALITY {
            anyhow::bail!("Quality level must be between 0 and {MAX_QUALITY}, got {quality}");
        }

        let extension = args
            .extension
            .or(user_config.extension)
            .map_or_else(|| DEFAULT_EXTENSION.to_string(), |ext| normalize_extension(&ext));
        if extension.is_empty() {
            anyhow::bail!("Input file extension can not be empty");
        }

        Ok(Self {
            count: args.count.or(user_config.count),
            dryrun: args.print,
            encoder: args.encoder.or(user_config.encoder),
            extension,
            ffmpeg: args
                .ffmpeg
                .or(user_config.ffmpeg_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
            log_file: args
                .log
                .or(user_config.log_file)
                .unwrap_or_else(|| path.join(LOG_FILE_NAME)),
            output_dir: args
                .output
                .or(user_config.output_dir)
                .unwrap_or_else(|| path.join(OUTPUT_DIR_NAME)),
            skipped_dir: args
                .skipped
                .or(user_config.skipped_dir)
                .unwrap_or_else(|| path.join(SKIPPED_DIR_NAME)),
            quality,
            verbose: args.verbose || user_config.verbose,
            path,
        })
    }

    /// Default layout for the given input directory.
    #[cfg(test)]
    pub(crate) fn for_directory(path: &Path) -> Self {
        Self {
            count: None,
            dryrun: false,
            encoder: Some(EncoderKind::Cpu),
            extension: DEFAULT_EXTENSION.to_string(),
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG),
            log_file: path.join(LOG_FILE_NAME),
            output_dir: path.join(OUTPUT_DIR_NAME),
            path: path.to_path_buf(),
            quality: DEFAULT_QUALITY,
            skipped_dir: path.join(SKIPPED_DIR_NAME),
            verbose: false,
        }
    }
}

/// Lowercase extension without a leading dot.
fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

/// Check if the given path has the configured extension.
pub fn has_extension(path: &Path, extension: &str) -> bool {
    video_compress::path_to_file_extension_string(path) == extension
}
