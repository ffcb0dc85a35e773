mod abort;
mod batch;
mod config;
mod job;
mod logger;
mod outcome_log;
mod probe;
mod progress;
mod stats;

#[cfg(test)]
mod test_utils;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::batch::BatchCoordinator;
use crate::config::{Config, VideoCompressConfig};
use crate::probe::EncoderKind;

#[derive(Parser)]
#[command(
    author,
    version,
    name = env!("CARGO_BIN_NAME"),
    about = "Compress video files with ffmpeg, using a hardware encoder when available"
)]
pub(crate) struct VideoCompressArgs {
    /// Optional input directory
    #[arg(value_hint = clap::ValueHint::DirPath)]
    path: Option<PathBuf>,

    /// Quality level, lower is better quality
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=51))]
    quality: Option<u8>,

    /// Use the given encoder instead of detecting one
    #[arg(short, long, value_enum)]
    encoder: Option<EncoderKind>,

    /// Input file extension
    #[arg(short = 't', long)]
    extension: Option<String>,

    /// Output directory for compressed files
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Directory for skipped and failed originals
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    skipped: Option<PathBuf>,

    /// Outcome log CSV file
    #[arg(short = 'L', long, value_hint = clap::ValueHint::FilePath)]
    log: Option<PathBuf>,

    /// Limit the number of files to compress
    #[arg(short, long)]
    count: Option<usize>,

    /// Path to the ffmpeg executable
    #[arg(short, long, value_hint = clap::ValueHint::ExecutablePath)]
    ffmpeg: Option<PathBuf>,

    /// Print commands without running them
    #[arg(short, long)]
    print: bool,

    /// Generate shell completion
    #[arg(short = 'l', long, name = "SHELL")]
    completion: Option<Shell>,

    /// Print verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = VideoCompressArgs::parse();
    if let Some(ref shell) = args.completion {
        video_compress::generate_shell_completion(*shell, VideoCompressArgs::command(), true, env!("CARGO_BIN_NAME"))
    } else {
        let user_config = VideoCompressConfig::get_user_config();
        let config = Config::try_from_args(args, user_config)?;
        BatchCoordinator::new(config).run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        VideoCompressArgs::command().debug_assert();
    }

    #[test]
    fn parses_encoder_names() {
        let args = VideoCompressArgs::parse_from(["vcompress", "-e", "cpu", "-c", "3"]);
        assert_eq!(args.encoder, Some(EncoderKind::Cpu));
        assert_eq!(args.count, Some(3));
        assert!(args.path.is_none());

        assert!(VideoCompressArgs::try_parse_from(["vcompress", "-e", "voodoo"]).is_err());
    }
}
