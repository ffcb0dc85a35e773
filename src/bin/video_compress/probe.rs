//! Hardware encoder detection using `ffmpeg -encoders`.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use video_compress::print_warning;

/// Encoder family, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// NVIDIA NVENC
    Nvidia,
    /// AMD AMF
    Amd,
    /// Intel Quick Sync
    Intel,
    /// Software x264
    Cpu,
}

/// Encoder settings used for every file in a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderProfile {
    pub(crate) kind: EncoderKind,
    pub(crate) encoder: &'static str,
    pub(crate) preset: &'static str,
    pub(crate) quality_flag: &'static str,
    pub(crate) extra_flags: &'static [&'static str],
}

/// Reasons the encoder listing could not be obtained.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to run {program} -encoders: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} -encoders exited with status {code}")]
    Status { program: String, code: i32 },
}

/// Hardware encoder identifiers searched for in the encoder listing.
const HARDWARE_ENCODERS: [(EncoderKind, &str); 3] = [
    (EncoderKind::Nvidia, "nvenc"),
    (EncoderKind::Amd, "amf"),
    (EncoderKind::Intel, "qsv"),
];

impl EncoderKind {
    /// Fixed encoder settings for this encoder family.
    #[must_use]
    pub const fn profile(self) -> EncoderProfile {
        match self {
            Self::Nvidia => EncoderProfile {
                kind: self,
                encoder: "h264_nvenc",
                preset: "p6",
                // Constant QP mode reads the quantizer from -qp only
                quality_flag: "-qp",
                extra_flags: &["-rc:v", "constqp"],
            },
            Self::Amd => EncoderProfile {
                kind: self,
                encoder: "h264_amf",
                preset: "speed",
                quality_flag: "-qp_i",
                extra_flags: &[],
            },
            Self::Intel => EncoderProfile {
                kind: self,
                encoder: "h264_qsv",
                preset: "faster",
                quality_flag: "-global_quality",
                extra_flags: &[],
            },
            Self::Cpu => EncoderProfile {
                kind: self,
                encoder: "libx264",
                preset: "fast",
                quality_flag: "-crf",
                extra_flags: &[],
            },
        }
    }
}

impl EncoderProfile {
    /// Value for the ffmpeg `-hwaccel` option.
    #[must_use]
    pub const fn hwaccel(&self) -> &'static str {
        match self.kind {
            EncoderKind::Cpu => "none",
            _ => "auto",
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nvidia => "NVIDIA",
            Self::Amd => "AMD",
            Self::Intel => "INTEL",
            Self::Cpu => "CPU",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for EncoderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, preset {})", self.kind, self.encoder, self.preset)
    }
}

/// Detect the best available encoder.
///
/// Never fails: if the listing cannot be obtained,
/// the software encoder profile is returned.
pub fn detect(ffmpeg: &Path) -> EncoderProfile {
    match list_encoders(ffmpeg) {
        Ok(listing) => select_profile(&listing),
        Err(error) => {
            print_warning!("Encoder detection failed, using software encoder: {error}");
            EncoderKind::Cpu.profile()
        }
    }
}

/// Pick the first hardware encoder family found in the listing text.
#[must_use]
pub fn select_profile(listing: &str) -> EncoderProfile {
    let listing = listing.to_lowercase();
    HARDWARE_ENCODERS
        .iter()
        .find(|(_, identifier)| listing.contains(identifier))
        .map_or(EncoderKind::Cpu, |(kind, _)| *kind)
        .profile()
}

/// Run `ffmpeg -encoders` and return its standard output.
fn list_encoders(ffmpeg: &Path) -> Result<String, ProbeError> {
    let program = video_compress::path_to_string(ffmpeg);
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ProbeError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProbeError::Status {
            program,
            code: output.status.code().unwrap_or(-1),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
