//! Parsing of the ffmpeg diagnostic stream.
//!
//! ffmpeg reports the input duration once near the start of its stderr output,
//! followed by repeated status lines containing the encoded position:
//! ```text
//!   Duration: 00:01:30.50, start: 0.000000, bitrate: 5120 kb/s
//! frame=  512 fps= 60 q=23.0 size=    1024kB time=00:00:08.53 bitrate= 983.4kbits/s speed=2.1x
//! ```
//! Status lines are terminated with a carriage return instead of a newline,
//! so the stream is split on both.

use std::io::{self, BufRead};

use video_compress::print_warning;

const DURATION_MARKER: &str = "Duration: ";
const TIME_MARKER: &str = "time=";

/// Result of parsing one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedLine {
    /// Total input duration in seconds.
    DurationFound(f64),
    /// Encoded position in seconds.
    ProgressUpdate(f64),
    Ignored,
}

/// Encoding progress of the current file.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub(crate) elapsed_seconds: f64,
    pub(crate) total_duration_seconds: Option<f64>,
}

/// Splits a byte stream into lines on `\n` or `\r`, skipping empty lines.
pub struct DiagnosticLines<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl ProgressSample {
    /// Apply a parsed line. Returns true if the sample changed.
    ///
    /// Only the first duration marker is used,
    /// later ones belong to other streams.
    pub fn apply(&mut self, parsed: ParsedLine) -> bool {
        match parsed {
            ParsedLine::DurationFound(seconds) if self.total_duration_seconds.is_none() => {
                self.total_duration_seconds = Some(seconds);
                true
            }
            ParsedLine::ProgressUpdate(seconds) => {
                self.elapsed_seconds = seconds;
                true
            }
            _ => false,
        }
    }

    /// Completed fraction in range 0..=1 if the duration is known.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        self.total_duration_seconds
            .filter(|total| *total > 0.0)
            .map(|total| (self.elapsed_seconds / total).clamp(0.0, 1.0))
    }
}

impl<R: BufRead> DiagnosticLines<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        line
    }
}

impl<R: BufRead> Iterator for DiagnosticLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Some(Err(error)),
            };

            if available.is_empty() {
                return if self.buffer.is_empty() {
                    None
                } else {
                    Some(Ok(self.take_line()))
                };
            }

            if let Some(end) = available.iter().position(|byte| matches!(byte, b'\n' | b'\r')) {
                self.buffer.extend_from_slice(&available[..end]);
                self.reader.consume(end + 1);
                if self.buffer.is_empty() {
                    continue;
                }
                return Some(Ok(self.take_line()));
            }

            let length = available.len();
            self.buffer.extend_from_slice(available);
            self.reader.consume(length);
        }
    }
}

/// Parse one line of ffmpeg diagnostic output.
#[must_use]
pub fn parse_line(line: &str) -> ParsedLine {
    if let Some((_, rest)) = line.split_once(DURATION_MARKER) {
        let text = rest.split(',').next().unwrap_or_default().trim();
        return time_value(text).map_or(ParsedLine::Ignored, ParsedLine::DurationFound);
    }
    if let Some((_, rest)) = line.split_once(TIME_MARKER) {
        let text = rest.split_whitespace().next().unwrap_or_default();
        return time_value(text).map_or(ParsedLine::Ignored, ParsedLine::ProgressUpdate);
    }
    ParsedLine::Ignored
}

/// Parse an ffmpeg timestamp (`HH:MM:SS.ff` or `MM:SS.ff`) into seconds.
///
/// Malformed input prints a warning and returns zero.
#[must_use]
pub fn parse_time(text: &str) -> f64 {
    try_parse_time(text).unwrap_or_else(|| {
        print_warning!("Failed to parse time: '{text}'");
        0.0
    })
}

fn time_value(text: &str) -> Option<f64> {
    if text.is_empty() || text.eq_ignore_ascii_case("N/A") {
        None
    } else {
        Some(parse_time(text))
    }
}

fn try_parse_time(text: &str) -> Option<f64> {
    let text = text.trim();
    // ffmpeg prints slightly negative positions at the very start of some streams
    let (negative, text) = text.strip_prefix('-').map_or((false, text), |rest| (true, rest));
    let parts: Vec<&str> = text.split([':', '.']).collect();
    let (hours, minutes, seconds, fraction) = match parts.as_slice() {
        [minutes, seconds, fraction] => ("0", *minutes, *seconds, *fraction),
        [hours, minutes, seconds, fraction, ..] => (*hours, *minutes, *seconds, *fraction),
        _ => return None,
    };

    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if !is_digits(seconds) || !is_digits(fraction) {
        return None;
    }
    let seconds: f64 = format!("{seconds}.{fraction}").parse().ok()?;

    if negative {
        return Some(0.0);
    }
    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + seconds)
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit())
}
