//! Shared helpers for tests that run a stand-in ffmpeg.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::sync::LazyLock;

#[cfg(unix)]
use tempfile::TempDir;

/// Shell script mimicking the parts of ffmpeg the compressor relies on.
///
/// Reads the input path after `-i` and the output path after `+faststart`.
/// The output size is read from `<input>.size` or defaults to half of the input.
/// `<input>.fail` makes it exit with an error and `<input>.hang` makes it never finish,
/// both after writing a partial output file.
#[cfg(unix)]
const FAKE_FFMPEG_SCRIPT: &str = r#"#!/bin/sh
input=""
output=""
previous=""
for arg in "$@"; do
    case "$previous" in
        -i) input="$arg" ;;
        +faststart) output="$arg" ;;
    esac
    previous="$arg"
done
if [ -z "$input" ] || [ -z "$output" ]; then
    echo "missing input or output" >&2
    exit 2
fi
echo "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from '$input':" >&2
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
if [ -f "$input.hang" ]; then
    dd if=/dev/zero of="$output" bs=1 count=0 seek=500 2>/dev/null
    exec sleep 30
fi
if [ -f "$input.fail" ]; then
    dd if=/dev/zero of="$output" bs=1 count=0 seek=500 2>/dev/null
    echo "$input: Invalid data found when processing input" >&2
    exit 1
fi
printf 'frame=  100 fps=50 q=23.0 size=     256kB time=00:00:04.00 bitrate=524.3kbits/s speed=2x\r' >&2
if [ -f "$input.size" ]; then
    size=$(cat "$input.size")
else
    size=$(( $(wc -c < "$input") / 2 ))
fi
dd if=/dev/zero of="$output" bs=1 count=0 seek="$size" 2>/dev/null || exit 1
printf 'frame=  250 fps=50 q=23.0 size=     512kB time=00:00:10.00 bitrate=419.4kbits/s speed=2x\n' >&2
exit 0
"#;

#[cfg(unix)]
static FAKE_FFMPEG_DIR: LazyLock<TempDir> =
    LazyLock::new(|| tempfile::tempdir().expect("Failed to create temp dir for fake ffmpeg"));

/// Executable stand-in for ffmpeg, written once per test process.
#[cfg(unix)]
pub static FAKE_FFMPEG: LazyLock<PathBuf> = LazyLock::new(|| {
    use std::os::unix::fs::PermissionsExt;

    let path = FAKE_FFMPEG_DIR.path().join("ffmpeg");
    fs::write(&path, FAKE_FFMPEG_SCRIPT).expect("Failed to write fake ffmpeg");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("Failed to make fake ffmpeg executable");
    path
});

/// Create a sparse file with the given size.
pub fn create_video(dir: &Path, name: &str, size: u64) -> PathBuf {
    let path = dir.join(name);
    File::create(&path)
        .and_then(|file| file.set_len(size))
        .expect("Failed to create test video");
    path
}

/// Size of the output the fake ffmpeg writes for this input.
pub fn set_output_size(video: &Path, size: u64) {
    fs::write(sidecar(video, "size"), size.to_string()).expect("Failed to write size file");
}

/// Make the fake ffmpeg fail for this input.
pub fn set_failure(video: &Path) {
    fs::write(sidecar(video, "fail"), "").expect("Failed to write fail file");
}

/// Make the fake ffmpeg hang for this input.
pub fn set_hang(video: &Path) {
    fs::write(sidecar(video, "hang"), "").expect("Failed to write hang file");
}

/// Poll until the path exists, giving up after a few seconds.
pub fn wait_for_file(path: &Path) -> bool {
    for _ in 0..200 {
        if path.exists() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(25));
    }
    false
}

fn sidecar(video: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(video.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
