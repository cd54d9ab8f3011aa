use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::CutError;

/// Extracts a time range of a source file into a new file
#[async_trait]
pub trait SegmentCutter: Send + Sync {
    /// Write `[offset, offset + length)` of `source` to `output`.
    ///
    /// A range running past the end of the source is truncated, not rejected.
    async fn cut(&self, source: &Path, offset: f64, length: f64, output: &Path) -> Result<(), CutError>;
}

/// Segment cutter that stream-copies audio with `ffmpeg` (no re-encoding)
pub struct FfmpegCutter {
    ffmpeg_path: String,
}

impl FfmpegCutter {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: path.into(),
        }
    }
}

impl Default for FfmpegCutter {
    fn default() -> Self {
        Self::new()
    }
}

/// ffmpeg arguments for a stream-copy cut.
///
/// `-ss` goes after `-i` so the offset is measured against the decoded timeline.
pub fn cut_args(source: &Path, offset: f64, length: f64, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(source.as_os_str().to_owned());
    args.extend(
        [
            "-ss".to_string(),
            format!("{:.3}", offset),
            "-t".to_string(),
            format!("{:.3}", length),
            "-vn".to_string(),
            "-acodec".to_string(),
            "copy".to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl SegmentCutter for FfmpegCutter {
    async fn cut(&self, source: &Path, offset: f64, length: f64, output: &Path) -> Result<(), CutError> {
        if !(offset.is_finite() && offset >= 0.0 && length.is_finite() && length > 0.0) {
            return Err(CutError::InvalidRange { offset, length });
        }

        tracing::debug!(
            "Cutting {} [{:.1}s +{:.1}s] -> {}",
            source.display(),
            offset,
            length,
            output.display()
        );

        let result = Command::new(&self.ffmpeg_path)
            .args(cut_args(source, offset, length, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CutError::ToolUnavailable {
                tool: self.ffmpeg_path.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(CutError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(CutError::NoOutput(output.to_path_buf()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_args_stream_copy() {
        let args = cut_args(Path::new("in.mp3"), 1800.0, 480.5, Path::new("out.mp3"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(
            args,
            [
                "-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i", "in.mp3",
                "-ss", "1800.000", "-t", "480.500", "-vn", "-acodec", "copy", "out.mp3",
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_range() {
        let cutter = FfmpegCutter::new();
        let out = Path::new("out.mp3");

        for (offset, length) in [(-1.0, 10.0), (0.0, 0.0), (0.0, -5.0), (f64::NAN, 1.0)] {
            let err = cutter.cut(Path::new("in.mp3"), offset, length, out).await.unwrap_err();
            assert!(matches!(err, CutError::InvalidRange { .. }));
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cutter = FfmpegCutter::with_binary("ffmpeg-binary-that-does-not-exist");
        let err = cutter
            .cut(Path::new("in.mp3"), 0.0, 1.0, &dir.path().join("out.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, CutError::ToolUnavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_exit_without_file_is_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp3");
        // `true` exits 0 and writes nothing
        let cutter = FfmpegCutter::with_binary("true");

        let err = cutter.cut(Path::new("in.mp3"), 0.0, 1.0, &output).await.unwrap_err();

        assert!(matches!(err, CutError::NoOutput(ref path) if path == &output));
    }
}
