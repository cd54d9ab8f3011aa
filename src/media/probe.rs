use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::ProbeError;

/// Determines the total duration of a local audio file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds. Must not modify the file.
    async fn probe(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Duration probe backed by `ffprobe`
pub struct FfprobeProbe {
    ffprobe_path: String,
}

impl FfprobeProbe {
    pub fn new() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: path.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurationProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<f64, ProbeError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ProbeError::NotFound(path.to_path_buf()));
        }

        tracing::debug!("Probing duration of {}", path.display());

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v", "error",
                "-show_entries", "format=duration",
                "-of", "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ProbeError::ToolUnavailable {
                        tool: self.ffprobe_path.clone(),
                        source,
                    }
                } else {
                    ProbeError::Failed(source.to_string())
                }
            })?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(format!("{}: {}", output.status, error.trim())));
        }

        let duration = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!("Duration of {}: {:.2}s", path.display(), duration);
        Ok(duration)
    }
}

/// Parse the bare number ffprobe prints for `format=duration`
pub fn parse_probe_output(stdout: &str) -> Result<f64, ProbeError> {
    let trimmed = stdout.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| ProbeError::Unparseable(trimmed.to_string()))?;

    if !value.is_finite() {
        return Err(ProbeError::Unparseable(trimmed.to_string()));
    }
    if value < 0.0 {
        return Err(ProbeError::InvalidDuration(value));
    }

    Ok(value)
}
