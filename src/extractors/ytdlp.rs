use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{is_web_url, EpisodeInfo, FetchedAudio, MediaExtractor};
use crate::utils::{sanitize_filename, validate_and_normalize_url};
use crate::{Result, TranscriptorError};

pub const PLATFORM_NAME: &str = "yt-dlp (YouTube, podcasts and 1000+ sites)";

/// Title used when yt-dlp does not report one
const FALLBACK_TITLE: &str = "video";

/// Extractor for anything yt-dlp can download
pub struct YtDlpExtractor {
    yt_dlp_path: String,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: path.into(),
        }
    }

    /// Get media information using yt-dlp
    async fn dump_json(&self, url: &str) -> Result<Value> {
        tracing::debug!("Extracting media info for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptorError::AudioExtractionFailed(format!(
                "yt-dlp could not read {}: {}",
                url,
                error.trim()
            ))
            .into());
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .context("yt-dlp printed invalid JSON")?;

        Ok(info)
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build episode metadata from yt-dlp's `--dump-json` output
pub fn from_ytdlp_json(url: &str, info: &Value) -> EpisodeInfo {
    let non_empty = |key: &str| {
        info[key]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let date_posted = ["timestamp", "release_timestamp"]
        .iter()
        .filter_map(|key| info[*key].as_f64())
        .find_map(|ts| DateTime::from_timestamp(ts as i64, 0))
        .map(|dt| dt.date_naive())
        .or_else(|| {
            info["upload_date"]
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
        });

    EpisodeInfo {
        title: non_empty("title").unwrap_or_else(|| FALLBACK_TITLE.to_string()),
        show: non_empty("channel").or_else(|| non_empty("uploader")),
        original_url: url.to_string(),
        date_posted,
        duration_secs: info["duration"].as_f64().filter(|d| d.is_finite() && *d > 0.0),
        local_path: None,
    }
}

/// yt-dlp arguments for an mp3 audio download to `template`
pub fn download_args(url: &str, template: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--format",
        "bestaudio/best",
        "--extract-audio",
        "--audio-format",
        "mp3",
        "--audio-quality",
        "192K",
        "--restrict-filenames",
        "--no-playlist",
        "--newline",
        "-o",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(template.as_os_str().to_owned());
    args.push(OsString::from(url));
    args
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract_info(&self, url: &str) -> Result<EpisodeInfo> {
        let url = validate_and_normalize_url(url)?;
        let info = self.dump_json(&url).await?;
        Ok(from_ytdlp_json(&url, &info))
    }

    async fn fetch_audio(&self, info: &EpisodeInfo, dir: &Path) -> Result<FetchedAudio> {
        let stem = Some(sanitize_filename(&info.title))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        let template = dir.join(format!("{}.%(ext)s", stem));
        let expected = dir.join(format!("{}.mp3", stem));

        tracing::info!("Downloading audio for {} to {}", info.original_url, expected.display());

        let output = Command::new(&self.yt_dlp_path)
            .args(download_args(&info.original_url, &template))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptorError::AudioExtractionFailed(format!(
                "yt-dlp download failed: {}",
                error.trim()
            ))
            .into());
        }

        if !tokio::fs::try_exists(&expected).await.unwrap_or(false) {
            return Err(TranscriptorError::AudioExtractionFailed(format!(
                "yt-dlp finished but {} was not created",
                expected.display()
            ))
            .into());
        }

        Ok(FetchedAudio {
            path: expected,
            owned: true,
        })
    }

    fn supports(&self, input: &str) -> bool {
        is_web_url(input)
    }

    fn platform_name(&self) -> &'static str {
        PLATFORM_NAME
    }
}
