use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::extractors::EpisodeInfo;
use crate::transcribe::{TranscriptChunk, TranscriptionResult};

/// Descriptive header stored next to the transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_posted: Option<NaiveDate>,
    pub date_transcribed: NaiveDate,
}

impl EpisodeMetadata {
    pub fn from_info(info: &EpisodeInfo, date_transcribed: NaiveDate) -> Self {
        Self {
            title: info.title.clone(),
            show: info.show.clone(),
            url: info.original_url.clone(),
            date_posted: info.date_posted,
            date_transcribed,
        }
    }

    /// Human-readable header for the text transcript
    pub fn header(&self) -> String {
        let mut lines = vec![format!("Title: {}", self.title)];
        if let Some(show) = &self.show {
            lines.push(format!("Show: {}", show));
        }
        lines.push(format!("URL: {}", self.url));
        if let Some(date) = self.date_posted {
            lines.push(format!("Date Posted: {}", date));
        }
        lines.push(format!("Date Transcribed: {}", self.date_transcribed));
        lines.join("\n")
    }
}

/// Wall-clock seconds spent on the stages of one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunTimings {
    #[serde(rename = "download_time")]
    pub download_secs: f64,
    #[serde(rename = "processing_time")]
    pub processing_secs: f64,
}

/// Paths of the files written for one transcript
#[derive(Debug, Clone, PartialEq)]
pub struct SavedTranscript {
    pub text_path: PathBuf,
    pub json_path: PathBuf,
}

#[derive(Serialize)]
struct TranscriptDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a EpisodeMetadata>,
    transcript: &'a str,
    chunks: &'a [TranscriptChunk],
    raw_response: Option<&'a serde_json::Value>,
    #[serde(flatten)]
    timings: Option<&'a RunTimings>,
}

/// Write `<episode>.txt` and `<episode>_full.json` into `dir`.
///
/// Nothing is written for a result without text.
pub async fn save_transcript(
    result: &TranscriptionResult,
    info: &EpisodeInfo,
    dir: &Path,
    include_metadata: bool,
    timings: Option<&RunTimings>,
) -> Result<SavedTranscript> {
    let metadata = include_metadata.then(|| EpisodeMetadata::from_info(info, Local::now().date_naive()));
    write_artifacts(result, metadata.as_ref(), timings, &info.episode_name(), dir)
}

fn write_artifacts(
    result: &TranscriptionResult,
    metadata: Option<&EpisodeMetadata>,
    timings: Option<&RunTimings>,
    name: &str,
    dir: &Path,
) -> Result<SavedTranscript> {
    if !result.is_usable() {
        anyhow::bail!("Transcript is empty, nothing was saved");
    }

    fs_err::create_dir_all(dir).context("Failed to create output directory")?;

    let text_path = dir.join(format!("{}.txt", name));
    let json_path = dir.join(format!("{}_full.json", name));

    let mut text = String::new();
    if let Some(metadata) = metadata {
        text.push_str(&metadata.header());
        text.push_str("\n\n");
    }
    text.push_str(result.text.trim());
    text.push('\n');
    fs_err::write(&text_path, text)?;

    let document = TranscriptDocument {
        metadata,
        transcript: &result.text,
        chunks: &result.chunks,
        raw_response: result.raw_response.as_ref(),
        timings,
    };
    let json = serde_json::to_string_pretty(&document).context("Failed to serialize transcript")?;
    fs_err::write(&json_path, json)?;

    tracing::info!(
        "Saved transcript to {} and {}",
        text_path.display(),
        json_path.display()
    );

    Ok(SavedTranscript {
        text_path,
        json_path,
    })
}
