use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub mod local;
pub mod ytdlp;

use crate::utils;
use crate::{Result, TranscriptorError};

/// What is known about an episode before it is transcribed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Episode or video title
    pub title: String,

    /// Channel, uploader or show name
    pub show: Option<String>,

    /// URL or path the user asked for
    pub original_url: String,

    /// Publication date if the platform reports one
    pub date_posted: Option<NaiveDate>,

    /// Duration in seconds if the platform reports one
    pub duration_secs: Option<f64>,

    /// Set when the input is already a file on disk
    pub local_path: Option<PathBuf>,
}

impl EpisodeInfo {
    /// Base name for the transcript files
    pub fn episode_name(&self) -> String {
        if self.local_path.is_some() {
            return utils::episode_name("", Some(&self.title));
        }
        utils::episode_name(&self.original_url, Some(&self.title))
    }
}

/// Audio file ready for transcription
#[derive(Debug)]
pub struct FetchedAudio {
    pub path: PathBuf,

    /// Whether the file was downloaded by us and may be deleted afterwards
    pub owned: bool,
}

impl FetchedAudio {
    /// Delete the file if it was downloaded by us
    pub async fn cleanup(self) {
        if !self.owned {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!("Removed downloaded audio {}", self.path.display()),
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Trait for turning user input into a local audio file
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Look up metadata without downloading anything large
    async fn extract_info(&self, input: &str) -> Result<EpisodeInfo>;

    /// Make the audio available as a local file inside `dir`
    async fn fetch_audio(&self, info: &EpisodeInfo, dir: &Path) -> Result<FetchedAudio>;

    /// Check if this extractor handles the given input
    fn supports(&self, input: &str) -> bool;

    /// Get the name of this platform
    fn platform_name(&self) -> &'static str;
}

/// Registry for managing multiple extractors
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn MediaExtractor>>,
    local: local::LocalFileExtractor,
}

impl ExtractorRegistry {
    /// Create a new registry with default extractors
    pub fn new() -> Self {
        let mut registry = Self {
            extractors: Vec::new(),
            local: local::LocalFileExtractor::new(),
        };

        // Local files are matched by `is_local_file`, not through the list
        registry.register(Box::new(ytdlp::YtDlpExtractor::new()));

        registry
    }

    /// Register a new extractor
    pub fn register(&mut self, extractor: Box<dyn MediaExtractor>) {
        self.extractors.push(extractor);
    }

    /// List all supported platforms
    pub fn list_platforms(&self) -> Vec<&'static str> {
        std::iter::once(self.local.platform_name())
            .chain(self.extractors.iter().map(|extractor| extractor.platform_name()))
            .collect()
    }

    /// Check if input is a local file path
    pub fn is_local_file(&self, input: &str) -> bool {
        if is_web_url(input) {
            return false;
        }

        let path = Path::new(input);
        if path.exists() {
            return true;
        }

        // Looks like a path even though it doesn't exist, so report it as a missing file
        let has_extension = path.extension().is_some();
        let has_path_separators = input.contains('/') || input.contains('\\');

        has_extension || has_path_separators
    }

    /// Find the extractor responsible for the input
    pub fn find_extractor(&self, input: &str) -> Result<&dyn MediaExtractor> {
        if self.is_local_file(input) {
            return Ok(&self.local);
        }

        self.extractors
            .iter()
            .find(|extractor| extractor.supports(input))
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| {
                TranscriptorError::UnsupportedInput(format!(
                    "{} (supported: {})",
                    input,
                    self.list_platforms().join(", ")
                ))
                .into()
            })
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the input parses as an http(s) URL
pub fn is_web_url(input: &str) -> bool {
    Url::parse(input)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
