use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;

use super::{is_web_url, EpisodeInfo, FetchedAudio, MediaExtractor};
use crate::{Result, TranscriptorError};

pub const PLATFORM_NAME: &str = "Local File";

/// Uses an audio or video file that is already on disk, in place
pub struct LocalFileExtractor;

impl LocalFileExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Check if the file exists and is accessible
    async fn validate_file(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| TranscriptorError::FileError(format!("{}: {}", path.display(), e)))?;

        if !metadata.is_file() {
            return Err(TranscriptorError::FileError(format!("Path is not a file: {}", path.display())).into());
        }
        if metadata.len() == 0 {
            return Err(TranscriptorError::FileError(format!("File is empty: {}", path.display())).into());
        }

        Ok(metadata.len())
    }
}

impl Default for LocalFileExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaExtractor for LocalFileExtractor {
    async fn extract_info(&self, input: &str) -> Result<EpisodeInfo> {
        let path = Path::new(input);
        let size = self.validate_file(path).await?;
        tracing::debug!("Using local file {} ({} bytes)", path.display(), size);

        let absolute = fs::canonicalize(path)
            .await
            .with_context(|| format!("Cannot resolve {}", path.display()))?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Local File".to_string());

        Ok(EpisodeInfo {
            title,
            show: None,
            original_url: input.to_string(),
            date_posted: None,
            duration_secs: None,
            local_path: Some(absolute),
        })
    }

    async fn fetch_audio(&self, info: &EpisodeInfo, _dir: &Path) -> Result<FetchedAudio> {
        let path = info
            .local_path
            .clone()
            .ok_or_else(|| TranscriptorError::FileError(format!("{} is not a local file", info.original_url)))?;

        Ok(FetchedAudio { path, owned: false })
    }

    fn supports(&self, input: &str) -> bool {
        !is_web_url(input) && Path::new(input).is_file()
    }

    fn platform_name(&self) -> &'static str {
        PLATFORM_NAME
    }
}
