use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transcribe::batch::BatchSettings;
use crate::transcribe::fal::{self, FalSettings};

/// Environment variable holding the fal.ai API key
pub const API_KEY_ENV: &str = "FAL_KEY";

/// Configuration problems that stop the tool before any work is done
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("FAL API key is required: set the FAL_KEY environment variable or fal.api_key in the config file")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transcription service settings
    pub fal: FalConfig,

    /// Segmentation settings for long recordings
    pub batch: BatchConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalConfig {
    /// API key, used when FAL_KEY is not set
    pub api_key: Option<String>,

    /// Model endpoint on the queue
    pub model: String,

    /// Queue API base URL
    pub queue_url: String,

    /// Storage API base URL used for uploads
    pub storage_url: String,

    /// Spoken language code
    pub language: String,

    /// Chunk granularity requested from the service
    pub chunk_level: String,

    /// Model version selector
    pub version: String,

    /// Delay between status polls
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Files up to this size are sent in one request
    pub max_size_mb: f64,

    /// Files longer than this are split even when small
    pub max_duration_minutes: Option<f64>,

    /// Length of each segment
    pub segment_minutes: f64,

    /// Segments transcribed at the same time
    pub concurrency: usize,

    /// Upper bound for one segment's transcription
    pub segment_timeout_secs: u64,

    /// Cut segments below this size are skipped
    pub min_segment_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where transcripts are written (current directory when unset)
    pub output_dir: Option<PathBuf>,

    /// Temporary directory for downloads and segments
    pub temp_dir: Option<PathBuf>,

    /// Keep downloaded audio files after transcription
    pub keep_audio: bool,

    /// Prefix the text transcript with episode metadata
    pub include_metadata: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fal: FalConfig {
                api_key: None,
                model: fal::DEFAULT_MODEL.to_string(),
                queue_url: fal::DEFAULT_QUEUE_URL.to_string(),
                storage_url: fal::DEFAULT_STORAGE_URL.to_string(),
                language: "en".to_string(),
                chunk_level: "segment".to_string(),
                version: "3".to_string(),
                poll_interval_ms: 1000,
            },
            batch: BatchConfig {
                max_size_mb: 8.0,
                max_duration_minutes: Some(8.0),
                segment_minutes: 8.0,
                concurrency: 4,
                segment_timeout_secs: 600,
                min_segment_bytes: 1024,
            },
            app: AppConfig {
                output_dir: None,
                temp_dir: None,
                keep_audio: false,
                include_metadata: true,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config_path = match explicit_path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            tracing::debug!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("podcast-transcriptor").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let batch = &self.batch;
        if !(batch.max_size_mb.is_finite() && batch.max_size_mb > 0.0) {
            return Err(ConfigError::Invalid("batch.max_size_mb must be positive".into()));
        }
        if !(batch.segment_minutes.is_finite() && batch.segment_minutes > 0.0) {
            return Err(ConfigError::Invalid("batch.segment_minutes must be positive".into()));
        }
        if let Some(minutes) = batch.max_duration_minutes {
            if !(minutes.is_finite() && minutes > 0.0) {
                return Err(ConfigError::Invalid(
                    "batch.max_duration_minutes must be positive".into(),
                ));
            }
        }
        if batch.concurrency == 0 {
            return Err(ConfigError::Invalid("batch.concurrency must be at least 1".into()));
        }
        if batch.segment_timeout_secs == 0 {
            return Err(ConfigError::Invalid("batch.segment_timeout_secs must be positive".into()));
        }
        if self.fal.model.trim().is_empty() {
            return Err(ConfigError::Invalid("fal.model must not be empty".into()));
        }

        Ok(())
    }

    /// Resolve the API key, preferring the environment over the config file
    pub fn require_api_key(&self) -> Result<String, ConfigError> {
        self.resolve_api_key(std::env::var(API_KEY_ENV).ok())
    }

    fn resolve_api_key(&self, from_env: Option<String>) -> Result<String, ConfigError> {
        from_env
            .into_iter()
            .chain(self.fal.api_key.clone())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Settings for the transcription client
    pub fn fal_settings(&self) -> Result<FalSettings, ConfigError> {
        Ok(FalSettings {
            api_key: self.require_api_key()?,
            model: self.fal.model.clone(),
            queue_url: self.fal.queue_url.clone(),
            storage_url: self.fal.storage_url.clone(),
            language: self.fal.language.clone(),
            chunk_level: self.fal.chunk_level.clone(),
            version: self.fal.version.clone(),
            poll_interval: Duration::from_millis(self.fal.poll_interval_ms),
        })
    }

    /// Settings for the batch orchestrator, with segments written to `work_dir`
    pub fn batch_settings(&self, work_dir: impl Into<PathBuf>) -> BatchSettings {
        BatchSettings {
            max_size_bytes: (self.batch.max_size_mb * 1024.0 * 1024.0) as u64,
            max_duration_secs: self.batch.max_duration_minutes.map(|m| m * 60.0),
            segment_duration_secs: self.batch.segment_minutes * 60.0,
            concurrency: self.batch.concurrency,
            segment_timeout: Duration::from_secs(self.batch.segment_timeout_secs),
            min_segment_bytes: self.batch.min_segment_bytes,
            work_dir: work_dir.into(),
        }
    }

    /// Display current configuration
    pub fn display(&self) {
        let key_state = match self.require_api_key() {
            Ok(key) => mask_key(&key),
            Err(_) => "(not set)".to_string(),
        };

        println!("Current Configuration:");
        println!("  Model: {}", self.fal.model);
        println!("  API Key: {}", key_state);
        println!("  Language: {}", self.fal.language);
        println!("  Max Size: {} MB", self.batch.max_size_mb);
        match self.batch.max_duration_minutes {
            Some(minutes) => println!("  Max Duration: {} min", minutes),
            None => println!("  Max Duration: unlimited"),
        }
        println!("  Segment Length: {} min", self.batch.segment_minutes);
        println!("  Concurrency: {}", self.batch.concurrency);
        println!("  Keep Audio: {}", self.app.keep_audio);
        if let Some(dir) = &self.app.output_dir {
            println!("  Output Directory: {}", dir.display());
        }
    }
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}****", visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip_keeps_settings() {
        let mut config = Config::default();
        config.batch.segment_minutes = 30.0;
        config.batch.max_duration_minutes = None;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.batch.segment_minutes, 30.0);
        assert_eq!(parsed.batch.max_duration_minutes, None);
        assert_eq!(parsed.fal.model, "fal-ai/wizper");
    }

    #[test]
    fn test_validate_rejects_bad_batch_values() {
        let mut config = Config::default();
        config.batch.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.batch.segment_minutes = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.batch.max_duration_minutes = Some(-1.0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_api_key_resolution() {
        let mut config = Config::default();
        assert!(matches!(config.resolve_api_key(None), Err(ConfigError::MissingApiKey)));
        assert!(matches!(
            config.resolve_api_key(Some("   ".into())),
            Err(ConfigError::MissingApiKey)
        ));

        config.fal.api_key = Some("from-file".into());
        assert_eq!(config.resolve_api_key(None).unwrap(), "from-file");
        assert_eq!(config.resolve_api_key(Some("from-env".into())).unwrap(), "from-env");
        assert_eq!(config.resolve_api_key(Some("".into())).unwrap(), "from-file");
    }

    #[test]
    fn test_batch_settings_conversion() {
        let config = Config::default();
        let settings = config.batch_settings("/tmp/work");

        assert_eq!(settings.max_size_bytes, 8 * 1024 * 1024);
        assert_eq!(settings.max_duration_secs, Some(480.0));
        assert_eq!(settings.segment_duration_secs, 480.0);
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.segment_timeout, Duration::from_secs(600));
        assert_eq!(settings.work_dir, PathBuf::from("/tmp/work"));
    }

    #[tokio::test]
    async fn test_load_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = Config::load(Some(&path)).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.batch.concurrency, 4);

        fs_err::write(&path, "not: [valid").unwrap();
        assert!(Config::load(Some(&path)).await.is_err());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abcdefgh"), "abcd****");
        assert_eq!(mask_key("ab"), "ab****");
    }
}
