//! Podcast Transcriptor - A Rust CLI tool for transcribing podcasts and videos
//!
//! This library downloads audio with yt-dlp, transcribes it through a hosted Whisper
//! endpoint and, for long recordings, splits the audio into segments that are
//! transcribed concurrently and stitched back into a single timeline.

pub mod cli;
pub mod config;
pub mod extractors;
pub mod media;
pub mod output;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::{Config, ConfigError};
pub use extractors::{EpisodeInfo, ExtractorRegistry, FetchedAudio, MediaExtractor};
pub use media::{AudioSource, CutError, ProbeError};
pub use transcribe::batch::{BatchError, BatchOrchestrator, BatchPlan, BatchSettings};
pub use transcribe::{
    NoProgress, ProgressSink, TracingProgress, TranscriptChunk, Transcriber, TranscriptionError,
    TranscriptionResult,
};

/// Result type used throughout the application layer
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the transcriptor
#[derive(thiserror::Error, Debug)]
pub enum TranscriptorError {
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Audio extraction failed: {0}")]
    AudioExtractionFailed(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("File operation failed: {0}")]
    FileError(String),
}
