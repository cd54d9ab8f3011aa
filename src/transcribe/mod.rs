use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod batch;
pub mod fal;

/// A time-bounded span of transcribed speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    /// Start time in seconds
    pub start: f64,

    /// End time in seconds
    pub end: f64,

    /// Chunk text
    pub text: String,
}

impl TranscriptChunk {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Move the chunk onto a timeline that starts `offset` seconds earlier
    pub fn shifted(mut self, offset: f64) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

/// Transcript of one audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// The transcribed text
    pub text: String,

    /// Chunks with timestamps, ordered by start time
    pub chunks: Vec<TranscriptChunk>,

    /// Untouched service response(s), kept for the JSON artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

impl TranscriptionResult {
    /// A result only counts as successful when it carries text
    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Failure of a single transcription attempt
#[derive(thiserror::Error, Debug)]
pub enum TranscriptionError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Transcription service error: {0}")]
    Service(String),

    #[error("Transcription service returned no text")]
    EmptyTranscript,

    #[error("Transcription timed out after {0:?}")]
    Timeout(Duration),
}

/// Receives human-readable status lines while long operations run.
///
/// Implementations must be cheap; ignoring every message is always valid.
pub trait ProgressSink: Send + Sync {
    fn message(&self, msg: &str);
}

/// Discards all progress messages
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn message(&self, _msg: &str) {}
}

/// Forwards progress messages to `tracing` at info level, for headless runs
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn message(&self, msg: &str) {
        tracing::info!(target: "podcast_transcriptor::progress", "{}", msg);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn message(&self, msg: &str) {
        self(msg)
    }
}

/// Turns one local audio file into a transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a file that exists and is non-empty.
    ///
    /// A single attempt is made; retrying is left to the caller.
    async fn transcribe(
        &self,
        audio_path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptionResult, TranscriptionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifted_moves_both_bounds() {
        let chunk = TranscriptChunk::new(0.0, 5.0, "hi").shifted(1800.0);
        assert_eq!(chunk, TranscriptChunk::new(1800.0, 1805.0, "hi"));
    }

    #[test]
    fn test_is_usable_requires_text() {
        let mut result = TranscriptionResult {
            text: "  \n".to_string(),
            chunks: vec![TranscriptChunk::new(0.0, 1.0, "")],
            raw_response: None,
        };
        assert!(!result.is_usable());

        result.text = "hello".to_string();
        assert!(result.is_usable());
    }

    #[test]
    fn test_closure_is_a_progress_sink() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |msg: &str| seen.lock().unwrap().push(msg.to_string());

        let dyn_sink: &dyn ProgressSink = &sink;
        dyn_sink.message("Uploading audio");
        dyn_sink.message("Transcribing audio");

        assert_eq!(*seen.lock().unwrap(), vec!["Uploading audio", "Transcribing audio"]);
    }

    #[test]
    fn test_headless_sinks_accept_messages() {
        let sinks: [&dyn ProgressSink; 2] = [&NoProgress, &TracingProgress];
        for sink in sinks {
            sink.message("Waiting in queue (position 1)");
        }
    }

    #[test]
    fn test_raw_response_omitted_when_absent() {
        let result = TranscriptionResult {
            text: "hello".to_string(),
            chunks: vec![],
            raw_response: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("raw_response").is_none());
        assert_eq!(json["text"], "hello");
    }
}
