use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

pub mod cutter;
pub mod probe;

pub use cutter::{FfmpegCutter, SegmentCutter};
pub use probe::{DurationProbe, FfprobeProbe};

/// Failure to determine the duration of an audio file
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("Audio file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{tool} is not available: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Duration probe failed: {0}")]
    Failed(String),

    #[error("Could not parse duration from probe output: {0:?}")]
    Unparseable(String),

    #[error("Invalid audio duration: {0} seconds")]
    InvalidDuration(f64),
}

/// Failure to produce one segment of a source file
#[derive(thiserror::Error, Debug)]
pub enum CutError {
    #[error("{tool} is not available: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid segment range: offset {offset}s, length {length}s")]
    InvalidRange { offset: f64, length: f64 },

    #[error("Segment extraction failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Segment extraction produced no file at {}", .0.display())]
    NoOutput(PathBuf),
}

/// Supported audio container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
    Webm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Webm => "webm",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "aac" | "mp4" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "ogg" | "opus" => Some(AudioFormat::Ogg),
            "webm" => Some(AudioFormat::Webm),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Get MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
        }
    }
}

/// A local audio file to be transcribed.
///
/// The duration is probed at most once and cached afterwards. It can also be
/// seeded from download metadata, in which case no probe is needed.
#[derive(Debug)]
pub struct AudioSource {
    path: PathBuf,
    size_bytes: u64,
    duration: OnceCell<f64>,
}

impl AudioSource {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            duration: OnceCell::new(),
        }
    }

    /// Open an existing file and record its size
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(Self::new(path, metadata.len()))
    }

    /// Seed the cached duration, e.g. from yt-dlp metadata
    pub fn with_known_duration(self, seconds: f64) -> Self {
        // A freshly built cell is always empty, so the set cannot fail here
        let _ = self.duration.set(seconds);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn format(&self) -> Option<AudioFormat> {
        AudioFormat::from_path(&self.path)
    }

    /// Duration if it has already been determined, without probing
    pub fn known_duration(&self) -> Option<f64> {
        self.duration.get().copied()
    }

    /// Duration in seconds, probing the file on first use
    pub async fn duration(&self, probe: &dyn DurationProbe) -> Result<f64, ProbeError> {
        self.duration
            .get_or_try_init(|| probe.probe(&self.path))
            .await
            .copied()
    }
}

/// A transient segment file that is removed when dropped.
///
/// Workers hold one of these from before the cut until the transcription attempt
/// finishes, so aborted tasks also clean up after themselves.
#[derive(Debug)]
pub struct SegmentFile {
    path: PathBuf,
    removed: bool,
}

impl SegmentFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the produced file, or `None` when nothing was written
    pub async fn size(&self) -> Option<u64> {
        tokio::fs::metadata(&self.path).await.ok().map(|m| m.len())
    }

    /// Delete the file now rather than at the end of the scope
    pub fn remove(mut self) {
        self.delete();
    }

    fn delete(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed segment file: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove segment file {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for SegmentFile {
    fn drop(&mut self) {
        self.delete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProbe {
        calls: Arc<AtomicUsize>,
        seconds: f64,
    }

    #[async_trait::async_trait]
    impl DurationProbe for CountingProbe {
        async fn probe(&self, _path: &Path) -> Result<f64, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.seconds)
        }
    }

    #[tokio::test]
    async fn test_duration_is_probed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = CountingProbe {
            calls: Arc::clone(&calls),
            seconds: 42.5,
        };
        let source = AudioSource::new("episode.mp3", 10);

        assert_eq!(source.known_duration(), None);
        assert_eq!(source.duration(&probe).await.unwrap(), 42.5);
        assert_eq!(source.duration(&probe).await.unwrap(), 42.5);
        assert_eq!(source.known_duration(), Some(42.5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_known_duration_skips_probe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = CountingProbe {
            calls: Arc::clone(&calls),
            seconds: 1.0,
        };
        let source = AudioSource::new("episode.mp3", 10).with_known_duration(600.0);

        assert_eq!(source.duration(&probe).await.unwrap(), 600.0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_records_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.m4a");
        fs_err::write(&path, vec![0u8; 2048]).unwrap();

        let source = AudioSource::open(&path).await.unwrap();
        assert_eq!(source.size_bytes(), 2048);
        assert_eq!(source.format(), Some(AudioFormat::M4a));
        assert!(AudioSource::open(dir.path().join("missing.mp3")).await.is_err());
    }

    #[tokio::test]
    async fn test_segment_file_removed_on_drop_and_remove() {
        let dir = tempfile::tempdir().unwrap();

        let dropped = dir.path().join("a.mp3");
        fs_err::write(&dropped, b"data").unwrap();
        {
            let file = SegmentFile::new(&dropped);
            assert_eq!(file.size().await, Some(4));
        }
        assert!(!dropped.exists());

        let removed = dir.path().join("b.mp3");
        fs_err::write(&removed, b"data").unwrap();
        SegmentFile::new(&removed).remove();
        assert!(!removed.exists());

        // never written: dropping must not complain
        let missing = SegmentFile::new(dir.path().join("c.mp3"));
        assert_eq!(missing.size().await, None);
    }

    #[test]
    fn test_audio_format_mapping() {
        assert_eq!(AudioFormat::from_extension("MP3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::from_path(Path::new("x/y.opus")), Some(AudioFormat::Ogg));
        assert_eq!(AudioFormat::from_extension("txt"), None);
        assert_eq!(AudioFormat::Mp3.mime_type(), "audio/mpeg");
    }
}
