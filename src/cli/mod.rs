use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

pub mod progress;

pub use progress::SpinnerProgress;

#[derive(Parser, Debug)]
#[command(
    name = "transcriptor",
    about = "Podcast Transcriptor - Transcribe podcasts and videos of any length with a hosted Whisper model",
    version,
    long_about = "Downloads audio with yt-dlp (or uses a local file), sends it to a hosted Whisper endpoint on fal.ai and writes a text and a JSON transcript. Long recordings are split into segments with ffmpeg, transcribed concurrently and stitched back onto one timeline."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators and informational logs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true, env = "TRANSCRIPTOR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe audio from a URL or local file
    Transcribe(TranscribeArgs),

    /// Show or initialise the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Show duration, size and the segment plan for a local file
    Probe {
        /// Audio or video file to inspect
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List supported platforms
    Platforms,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TranscribeArgs {
    /// URL or file path to transcribe (anything yt-dlp supports, or local audio/video files)
    #[arg(value_name = "URL_OR_FILE")]
    pub input: String,

    /// Directory for the transcript files (current directory if not specified)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Language code for transcription
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,

    /// Length of each segment for long recordings, in minutes
    #[arg(long, value_name = "MINUTES")]
    pub segment_minutes: Option<f64>,

    /// Largest file sent to the service in a single request, in MB
    #[arg(long, value_name = "MB")]
    pub max_size_mb: Option<f64>,

    /// Longest recording sent in a single request, in minutes
    #[arg(long, value_name = "MINUTES")]
    pub max_duration_minutes: Option<f64>,

    /// Number of segments transcribed at the same time
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Keep the downloaded audio next to the transcript
    #[arg(long)]
    pub keep_audio: bool,

    /// Leave the metadata header out of the transcript files
    #[arg(long)]
    pub no_metadata: bool,
}

impl TranscribeArgs {
    /// Apply command line overrides on top of the loaded configuration
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.app.output_dir = Some(output.clone());
        }
        if let Some(language) = &self.language {
            config.fal.language = language.clone();
        }
        if let Some(minutes) = self.segment_minutes {
            config.batch.segment_minutes = minutes;
        }
        if let Some(mb) = self.max_size_mb {
            config.batch.max_size_mb = mb;
        }
        if let Some(minutes) = self.max_duration_minutes {
            config.batch.max_duration_minutes = Some(minutes);
        }
        if let Some(concurrency) = self.concurrency {
            config.batch.concurrency = concurrency;
        }
        if self.keep_audio {
            config.app.keep_audio = true;
        }
        if self.no_metadata {
            config.app.include_metadata = false;
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}
