use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{ProgressSink, Transcriber, TranscriptionError, TranscriptionResult};
use crate::media::{AudioSource, CutError, DurationProbe, ProbeError, SegmentCutter, SegmentFile};
use crate::utils::{format_duration, sanitize_filename};

/// Failure of a whole orchestration run
#[derive(thiserror::Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("Invalid segment length: {0} seconds")]
    InvalidSegmentLength(f64),

    #[error("All {planned} segments failed to transcribe")]
    AllSegmentsFailed { planned: usize },
}

/// Why a single segment contributed nothing to the transcript
#[derive(thiserror::Error, Debug)]
enum SegmentError {
    #[error(transparent)]
    Cut(#[from] CutError),

    #[error("segment file is only {bytes} bytes")]
    TooSmall { bytes: u64 },

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
}

/// Tunables for splitting and fan-out
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Files up to this size go to the service in one request
    pub max_size_bytes: u64,

    /// Files with a known duration above this are split even when small
    pub max_duration_secs: Option<f64>,

    /// Length of each planned segment
    pub segment_duration_secs: f64,

    /// Maximum number of segments in flight
    pub concurrency: usize,

    /// Upper bound for one segment's transcription attempt
    pub segment_timeout: Duration,

    /// Cut files smaller than this are skipped
    pub min_segment_bytes: u64,

    /// Directory for transient segment files
    pub work_dir: PathBuf,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 8 * 1024 * 1024,
            max_duration_secs: Some(8.0 * 60.0),
            segment_duration_secs: 8.0 * 60.0,
            concurrency: 4,
            segment_timeout: Duration::from_secs(600),
            min_segment_bytes: 1024,
            work_dir: std::env::temp_dir(),
        }
    }
}

impl BatchSettings {
    /// Whether a file can go to the service in one request.
    ///
    /// An unknown duration never forces splitting on its own.
    pub fn fits_single_request(&self, size_bytes: u64, duration_secs: Option<f64>) -> bool {
        if size_bytes > self.max_size_bytes {
            return false;
        }
        match (duration_secs, self.max_duration_secs) {
            (Some(duration), Some(max)) => duration <= max,
            _ => true,
        }
    }
}

/// One `[offset, offset + duration)` slice of the source
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlannedSegment {
    pub offset: f64,
    pub duration: f64,
}

/// Tails shorter than this are folded into the preceding segment
pub const MIN_TAIL_SECS: f64 = 1.0;

/// Contiguous, non-overlapping segments covering `[0, total_duration)`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    total_duration: f64,
    segment_duration: f64,
    segments: Vec<PlannedSegment>,
}

impl BatchPlan {
    pub fn new(total_duration: f64, segment_duration: f64) -> Result<Self, BatchError> {
        if !(segment_duration.is_finite() && segment_duration > 0.0) {
            return Err(BatchError::InvalidSegmentLength(segment_duration));
        }
        if !(total_duration.is_finite() && total_duration > 0.0) {
            return Err(ProbeError::InvalidDuration(total_duration).into());
        }

        let count = (total_duration / segment_duration).ceil().max(1.0) as usize;
        let mut segments: Vec<PlannedSegment> = (0..count)
            .map(|i| i as f64 * segment_duration)
            .take_while(|&offset| offset < total_duration)
            .map(|offset| PlannedSegment {
                offset,
                duration: (total_duration - offset).min(segment_duration),
            })
            .collect();

        // a sliver of a tail is not worth its own ffmpeg run and request
        if segments.len() > 1 && segments[segments.len() - 1].duration < MIN_TAIL_SECS {
            segments.pop();
            if let Some(last) = segments.last_mut() {
                last.duration = total_duration - last.offset;
            }
        }

        Ok(Self {
            total_duration,
            segment_duration,
            segments,
        })
    }

    pub fn segments(&self) -> &[PlannedSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn segment_duration(&self) -> f64 {
        self.segment_duration
    }
}

/// Everything a worker needs to process one segment on its own
struct SegmentJob {
    index: usize,
    total: usize,
    segment: PlannedSegment,
    source: PathBuf,
    output: PathBuf,
    min_bytes: u64,
    timeout: Duration,
}

struct SegmentOutcome {
    index: usize,
    segment: PlannedSegment,
    elapsed: Duration,
    result: Result<TranscriptionResult, SegmentError>,
}

impl SegmentJob {
    fn label(&self) -> String {
        format!(
            "segment {}/{} ({} - {})",
            self.index + 1,
            self.total,
            format_duration(self.segment.offset),
            format_duration(self.segment.offset + self.segment.duration)
        )
    }

    /// Cut, transcribe and delete one segment
    async fn run(
        &self,
        cutter: &dyn SegmentCutter,
        transcriber: &dyn Transcriber,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptionResult, SegmentError> {
        let started = Instant::now();
        let file = SegmentFile::new(&self.output);

        cutter
            .cut(&self.source, self.segment.offset, self.segment.duration, file.path())
            .await?;

        let bytes = file
            .size()
            .await
            .ok_or_else(|| CutError::NoOutput(self.output.clone()))?;
        if bytes < self.min_bytes {
            return Err(SegmentError::TooSmall { bytes });
        }

        progress.message(&format!("Transcribing {}", self.label()));
        let attempt = tokio::time::timeout(self.timeout, transcriber.transcribe(file.path(), progress)).await;
        file.remove();

        let result = match attempt {
            Ok(result) => result?,
            Err(_) => return Err(TranscriptionError::Timeout(self.timeout).into()),
        };
        if !result.is_usable() {
            return Err(TranscriptionError::EmptyTranscript.into());
        }

        tracing::debug!(
            "Finished {} in {:.2}s",
            self.label(),
            started.elapsed().as_secs_f64()
        );
        Ok(result)
    }
}

/// Transcribes a file whole, or splits it and transcribes the segments concurrently
pub struct BatchOrchestrator {
    transcriber: Arc<dyn Transcriber>,
    cutter: Arc<dyn SegmentCutter>,
    probe: Arc<dyn DurationProbe>,
    settings: BatchSettings,
}

impl BatchOrchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        cutter: Arc<dyn SegmentCutter>,
        probe: Arc<dyn DurationProbe>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            transcriber,
            cutter,
            probe,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Whether the source can be sent in a single request without probing
    pub fn fits_single_request(&self, source: &AudioSource) -> bool {
        self.settings
            .fits_single_request(source.size_bytes(), source.known_duration())
    }

    /// Probe the source and plan its segments
    pub async fn plan_for(&self, source: &AudioSource) -> Result<BatchPlan, BatchError> {
        let total = source.duration(self.probe.as_ref()).await?;
        BatchPlan::new(total, self.settings.segment_duration_secs)
    }

    /// Produce one transcript covering the whole source.
    ///
    /// Dropping the returned future aborts all segment workers; their ffmpeg
    /// processes are killed and their segment files removed.
    pub async fn transcribe(
        &self,
        source: &AudioSource,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<TranscriptionResult, BatchError> {
        if self.fits_single_request(source) {
            tracing::info!(
                "Transcribing {} as a single request ({} bytes)",
                source.path().display(),
                source.size_bytes()
            );
            return Ok(self.transcriber.transcribe(source.path(), progress.as_ref()).await?);
        }

        let plan = self.plan_for(source).await?;
        self.run_plan(source, &plan, progress).await
    }

    async fn run_plan(
        &self,
        source: &AudioSource,
        plan: &BatchPlan,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<TranscriptionResult, BatchError> {
        let started = Instant::now();
        let planned = plan.len();
        let workers = self.settings.concurrency.clamp(1, planned.max(1));

        tracing::info!(
            segments = planned,
            workers,
            "Transcribing {} ({}) in segments of {}",
            source.path().display(),
            format_duration(plan.total_duration()),
            format_duration(plan.segment_duration())
        );
        progress.message(&format!(
            "Processing {} segments, {} at a time",
            planned, workers
        ));

        if let Err(e) = tokio::fs::create_dir_all(&self.settings.work_dir).await {
            tracing::warn!(
                "Could not create work directory {}: {}",
                self.settings.work_dir.display(),
                e
            );
        }

        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let stem = source
            .path()
            .file_stem()
            .map(|s| sanitize_filename(&s.to_string_lossy()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "audio".to_string());
        let extension = source
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
            .to_string();

        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel::<SegmentOutcome>(planned.max(1));
        let mut tasks = JoinSet::new();

        for (index, segment) in plan.segments().iter().copied().enumerate() {
            let job = SegmentJob {
                index,
                total: planned,
                segment,
                source: source.path().to_path_buf(),
                output: self.settings.work_dir.join(format!(
                    "batch_{}_{}_{}.{}",
                    (segment.offset * 1000.0).round() as u64,
                    stem,
                    run_id,
                    extension
                )),
                min_bytes: self.settings.min_segment_bytes,
                timeout: self.settings.segment_timeout,
            };
            let semaphore = Arc::clone(&semaphore);
            let cutter = Arc::clone(&self.cutter);
            let transcriber = Arc::clone(&self.transcriber);
            let progress = Arc::clone(&progress);
            let tx = tx.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let segment_started = Instant::now();
                let result = job
                    .run(cutter.as_ref(), transcriber.as_ref(), progress.as_ref())
                    .await;
                // send only fails once the collector is gone, i.e. the run was cancelled
                let _ = tx
                    .send(SegmentOutcome {
                        index: job.index,
                        segment: job.segment,
                        elapsed: segment_started.elapsed(),
                        result,
                    })
                    .await;
            });
        }
        drop(tx);

        let mut completed = Vec::with_capacity(planned);
        let mut busy = Duration::ZERO;
        while let Some(outcome) = rx.recv().await {
            busy += outcome.elapsed;
            let number = outcome.index + 1;
            match outcome.result {
                Ok(result) => {
                    tracing::info!(
                        segment = number,
                        offset = outcome.segment.offset,
                        chunks = result.chunks.len(),
                        "Segment transcribed"
                    );
                    progress.message(&format!("Segment {}/{} done", number, planned));
                    completed.push((outcome.segment.offset, result));
                }
                Err(err) => {
                    tracing::warn!(
                        segment = number,
                        offset = outcome.segment.offset,
                        error = %err,
                        "Skipping segment"
                    );
                    progress.message(&format!(
                        "Skipping segment {}/{} at {}: {}",
                        number,
                        planned,
                        format_duration(outcome.segment.offset),
                        err
                    ));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Segment worker did not finish: {}", e);
            }
        }

        tracing::info!(
            planned,
            succeeded = completed.len(),
            skipped = planned - completed.len(),
            avg_segment_secs = busy.as_secs_f64() / planned.max(1) as f64,
            "Batch transcription finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );

        if completed.is_empty() {
            return Err(BatchError::AllSegmentsFailed { planned });
        }

        Ok(assemble(completed))
    }
}

/// Merge per-segment results into one transcript on the source's timeline
fn assemble(mut segments: Vec<(f64, TranscriptionResult)>) -> TranscriptionResult {
    segments.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut texts = Vec::with_capacity(segments.len());
    let mut chunks = Vec::new();
    let mut raw = Vec::with_capacity(segments.len());

    for (offset, result) in segments {
        let text = result.text.trim();
        if !text.is_empty() {
            texts.push(text.to_string());
        }
        chunks.extend(result.chunks.into_iter().map(|chunk| chunk.shifted(offset)));
        raw.push(json!({ "offset": offset, "response": result.raw_response }));
    }

    TranscriptionResult {
        text: texts.join(" "),
        chunks,
        raw_response: Some(serde_json::Value::Array(raw)),
    }
}
