use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

use super::{ProgressSink, TranscriptChunk, Transcriber, TranscriptionError, TranscriptionResult};
use crate::config::ConfigError;
use crate::media::AudioFormat;

pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
pub const DEFAULT_STORAGE_URL: &str = "https://rest.alpha.fal.ai";
pub const DEFAULT_MODEL: &str = "fal-ai/wizper";

/// Connection and request settings for the fal.ai queue API
#[derive(Debug, Clone)]
pub struct FalSettings {
    pub api_key: String,
    pub model: String,
    pub queue_url: String,
    pub storage_url: String,
    pub language: String,
    pub chunk_level: String,
    pub version: String,
    pub poll_interval: Duration,
}

impl FalSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            language: "en".to_string(),
            chunk_level: "segment".to_string(),
            version: "3".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Serialize)]
struct InitiateUpload<'a> {
    content_type: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadTarget {
    upload_url: String,
    file_url: String,
}

#[derive(Debug, Serialize)]
struct WizperRequest<'a> {
    audio_url: &'a str,
    task: &'a str,
    language: &'a str,
    chunk_level: &'a str,
    version: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueueTicket {
    request_id: String,
    status_url: Option<String>,
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: String,
    queue_position: Option<u64>,
    #[serde(default)]
    logs: Option<Vec<QueueLog>>,
}

#[derive(Debug, Deserialize)]
struct QueueLog {
    message: String,
}

#[derive(Debug, Deserialize)]
struct WizperOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    chunks: Vec<WizperChunk>,
}

#[derive(Debug, Deserialize)]
struct WizperChunk {
    timestamp: Vec<Option<f64>>,
    #[serde(default)]
    text: String,
}

/// Client for the fal.ai hosted Whisper ("wizper") endpoint
pub struct FalClient {
    client: reqwest::Client,
    settings: FalSettings,
}

impl FalClient {
    /// Create a client. A blank API key is a configuration error.
    pub fn new(settings: FalSettings) -> Result<Self, ConfigError> {
        if settings.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("podcast-transcriptor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self { client, settings })
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.settings.api_key)
    }

    /// Upload a local file to fal storage and return its public URL
    pub async fn upload(&self, path: &Path) -> Result<String, TranscriptionError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TranscriptionError::Upload(format!("{}: {}", path.display(), e)))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(TranscriptionError::Upload(format!(
                "{} is empty or not a file",
                path.display()
            )));
        }

        let content_type = AudioFormat::from_path(path)
            .map(|f| f.mime_type())
            .unwrap_or("application/octet-stream");
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3");

        let initiate_url = format!(
            "{}/storage/upload/initiate",
            self.settings.storage_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&initiate_url)
            .query(&[("storage_type", "fal-cdn-v3")])
            .header(AUTHORIZATION, self.auth_header())
            .json(&InitiateUpload {
                content_type,
                file_name,
            })
            .send()
            .await
            .map_err(|e| TranscriptionError::Upload(format!("initiate: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Upload(format!(
                "initiate returned HTTP {}: {}",
                status, body
            )));
        }

        let target: UploadTarget = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Upload(format!("initiate response: {}", e)))?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TranscriptionError::Upload(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            "Uploading {} ({} bytes) to fal storage",
            path.display(),
            bytes.len()
        );

        let response = self
            .client
            .put(&target.upload_url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| TranscriptionError::Upload(format!("put: {}", e)))?;

        if !response.status().is_success() {
            return Err(TranscriptionError::Upload(format!(
                "storage returned HTTP {}",
                response.status()
            )));
        }

        Ok(target.file_url)
    }

    async fn submit(&self, audio_url: &str) -> Result<QueueTicket, TranscriptionError> {
        let url = format!(
            "{}/{}",
            self.settings.queue_url.trim_end_matches('/'),
            self.settings.model
        );
        let request = WizperRequest {
            audio_url,
            task: "transcribe",
            language: &self.settings.language,
            chunk_level: &self.settings.chunk_level,
            version: &self.settings.version,
        };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.auth_header())
            .json(&request)
            .send()
            .await
            .map_err(|e| TranscriptionError::Service(format!("submit: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Service(format!(
                "submit returned HTTP {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TranscriptionError::Service(format!("submit response: {}", e)))
    }

    fn request_url(&self, request_id: &str) -> String {
        format!(
            "{}/{}/requests/{}",
            self.settings.queue_url.trim_end_matches('/'),
            self.settings.model,
            request_id
        )
    }

    /// Poll the request until the queue reports completion, relaying service logs
    async fn wait_for_completion(
        &self,
        status_url: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), TranscriptionError> {
        let mut logs_seen = 0usize;
        let mut last_position = None;

        loop {
            let response = self
                .client
                .get(status_url)
                .query(&[("logs", "1")])
                .header(AUTHORIZATION, self.auth_header())
                .send()
                .await
                .map_err(|e| TranscriptionError::Service(format!("status: {}", e)))?;

            if !response.status().is_success() {
                return Err(TranscriptionError::Service(format!(
                    "status returned HTTP {}",
                    response.status()
                )));
            }

            let status: QueueStatus = response
                .json()
                .await
                .map_err(|e| TranscriptionError::Service(format!("status response: {}", e)))?;

            if let Some(logs) = &status.logs {
                for log in logs.iter().skip(logs_seen) {
                    progress.message(&log.message);
                }
                logs_seen = logs_seen.max(logs.len());
            }

            match status.status.as_str() {
                "COMPLETED" => return Ok(()),
                "IN_QUEUE" => {
                    if status.queue_position != last_position {
                        last_position = status.queue_position;
                        if let Some(position) = status.queue_position {
                            progress.message(&format!("Waiting in queue (position {})", position));
                        }
                    }
                }
                "IN_PROGRESS" => {}
                other => {
                    return Err(TranscriptionError::Service(format!(
                        "unexpected request status: {}",
                        other
                    )))
                }
            }

            sleep(self.settings.poll_interval).await;
        }
    }

    async fn fetch_result(&self, response_url: &str) -> Result<TranscriptionResult, TranscriptionError> {
        let response = self
            .client
            .get(response_url)
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| TranscriptionError::Service(format!("result: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Service(format!(
                "result returned HTTP {}: {}",
                status, body
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Service(format!("result body: {}", e)))?;

        parse_wizper_output(raw)
    }
}

/// Convert the service's output document into a transcript.
///
/// Chunks without a start are dropped. A missing end is taken from the next
/// chunk's start; a chunk that still has no positive length is folded into the
/// chunk before it, so every chunk satisfies `start < end`.
fn parse_wizper_output(raw: serde_json::Value) -> Result<TranscriptionResult, TranscriptionError> {
    let output: WizperOutput = serde_json::from_value(raw.clone())
        .map_err(|e| TranscriptionError::Service(format!("unexpected result shape: {}", e)))?;

    if output.text.trim().is_empty() {
        return Err(TranscriptionError::EmptyTranscript);
    }

    let timed: Vec<(f64, Option<f64>, String)> = output
        .chunks
        .into_iter()
        .filter_map(|chunk| {
            let start = chunk.timestamp.first().copied().flatten()?;
            let end = chunk.timestamp.get(1).copied().flatten();
            Some((start, end, chunk.text))
        })
        .collect();

    let mut chunks: Vec<TranscriptChunk> = Vec::with_capacity(timed.len());
    for (index, (start, end, text)) in timed.iter().enumerate() {
        let end = end.or_else(|| timed.get(index + 1).map(|next| next.0));
        match end {
            Some(end) if end > *start => chunks.push(TranscriptChunk::new(*start, end, text.as_str())),
            _ => match chunks.last_mut() {
                Some(previous) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        previous.text = format!("{} {}", previous.text.trim_end(), text);
                    }
                }
                None => tracing::debug!("Dropping chunk without a usable time range at {:.2}s", start),
            },
        }
    }

    Ok(TranscriptionResult {
        text: output.text,
        chunks,
        raw_response: Some(raw),
    })
}

#[async_trait]
impl Transcriber for FalClient {
    async fn transcribe(
        &self,
        audio_path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let file_label = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| audio_path.display().to_string());

        progress.message(&format!("Uploading {}", file_label));
        let audio_url = self.upload(audio_path).await?;
        tracing::info!("Uploaded file URL: {}", audio_url);

        let ticket = self.submit(&audio_url).await?;
        tracing::info!("Submitted transcription request {}", ticket.request_id);
        progress.message(&format!("Transcribing {}", file_label));

        let base = self.request_url(&ticket.request_id);
        let status_url = ticket
            .status_url
            .clone()
            .unwrap_or_else(|| format!("{}/status", base));
        let response_url = ticket.response_url.clone().unwrap_or(base);

        self.wait_for_completion(&status_url, progress).await?;
        let result = self.fetch_result(&response_url).await?;

        tracing::info!(
            request_id = %ticket.request_id,
            chars = result.text.len(),
            chunks = result.chunks.len(),
            "Transcription completed"
        );
        progress.message(&format!("Finished {}", file_label));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::NoProgress;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProgress(Mutex<Vec<String>>);

    impl ProgressSink for RecordingProgress {
        fn message(&self, msg: &str) {
            self.0.lock().unwrap().push(msg.to_string());
        }
    }

    fn settings_for(server: &Server) -> FalSettings {
        FalSettings {
            queue_url: server.url(),
            storage_url: server.url(),
            poll_interval: Duration::from_millis(10),
            ..FalSettings::new("test-key")
        }
    }

    fn audio_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("episode.mp3");
        fs_err::write(&path, b"ID3 fake mp3 payload").unwrap();
        path
    }

    async fn mock_upload(server: &mut Server) -> (mockito::Mock, mockito::Mock) {
        let initiate = server
            .mock("POST", "/storage/upload/initiate")
            .match_query(Matcher::UrlEncoded("storage_type".into(), "fal-cdn-v3".into()))
            .match_header("authorization", "Key test-key")
            .match_body(Matcher::PartialJson(json!({
                "content_type": "audio/mpeg",
                "file_name": "episode.mp3"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "upload_url": format!("{}/upload/abc", server.url()),
                    "file_url": "https://cdn.example/abc.mp3"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let put = server
            .mock("PUT", "/upload/abc")
            .match_header("content-type", "audio/mpeg")
            .match_body("ID3 fake mp3 payload")
            .with_status(200)
            .create_async()
            .await;

        (initiate, put)
    }

    async fn mock_submit(server: &mut Server) -> mockito::Mock {
        server
            .mock("POST", "/fal-ai/wizper")
            .match_header("authorization", "Key test-key")
            .match_body(Matcher::Json(json!({
                "audio_url": "https://cdn.example/abc.mp3",
                "task": "transcribe",
                "language": "en",
                "chunk_level": "segment",
                "version": "3"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "request_id": "req-1",
                    "status_url": format!("{}/fal-ai/wizper/requests/req-1/status", server.url()),
                    "response_url": format!("{}/fal-ai/wizper/requests/req-1", server.url())
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    async fn mock_status(server: &mut Server, body: serde_json::Value) -> mockito::Mock {
        server
            .mock("GET", "/fal-ai/wizper/requests/req-1/status")
            .match_query(Matcher::UrlEncoded("logs".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_transcribe_full_flow() {
        let mut server = Server::new_async().await;
        let (initiate, put) = mock_upload(&mut server).await;
        let submit = mock_submit(&mut server).await;
        let status = mock_status(
            &mut server,
            json!({
                "status": "COMPLETED",
                "logs": [{"message": "Loading model"}, {"message": "Transcribing audio"}]
            }),
        )
        .await;
        let result_mock = server
            .mock("GET", "/fal-ai/wizper/requests/req-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "text": "hello there general kenobi",
                    "chunks": [
                        {"timestamp": [0.0, 2.5], "text": "hello there"},
                        {"timestamp": [2.5, null], "text": "general kenobi"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = audio_file(&dir);
        let client = FalClient::new(settings_for(&server)).unwrap();
        let progress = RecordingProgress::default();

        let result = client.transcribe(&path, &progress).await.unwrap();

        assert_eq!(result.text, "hello there general kenobi");
        // the open-ended last chunk has no length of its own
        assert_eq!(
            result.chunks,
            vec![TranscriptChunk::new(0.0, 2.5, "hello there general kenobi")]
        );
        assert!(result.raw_response.is_some());

        let messages = progress.0.lock().unwrap();
        assert!(messages.iter().any(|m| m == "Loading model"));
        assert!(messages.iter().any(|m| m == "Transcribing audio"));

        initiate.assert_async().await;
        put.assert_async().await;
        submit.assert_async().await;
        status.assert_async().await;
        result_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_rejected_is_upload_error() {
        let mut server = Server::new_async().await;
        let _initiate = server
            .mock("POST", "/storage/upload/initiate")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = audio_file(&dir);
        let client = FalClient::new(settings_for(&server)).unwrap();

        let err = client.transcribe(&path, &NoProgress).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Upload(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_any_request() {
        let server = Server::new_async().await;
        let client = FalClient::new(settings_for(&server)).unwrap();

        let err = client
            .transcribe(Path::new("/no/such/file.mp3"), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::Upload(_)));
    }

    #[tokio::test]
    async fn test_empty_text_is_reported() {
        let mut server = Server::new_async().await;
        let _upload = mock_upload(&mut server).await;
        let _submit = mock_submit(&mut server).await;
        let _status = mock_status(&mut server, json!({"status": "COMPLETED"})).await;
        let _result = server
            .mock("GET", "/fal-ai/wizper/requests/req-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"text": "   ", "chunks": []}).to_string())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = audio_file(&dir);
        let client = FalClient::new(settings_for(&server)).unwrap();

        let err = client.transcribe(&path, &NoProgress).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::EmptyTranscript));
    }

    #[tokio::test]
    async fn test_unknown_status_is_service_error() {
        let mut server = Server::new_async().await;
        let _upload = mock_upload(&mut server).await;
        let _submit = mock_submit(&mut server).await;
        let _status = mock_status(&mut server, json!({"status": "FAILED"})).await;

        let dir = tempfile::tempdir().unwrap();
        let path = audio_file(&dir);
        let client = FalClient::new(settings_for(&server)).unwrap();

        let err = client.transcribe(&path, &NoProgress).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Service(ref msg) if msg.contains("FAILED")));
    }

    #[tokio::test]
    async fn test_polling_relays_queue_position_and_new_logs_once() {
        let mut server = Server::new_async().await;
        let replies = [
            json!({"status": "IN_QUEUE", "queue_position": 2}),
            json!({"status": "IN_QUEUE", "queue_position": 2}),
            json!({"status": "IN_QUEUE", "queue_position": 1}),
            json!({"status": "IN_PROGRESS", "logs": [{"message": "Loading model"}]}),
            json!({"status": "IN_PROGRESS", "logs": [{"message": "Loading model"}, {"message": "Decoding"}]}),
            json!({"status": "COMPLETED", "logs": [{"message": "Loading model"}, {"message": "Decoding"}]}),
        ];
        let polls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&polls);
        let status = server
            .mock("GET", "/fal-ai/wizper/requests/req-1/status")
            .match_query(Matcher::UrlEncoded("logs".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                let poll = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                replies[poll.min(replies.len() - 1)].to_string().into_bytes()
            })
            .expect(6)
            .create_async()
            .await;

        let client = FalClient::new(settings_for(&server)).unwrap();
        let progress = RecordingProgress::default();
        let status_url = format!("{}/fal-ai/wizper/requests/req-1/status", server.url());

        client.wait_for_completion(&status_url, &progress).await.unwrap();

        assert_eq!(
            *progress.0.lock().unwrap(),
            vec![
                "Waiting in queue (position 2)",
                "Waiting in queue (position 1)",
                "Loading model",
                "Decoding",
            ]
        );
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_http_error_stops_polling() {
        let mut server = Server::new_async().await;
        let status = server
            .mock("GET", "/fal-ai/wizper/requests/req-1/status")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let client = FalClient::new(settings_for(&server)).unwrap();
        let status_url = format!("{}/fal-ai/wizper/requests/req-1/status", server.url());

        let err = client.wait_for_completion(&status_url, &NoProgress).await.unwrap_err();

        assert!(matches!(err, TranscriptionError::Service(ref msg) if msg.contains("500")));
        status.assert_async().await;
    }

    #[test]
    fn test_blank_api_key_is_configuration_error() {
        let err = FalClient::new(FalSettings::new("  ")).err().unwrap();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_parse_output_skips_chunks_without_start() {
        let result = parse_wizper_output(json!({
            "text": "a b",
            "chunks": [
                {"timestamp": [null, 1.0], "text": "a"},
                {"timestamp": [1.0, 2.0], "text": "b"}
            ]
        }))
        .unwrap();
        assert_eq!(result.chunks, vec![TranscriptChunk::new(1.0, 2.0, "b")]);
    }

    #[test]
    fn test_parse_output_closes_open_chunk_at_next_start() {
        let result = parse_wizper_output(json!({
            "text": "a b c",
            "chunks": [
                {"timestamp": [0.0, 1.0], "text": "a"},
                {"timestamp": [1.0, null], "text": "b"},
                {"timestamp": [3.0, 4.0], "text": "c"}
            ]
        }))
        .unwrap();
        assert_eq!(
            result.chunks,
            vec![
                TranscriptChunk::new(0.0, 1.0, "a"),
                TranscriptChunk::new(1.0, 3.0, "b"),
                TranscriptChunk::new(3.0, 4.0, "c"),
            ]
        );
    }

    #[test]
    fn test_parse_output_never_emits_empty_ranges() {
        let result = parse_wizper_output(json!({
            "text": "a b c d",
            "chunks": [
                {"timestamp": [0.0, 0.0], "text": "a"},
                {"timestamp": [0.0, 2.0], "text": "b"},
                {"timestamp": [2.0, 2.0], "text": "c"},
                {"timestamp": [5.0, null], "text": "d"}
            ]
        }))
        .unwrap();

        assert_eq!(result.chunks, vec![TranscriptChunk::new(0.0, 2.0, "b c d")]);
        assert!(result.chunks.iter().all(|c| 0.0 <= c.start && c.start < c.end));
        assert_eq!(result.text, "a b c d");
    }

    #[test]
    fn test_parse_output_single_open_chunk_keeps_text_only() {
        let result = parse_wizper_output(json!({
            "text": "hello",
            "chunks": [{"timestamp": [0.0, null], "text": "hello"}]
        }))
        .unwrap();
        assert!(result.chunks.is_empty());
        assert_eq!(result.text, "hello");
    }
}
