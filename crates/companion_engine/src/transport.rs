use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const UPLOAD_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub documents_endpoint: String,
    pub chat_endpoint: String,
    pub health_endpoint: String,
    pub max_upload_bytes: u64,
    pub max_download_bytes: u64,
    pub allowed_upload_extensions: Vec<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            // Local model generation is slow; keep this generous.
            request_timeout: Duration::from_secs(300),
            documents_endpoint: "/api/documents".to_string(),
            chat_endpoint: "/api/ai/chat".to_string(),
            health_endpoint: "/api/ai/health".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
            max_download_bytes: 64 * 1024 * 1024,
            allowed_upload_extensions: vec!["pdf".to_string(), "docx".to_string(), "doc".to_string()],
        }
    }
}

/// Receives percentage progress from a running transfer.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

/// Sink for callers that do not track progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    InvalidRequest,
    UnsupportedFileType { extension: String },
    HttpStatus(u16),
    Timeout,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Decode,
    Io,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::InvalidRequest => write!(f, "invalid request"),
            FailureKind::UnsupportedFileType { extension } => {
                write!(f, "unsupported file type {extension:?}")
            }
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "payload too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Decode => write!(f, "malformed response"),
            FailureKind::Io => write!(f, "io error"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A document file ready to be posted as multipart form data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub unit_id: Option<u64>,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
            unit_id: None,
        }
    }

    pub fn with_unit(mut self, unit_id: u64) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub async fn from_path(path: &Path) -> Result<Self, TransportError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TransportError::new(FailureKind::InvalidRequest, format!("no file name in {path:?}"))
            })?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| TransportError::new(FailureKind::Io, format!("{path:?}: {err}")))?;
        Ok(Self::new(file_name, bytes))
    }

    fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiHealth {
    pub status: String,
    pub has_phi_model: bool,
    pub message: String,
}

impl AiHealth {
    pub fn is_ready(&self) -> bool {
        self.status == "connected" && self.has_phi_model
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: String,
}

/// The study backend's REST surface used by background tasks.
#[async_trait::async_trait]
pub trait StudyApi: Send + Sync {
    async fn upload(
        &self,
        endpoint: &str,
        upload: UploadRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Value, TransportError>;

    async fn chat(&self, request: &ChatRequest, bearer: Option<&str>) -> Result<Value, TransportError>;

    async fn summarize(&self, document_id: u64) -> Result<Value, TransportError>;

    async fn download(&self, path: &str, progress: &dyn ProgressSink) -> Result<Download, TransportError>;

    async fn health(&self) -> Result<AiHealth, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    settings: TransportSettings,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Resolve an absolute URL or a path relative to the configured base URL.
    fn url(&self, path: &str) -> Result<reqwest::Url, TransportError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.settings.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        reqwest::Url::parse(&raw).map_err(|err| TransportError::new(FailureKind::InvalidUrl, err.to_string()))
    }

    fn check_upload(&self, upload: &UploadRequest) -> Result<(), TransportError> {
        let extension = upload.extension();
        let allowed = &self.settings.allowed_upload_extensions;
        if !allowed.is_empty() && !allowed.iter().any(|ext| ext.eq_ignore_ascii_case(&extension)) {
            return Err(TransportError::new(
                FailureKind::UnsupportedFileType {
                    extension: extension.clone(),
                },
                format!("Unsupported file type. Supported types: {}", allowed.join(", ")),
            ));
        }
        let size = upload.bytes.len() as u64;
        if size > self.settings.max_upload_bytes {
            return Err(TransportError::new(
                FailureKind::TooLarge {
                    max_bytes: self.settings.max_upload_bytes,
                    actual: Some(size),
                },
                "File size exceeds maximum upload limit",
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StudyApi for ReqwestTransport {
    async fn upload(
        &self,
        endpoint: &str,
        upload: UploadRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Value, TransportError> {
        self.check_upload(&upload)?;
        let url = self.url(endpoint)?;

        let total = upload.bytes.len() as u64;
        let mut remaining = Bytes::from(upload.bytes);
        let mut chunks = Vec::with_capacity(remaining.len() / UPLOAD_CHUNK + 1);
        while !remaining.is_empty() {
            let take = remaining.len().min(UPLOAD_CHUNK);
            chunks.push(remaining.split_to(take));
        }

        // Progress follows the body as the client pulls it onto the wire.
        let sent = Arc::new(AtomicU64::new(0));
        let body = futures_util::stream::iter(chunks).map(move |chunk| {
            let len = chunk.len() as u64;
            let done = sent.fetch_add(len, Ordering::Relaxed) + len;
            progress.report(percent(done, total));
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = multipart::Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|err| TransportError::new(FailureKind::InvalidRequest, err.to_string()))?;
        let mut form = multipart::Form::new().part("file", part);
        if let Some(unit_id) = upload.unit_id {
            form = form.text("unitId", unit_id.to_string());
        }

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn chat(&self, request: &ChatRequest, bearer: Option<&str>) -> Result<Value, TransportError> {
        let url = self.url(&self.settings.chat_endpoint)?;
        let mut builder = self.client.post(url).json(request);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await.map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn summarize(&self, document_id: u64) -> Result<Value, TransportError> {
        let path = format!(
            "{}/{document_id}/summary",
            self.settings.documents_endpoint.trim_end_matches('/')
        );
        let url = self.url(&path)?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn download(&self, path: &str, progress: &dyn ProgressSink) -> Result<Download, TransportError> {
        let url = self.url(path)?;
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let max_bytes = self.settings.max_download_bytes;
        let expected = response.content_length();
        if let Some(len) = expected {
            if len > max_bytes {
                return Err(TransportError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(len),
                    },
                    "download too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        progress.report(0);
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(TransportError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "download too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
            if let Some(total) = expected {
                progress.report(percent(bytes.len() as u64, total));
            }
        }
        progress.report(100);

        Ok(Download {
            bytes,
            content_type,
            final_url,
        })
    }

    async fn health(&self) -> Result<AiHealth, TransportError> {
        let url = self.url(&self.settings.health_endpoint)?;
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;
        // The backend reports a disconnected model with 503 and a normal body.
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            return Err(status_error(status, &text));
        }
        serde_json::from_str(&text).map_err(|err| TransportError::new(FailureKind::Decode, err.to_string()))
    }
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}

async fn read_json(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(status_error(status, &text));
    }
    response
        .json::<Value>()
        .await
        .map_err(|err| TransportError::new(FailureKind::Decode, err.to_string()))
}

/// Prefer the backend's `error` text, then its `message`, then the status reason.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    TransportError::new(FailureKind::HttpStatus(status.as_u16()), message)
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return TransportError::new(FailureKind::Decode, err.to_string());
    }
    TransportError::new(FailureKind::Network, err.to_string())
}
