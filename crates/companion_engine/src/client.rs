use std::path::PathBuf;
use std::sync::Arc;

use companion_core::{TaskId, TaskKind};
use companion_logging::{companion_info, companion_warn};
use serde_json::json;

use crate::filename::download_filename;
use crate::persist::AtomicFileWriter;
use crate::storage::{KeyValueStorage, StorageError};
use crate::store::PageStateStore;
use crate::tracker::{TaskError, TaskOptions, TaskScope};
use crate::transport::{AiHealth, ChatRequest, StudyApi, TransportError, UploadRequest};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Storage key of the session token sent as a bearer credential.
    pub auth_token_key: String,
    pub upload_endpoint: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            auth_token_key: "token".to_string(),
            upload_endpoint: "/api/documents".to_string(),
        }
    }
}

/// Where a downloaded document should land.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub remote_path: String,
    pub dir: PathBuf,
    pub file_name: Option<String>,
}

/// Study operations, each run as a tracked background task.
#[derive(Clone)]
pub struct StudyClient {
    api: Arc<dyn StudyApi>,
    auth: Arc<dyn KeyValueStorage>,
    settings: ClientSettings,
}

impl StudyClient {
    pub fn new(api: Arc<dyn StudyApi>, auth: Arc<dyn KeyValueStorage>, settings: ClientSettings) -> Self {
        Self { api, auth, settings }
    }

    /// Upload a file from disk. Resolves with the server's document JSON.
    pub fn upload_document(
        &self,
        scope: &TaskScope,
        path: PathBuf,
        unit_id: Option<u64>,
        options: TaskOptions,
    ) -> TaskId {
        let api = Arc::clone(&self.api);
        let endpoint = self.settings.upload_endpoint.clone();
        scope.start_task(TaskKind::Upload, options, move |ctx| async move {
            let mut upload = UploadRequest::from_path(&path).await?;
            if let Some(unit_id) = unit_id {
                upload = upload.with_unit(unit_id);
            }
            companion_info!("Uploading {} ({} bytes)", upload.file_name, upload.bytes.len());
            Ok::<_, TaskError>(api.upload(&endpoint, upload, Arc::new(ctx)).await?)
        })
    }

    /// Ask the study assistant. The stored session token, if any, is sent as
    /// a bearer credential.
    pub fn ask_assistant(
        &self,
        scope: &TaskScope,
        message: impl Into<String>,
        session_id: impl Into<String>,
        options: TaskOptions,
    ) -> TaskId {
        let api = Arc::clone(&self.api);
        let token = self.auth_token();
        let request = ChatRequest {
            message: message.into(),
            session_id: session_id.into(),
        };
        scope.start_task(TaskKind::AiGeneration, options, move |_ctx| async move {
            Ok::<_, TaskError>(api.chat(&request, token.as_deref()).await?)
        })
    }

    pub fn summarize_document(&self, scope: &TaskScope, document_id: u64, options: TaskOptions) -> TaskId {
        let api = Arc::clone(&self.api);
        scope.start_task(TaskKind::Processing, options, move |_ctx| async move {
            Ok::<_, TaskError>(api.summarize(document_id).await?)
        })
    }

    /// Download into `target.dir`. Resolves with `{ "path", "bytes" }`.
    pub fn download_document(&self, scope: &TaskScope, target: DownloadTarget, options: TaskOptions) -> TaskId {
        let api = Arc::clone(&self.api);
        scope.start_task(TaskKind::Download, options, move |ctx| async move {
            let download = api.download(&target.remote_path, &ctx).await?;
            let name = download_filename(target.file_name.as_deref(), &target.remote_path);
            let writer = AtomicFileWriter::new(target.dir);
            let path = writer
                .write(&name, &download.bytes)
                .map_err(|err| TaskError::failed(format!("failed to save {name}: {err}")))?;
            companion_info!("Saved {} bytes to {}", download.bytes.len(), path.display());
            Ok::<_, TaskError>(json!({
                "path": path.display().to_string(),
                "bytes": download.bytes.len(),
            }))
        })
    }

    pub async fn ai_health(&self) -> Result<AiHealth, TransportError> {
        self.api.health().await
    }

    pub fn login(&self, token: &str) -> Result<(), StorageError> {
        self.auth.set_item(&self.settings.auth_token_key, token)
    }

    /// Clear every page state and task, then forget the session token.
    pub fn logout(&self, store: &PageStateStore) -> Result<(), StorageError> {
        store.clear_all_states();
        self.auth.remove_item(&self.settings.auth_token_key)
    }

    pub fn is_logged_in(&self) -> bool {
        self.auth_token().is_some()
    }

    fn auth_token(&self) -> Option<String> {
        match self.auth.get_item(&self.settings.auth_token_key) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(err) => {
                companion_warn!("Could not read the session token: {}", err);
                None
            }
        }
    }
}
