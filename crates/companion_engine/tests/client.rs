use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use companion_core::{TaskData, TaskId, TaskKind, TaskStatus};
use companion_engine::{
    AiHealth, ChatRequest, ClientSettings, Download, DownloadTarget, KeyValueStorage, ManualClock,
    MemoryStorage, PageStateStore, ProgressSink, StoreSettings, StudyApi, StudyClient,
    TaskOptions, TaskSettings, TaskTracker, TransportError, UploadRequest,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::runtime::Handle;

#[derive(Default)]
struct FakeApi {
    calls: Mutex<Vec<String>>,
    hang_downloads: bool,
}

impl FakeApi {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StudyApi for FakeApi {
    async fn upload(
        &self,
        endpoint: &str,
        upload: UploadRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Value, TransportError> {
        self.record(format!("upload {endpoint} {} {:?}", upload.file_name, upload.unit_id));
        progress.report(50);
        Ok(json!({ "id": 1, "name": upload.file_name, "size": upload.bytes.len() }))
    }

    async fn chat(&self, request: &ChatRequest, bearer: Option<&str>) -> Result<Value, TransportError> {
        self.record(format!("chat {} {} {:?}", request.message, request.session_id, bearer));
        Ok(json!({ "response": "Cell division." }))
    }

    async fn summarize(&self, document_id: u64) -> Result<Value, TransportError> {
        self.record(format!("summarize {document_id}"));
        Ok(json!({ "summary": "short" }))
    }

    async fn download(&self, path: &str, progress: &dyn ProgressSink) -> Result<Download, TransportError> {
        self.record(format!("download {path}"));
        if self.hang_downloads {
            std::future::pending::<()>().await;
        }
        progress.report(100);
        Ok(Download {
            bytes: b"%PDF-1.7".to_vec(),
            content_type: Some("application/pdf".to_string()),
            final_url: path.to_string(),
        })
    }

    async fn health(&self) -> Result<AiHealth, TransportError> {
        Ok(AiHealth {
            status: "connected".to_string(),
            has_phi_model: true,
            message: "AI service ready".to_string(),
        })
    }
}

struct Harness {
    api: Arc<FakeApi>,
    auth: Arc<MemoryStorage>,
    tracker: TaskTracker,
    client: StudyClient,
}

fn harness(api: FakeApi) -> Harness {
    companion_logging::initialize_for_tests();
    let api = Arc::new(api);
    let auth = Arc::new(MemoryStorage::new());
    let store = PageStateStore::open(
        Arc::new(MemoryStorage::new()),
        Arc::new(ManualClock::new(0)),
        StoreSettings::default(),
    );
    let tracker = TaskTracker::new(store, TaskSettings::default(), Handle::current());
    let client = StudyClient::new(api.clone(), auth.clone(), ClientSettings::default());
    Harness {
        api,
        auth,
        tracker,
        client,
    }
}

async fn wait_until_settled(tracker: &TaskTracker, id: &TaskId) {
    for _ in 0..200 {
        match tracker.task(id) {
            Some(task) if task.status.is_terminal() => return,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("task {id} did not settle");
}

#[tokio::test]
async fn assistant_questions_carry_the_stored_token() {
    let h = harness(FakeApi::default());
    h.client.login("abc123").unwrap();
    assert!(h.client.is_logged_in());

    let scope = h.tracker.scope("ai-chat");
    let id = h
        .client
        .ask_assistant(&scope, "What is mitosis?", "s-1", TaskOptions::new());
    wait_until_settled(&h.tracker, &id).await;

    let task = h.tracker.task(&id).unwrap();
    assert_eq!(task.kind, TaskKind::AiGeneration);
    assert_eq!(
        task.data,
        Some(TaskData::Output(json!({ "response": "Cell division." })))
    );
    assert_eq!(
        h.api.calls(),
        vec![r#"chat What is mitosis? s-1 Some("abc123")"#.to_string()]
    );
}

#[tokio::test]
async fn assistant_questions_without_login_send_no_token() {
    let h = harness(FakeApi::default());
    let scope = h.tracker.scope("ai-chat");
    let id = h.client.ask_assistant(&scope, "hi", "s-2", TaskOptions::new());
    wait_until_settled(&h.tracker, &id).await;

    assert_eq!(h.api.calls(), vec!["chat hi s-2 None".to_string()]);
}

#[tokio::test]
async fn upload_reads_the_file_and_tracks_progress() {
    let h = harness(FakeApi::default());
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("notes.pdf");
    std::fs::write(&file, b"%PDF-1.7 lecture").unwrap();

    let scope = h.tracker.scope("documents");
    let id = h
        .client
        .upload_document(&scope, file, Some(4), TaskOptions::new().persist_on_navigation(true));
    wait_until_settled(&h.tracker, &id).await;

    let task = h.tracker.task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.persist_on_navigation);
    assert_eq!(
        task.data.as_ref().and_then(TaskData::output),
        Some(&json!({ "id": 1, "name": "notes.pdf", "size": 16 }))
    );
    assert_eq!(h.api.calls(), vec!["upload /api/documents notes.pdf Some(4)".to_string()]);
}

#[tokio::test]
async fn upload_of_a_missing_file_fails_the_task() {
    let h = harness(FakeApi::default());
    let dir = TempDir::new().unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();

    let scope = h.tracker.scope("documents");
    let id = h.client.upload_document(
        &scope,
        dir.path().join("missing.pdf"),
        None,
        TaskOptions::new().on_error(move |error| seen.lock().unwrap().push(error)),
    );
    wait_until_settled(&h.tracker, &id).await;

    assert_eq!(h.tracker.task(&id).unwrap().status, TaskStatus::Failed);
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(errors.lock().unwrap()[0].contains("missing.pdf"));
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn summaries_run_as_processing_tasks() {
    let h = harness(FakeApi::default());
    let scope = h.tracker.scope("documents");
    let id = h.client.summarize_document(&scope, 9, TaskOptions::new());
    wait_until_settled(&h.tracker, &id).await;

    let task = h.tracker.task(&id).unwrap();
    assert_eq!(task.kind, TaskKind::Processing);
    assert_eq!(h.api.calls(), vec!["summarize 9".to_string()]);
}

#[tokio::test]
async fn downloads_are_saved_into_the_target_directory() {
    let h = harness(FakeApi::default());
    let dir = TempDir::new().unwrap();

    let scope = h.tracker.scope("documents");
    let id = h.client.download_document(
        &scope,
        DownloadTarget {
            remote_path: "/api/documents/3/download".to_string(),
            dir: dir.path().to_path_buf(),
            file_name: Some("notes.pdf".to_string()),
        },
        TaskOptions::new(),
    );
    wait_until_settled(&h.tracker, &id).await;

    let saved = dir.path().join("notes.pdf");
    assert_eq!(std::fs::read(&saved).unwrap(), b"%PDF-1.7");
    let task = h.tracker.task(&id).unwrap();
    assert_eq!(task.kind, TaskKind::Download);
    assert_eq!(
        task.data.as_ref().and_then(TaskData::output),
        Some(&json!({ "path": saved.display().to_string(), "bytes": 8 }))
    );
}

#[tokio::test]
async fn logout_clears_states_tasks_and_token() {
    let h = harness(FakeApi {
        hang_downloads: true,
        ..FakeApi::default()
    });
    let dir = TempDir::new().unwrap();
    h.client.login("abc123").unwrap();
    h.tracker
        .store()
        .update_page_state("dashboard", json!({ "counter": 3 }));

    let scope = h.tracker.scope("documents");
    let id = h.client.download_document(
        &scope,
        DownloadTarget {
            remote_path: "/files/big.pdf".to_string(),
            dir: dir.path().to_path_buf(),
            file_name: None,
        },
        TaskOptions::new().persist_on_navigation(true),
    );
    assert!(h.tracker.task(&id).unwrap().status.is_active());

    h.client.logout(h.tracker.store()).unwrap();

    assert_eq!(h.tracker.task(&id), None);
    assert_eq!(h.tracker.store().get_page_state("dashboard"), None);
    assert_eq!(h.auth.get_item("token").unwrap(), None);
    assert!(!h.client.is_logged_in());
    assert!(!dir.path().join("big.pdf").exists());
}

#[tokio::test]
async fn health_is_a_plain_call() {
    let h = harness(FakeApi::default());
    assert!(h.client.ai_health().await.unwrap().is_ready());
}
