use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use companion_core::{BackgroundTask, Effect, Msg, PageId, TaskId, TaskKind, TaskStatus};
use companion_logging::{companion_debug, companion_error, companion_info, companion_warn};
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::store::PageStateStore;
use crate::transport::{ProgressSink, TransportError};

#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// How long a completed task stays visible.
    pub success_grace: Duration,
    /// How long a failed task stays visible.
    pub failure_grace: Duration,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            success_grace: Duration::from_secs(5),
            failure_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

impl From<TransportError> for TaskError {
    fn from(err: TransportError) -> Self {
        TaskError::Failed(err.to_string())
    }
}

pub type CompleteCallback = Box<dyn FnOnce(Value) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(String) + Send>;

#[derive(Default)]
pub struct TaskOptions {
    persist_on_navigation: bool,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the task running after the scope that started it is released.
    pub fn persist_on_navigation(mut self, persist: bool) -> Self {
        self.persist_on_navigation = persist;
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce(Value) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("persist_on_navigation", &self.persist_on_navigation)
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Handed to every task body: its id, its cancellation token and a progress reporter.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    store: PageStateStore,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report_progress(&self, progress: u8) {
        self.store.dispatch(Msg::TaskProgress {
            task_id: self.task_id.clone(),
            progress,
        });
    }
}

impl ProgressSink for TaskContext {
    fn report(&self, percent: u8) {
        self.report_progress(percent);
    }
}

/// Runs background tasks on a tokio runtime and records their lifecycle in
/// the store's task registry.
#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    store: PageStateStore,
    settings: TaskSettings,
    runtime: Handle,
    next_sequence: AtomicU64,
}

impl TaskTracker {
    pub fn new(store: PageStateStore, settings: TaskSettings, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                store,
                settings,
                runtime,
                next_sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &PageStateStore {
        &self.inner.store
    }

    /// Handle for one mounted view of `page_id`.
    pub fn scope(&self, page_id: impl Into<PageId>) -> TaskScope {
        TaskScope {
            tracker: self.clone(),
            page_id: page_id.into(),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Register a task for `page_id` and spawn its body. Returns immediately.
    pub fn start_task<F, Fut>(
        &self,
        page_id: impl Into<PageId>,
        kind: TaskKind,
        options: TaskOptions,
        task_fn: F,
    ) -> TaskId
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        let page_id = page_id.into();
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let task_id = TaskId::generate(kind, sequence);
        let store = &self.inner.store;
        let cancel = CancellationToken::new();

        store.register_abort(task_id.clone(), cancel.clone());
        store.dispatch(Msg::TaskRegistered {
            page_id: page_id.clone(),
            task: BackgroundTask::pending(
                task_id.clone(),
                kind,
                store.now(),
                options.persist_on_navigation,
            ),
        });
        store.dispatch(Msg::TaskRunning {
            task_id: task_id.clone(),
        });
        companion_info!("Started {} task {} for page {}", kind, task_id, page_id);

        let work = task_fn(TaskContext {
            task_id: task_id.clone(),
            store: store.clone(),
            cancel: cancel.clone(),
        });
        let TaskOptions {
            on_complete,
            on_error,
            ..
        } = options;
        let tracker = self.clone();
        let id = task_id.clone();
        self.inner.runtime.spawn(async move {
            // A panicking body settles as a failure instead of staying running.
            let guarded = AssertUnwindSafe(work).catch_unwind();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TaskError::Cancelled),
                result = guarded => result.unwrap_or_else(|payload| {
                    let message = format!("task panicked: {}", panic_message(payload.as_ref()));
                    companion_error!("Task {} {}", id, message);
                    Err(TaskError::Failed(message))
                }),
            };
            tracker.settle(id, outcome, on_complete, on_error);
        });

        task_id
    }

    pub fn task(&self, task_id: &TaskId) -> Option<BackgroundTask> {
        self.inner.store.task(task_id)
    }

    /// Record progress; values are stored as given.
    pub fn update_task_progress(&self, task_id: &TaskId, progress: u8) {
        self.inner.store.dispatch(Msg::TaskProgress {
            task_id: task_id.clone(),
            progress,
        });
    }

    /// Abort the task and drop it from the registry right away.
    pub fn cancel_task(&self, task_id: &TaskId) {
        companion_debug!("Cancelling task {}", task_id);
        self.inner.store.dispatch(Msg::TaskCancelled {
            task_id: task_id.clone(),
        });
    }

    pub fn active_tasks(&self, page_id: impl Into<PageId>) -> Vec<BackgroundTask> {
        self.inner.store.page_view(page_id).active_tasks
    }

    pub fn completed_tasks(&self, page_id: impl Into<PageId>) -> Vec<BackgroundTask> {
        self.inner.store.page_view(page_id).completed_tasks
    }

    fn settle(
        &self,
        task_id: TaskId,
        outcome: Result<Value, TaskError>,
        on_complete: Option<CompleteCallback>,
        on_error: Option<ErrorCallback>,
    ) {
        let store = &self.inner.store;
        store.forget_abort(&task_id);
        match outcome {
            Ok(output) => {
                let effects = store.dispatch(Msg::TaskSucceeded {
                    task_id: task_id.clone(),
                    output: output.clone(),
                });
                if self.schedule_removals(effects) {
                    companion_info!("Task {} completed", task_id);
                    if let Some(callback) = on_complete {
                        callback(output);
                    }
                }
            }
            Err(TaskError::Cancelled) => {
                companion_debug!("Task {} ended by cancellation", task_id);
                store.dispatch(Msg::TaskCancelled { task_id });
            }
            Err(TaskError::Failed(error)) => {
                let effects = store.dispatch(Msg::TaskFailed {
                    task_id: task_id.clone(),
                    error: error.clone(),
                });
                if self.schedule_removals(effects) {
                    companion_warn!("Task {} failed: {}", task_id, error);
                    if let Some(callback) = on_error {
                        callback(error);
                    }
                }
            }
        }
    }

    /// Spawn grace-period timers. Returns whether the task actually settled.
    fn schedule_removals(&self, effects: Vec<Effect>) -> bool {
        let mut settled = false;
        for effect in effects {
            if let Effect::ScheduleRemoval { task_id, status } = effect {
                settled = true;
                let grace = match status {
                    TaskStatus::Failed => self.inner.settings.failure_grace,
                    _ => self.inner.settings.success_grace,
                };
                let store = self.inner.store.clone();
                self.inner.runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    store.dispatch(Msg::TaskExpired { task_id });
                });
            }
        }
        settled
    }
}

/// The tasks one mounted view started for its page.
///
/// Dropping the scope is the unmount: every task it started that is still
/// active and was not flagged `persist_on_navigation` is cancelled. Flagged
/// tasks keep running and keep updating the shared registry.
pub struct TaskScope {
    tracker: TaskTracker,
    page_id: PageId,
    started: Mutex<Vec<TaskId>>,
}

impl TaskScope {
    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn start_task<F, Fut>(&self, kind: TaskKind, options: TaskOptions, task_fn: F) -> TaskId
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        let task_id = self
            .tracker
            .start_task(self.page_id.clone(), kind, options, task_fn);
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        // Ids that already left the registry have nothing left to cancel.
        started.retain(|id| self.tracker.task(id).is_some());
        started.push(task_id.clone());
        task_id
    }

    pub fn update_task_progress(&self, task_id: &TaskId, progress: u8) {
        self.tracker.update_task_progress(task_id, progress);
    }

    pub fn cancel_task(&self, task_id: &TaskId) {
        self.tracker.cancel_task(task_id);
    }

    pub fn active_tasks(&self) -> Vec<BackgroundTask> {
        self.tracker.active_tasks(&self.page_id)
    }

    pub fn completed_tasks(&self) -> Vec<BackgroundTask> {
        self.tracker.completed_tasks(&self.page_id)
    }

    /// Unmount explicitly; same as dropping the scope.
    pub fn release(self) {}
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        let started = std::mem::take(
            &mut *self.started.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task_id in started {
            match self.tracker.task(&task_id) {
                Some(task) if task.status.is_active() && !task.persist_on_navigation => {
                    self.tracker.cancel_task(&task_id);
                }
                _ => {}
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "unknown panic"
    }
}
