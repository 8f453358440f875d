use serde_json::Value;

use crate::{BackgroundTask, Millis, PageId, PageStates, TaskId};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// A view wrote its whole payload.
    PageStateUpdated {
        page_id: PageId,
        data: Value,
        at: Millis,
    },
    /// A view discarded its cached state.
    PageStateCleared { page_id: PageId },
    /// Logout: forget every page entry and every task.
    AllStatesCleared,
    /// Entries loaded from persisted storage at startup.
    Rehydrated {
        pages: PageStates,
        at: Millis,
        max_age: Millis,
    },
    /// A task was created for a page, still pending.
    TaskRegistered { page_id: PageId, task: BackgroundTask },
    /// The task body is about to run.
    TaskRunning { task_id: TaskId },
    /// Incremental completion reported by the task body.
    TaskProgress { task_id: TaskId, progress: u8 },
    /// The task body resolved.
    TaskSucceeded { task_id: TaskId, output: Value },
    /// The task body failed with something other than cancellation.
    TaskFailed { task_id: TaskId, error: String },
    /// Explicit cancel, or release of a non-persistent task.
    TaskCancelled { task_id: TaskId },
    /// The grace period after a terminal status elapsed.
    TaskExpired { task_id: TaskId },
    /// Fallback for placeholder wiring.
    NoOp,
}
