use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::{Millis, PageId};

/// Generated task identifier, unique within one tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate(kind: TaskKind, sequence: u64) -> Self {
        Self(format!("{}-{sequence}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Upload,
    AiGeneration,
    Processing,
    Download,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Upload => "upload",
            TaskKind::AiGeneration => "ai_generation",
            TaskKind::Processing => "processing",
            TaskKind::Download => "download",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskData {
    Output(Value),
    Error(String),
}

impl TaskData {
    pub fn output(&self) -> Option<&Value> {
        match self {
            TaskData::Output(value) => Some(value),
            TaskData::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TaskData::Output(_) => None,
            TaskData::Error(message) => Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub data: Option<TaskData>,
    pub start_time: Millis,
    pub persist_on_navigation: bool,
}

impl BackgroundTask {
    /// A freshly registered task, before its body has started.
    pub fn pending(id: TaskId, kind: TaskKind, start_time: Millis, persist_on_navigation: bool) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Pending,
            progress: None,
            data: None,
            start_time,
            persist_on_navigation,
        }
    }
}

/// Task lists, one per page id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRegistry {
    lists: BTreeMap<PageId, Vec<BackgroundTask>>,
}

impl TaskRegistry {
    pub fn insert(&mut self, page_id: PageId, task: BackgroundTask) {
        self.lists.entry(page_id).or_default().push(task);
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&BackgroundTask> {
        self.lists
            .values()
            .flat_map(|tasks| tasks.iter())
            .find(|task| &task.id == task_id)
    }

    pub(crate) fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut BackgroundTask> {
        self.lists
            .values_mut()
            .flat_map(|tasks| tasks.iter_mut())
            .find(|task| &task.id == task_id)
    }

    pub fn remove(&mut self, task_id: &TaskId) -> Option<BackgroundTask> {
        let mut emptied = None;
        let mut removed = None;
        for (page_id, tasks) in self.lists.iter_mut() {
            if let Some(index) = tasks.iter().position(|task| &task.id == task_id) {
                removed = Some(tasks.remove(index));
                if tasks.is_empty() {
                    emptied = Some(page_id.clone());
                }
                break;
            }
        }
        if let Some(page_id) = emptied {
            self.lists.remove(&page_id);
        }
        removed
    }

    pub fn tasks(&self, page_id: &PageId) -> &[BackgroundTask] {
        self.lists.get(page_id).map_or(&[], Vec::as_slice)
    }

    pub fn active(&self, page_id: &PageId) -> Vec<BackgroundTask> {
        self.filtered(page_id, TaskStatus::is_active)
    }

    pub fn completed(&self, page_id: &PageId) -> Vec<BackgroundTask> {
        self.filtered(page_id, TaskStatus::is_terminal)
    }

    /// Empty every list, returning the ids that were registered.
    pub fn drain_ids(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.lists)
            .into_values()
            .flatten()
            .map(|task| task.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    fn filtered(&self, page_id: &PageId, keep: fn(TaskStatus) -> bool) -> Vec<BackgroundTask> {
        self.tasks(page_id)
            .iter()
            .filter(|task| keep(task.status))
            .cloned()
            .collect()
    }
}
