use serde_json::Value;

use crate::view_model::PageViewModel;
use crate::{
    BackgroundTask, Millis, PageId, PageStateEntry, PageStates, TaskData, TaskId, TaskRegistry,
    TaskStatus,
};

/// Everything the client caches: page entries plus the background task lists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompanionState {
    pages: PageStates,
    tasks: TaskRegistry,
}

impl CompanionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> &PageStates {
        &self.pages
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn page_state(&self, page_id: &PageId) -> Option<&PageStateEntry> {
        self.pages.get(page_id)
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&BackgroundTask> {
        self.tasks.get(task_id)
    }

    /// Copy of everything one view may read about its page.
    pub fn page_view(&self, page_id: &PageId) -> PageViewModel {
        PageViewModel {
            page_id: page_id.clone(),
            entry: self.pages.get(page_id).cloned(),
            active_tasks: self.tasks.active(page_id),
            completed_tasks: self.tasks.completed(page_id),
        }
    }

    pub(crate) fn write_page(&mut self, page_id: PageId, data: Value, at: Millis) {
        self.pages.upsert(page_id, data, at);
    }

    pub(crate) fn clear_page(&mut self, page_id: &PageId) -> bool {
        self.pages.remove(page_id).is_some()
    }

    /// Forget everything, returning the ids of the tasks that were dropped.
    pub(crate) fn clear_all(&mut self) -> Vec<TaskId> {
        self.pages.clear();
        self.tasks.drain_ids()
    }

    pub(crate) fn rehydrate(&mut self, mut pages: PageStates, at: Millis, max_age: Millis) -> usize {
        let dropped = pages.retain_fresh(at, max_age);
        self.pages = pages;
        dropped
    }

    pub(crate) fn register_task(&mut self, page_id: PageId, task: BackgroundTask) {
        self.tasks.insert(page_id, task);
    }

    pub(crate) fn mark_running(&mut self, task_id: &TaskId) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_progress(&mut self, task_id: &TaskId, progress: u8) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(task) if task.status.is_active() => {
                task.progress = Some(progress);
                true
            }
            _ => false,
        }
    }

    /// Move an active task to a terminal status. Terminal tasks never move again.
    pub(crate) fn settle(&mut self, task_id: &TaskId, status: TaskStatus, data: TaskData) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(task) if task.status.is_active() => {
                if status == TaskStatus::Completed {
                    task.progress = Some(100);
                }
                task.status = status;
                task.data = Some(data);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove_task(&mut self, task_id: &TaskId) -> Option<BackgroundTask> {
        self.tasks.remove(task_id)
    }
}
