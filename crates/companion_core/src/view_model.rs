use crate::{BackgroundTask, PageId, PageStateEntry};

/// Read-only snapshot of one page: its cached entry and its task lists.
#[derive(Debug, Clone, PartialEq)]
pub struct PageViewModel {
    pub page_id: PageId,
    pub entry: Option<PageStateEntry>,
    /// Tasks that are pending or running.
    pub active_tasks: Vec<BackgroundTask>,
    /// Tasks that completed or failed and are still inside their grace period.
    pub completed_tasks: Vec<BackgroundTask>,
}

impl PageViewModel {
    pub fn is_busy(&self) -> bool {
        !self.active_tasks.is_empty()
    }
}
