use crate::{TaskId, TaskStatus};

/// Side effects requested by `update`; executed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Persist page entries once the debounce window settles.
    SchedulePersist,
    /// Persist page entries before returning to the caller.
    PersistNow,
    /// Trigger the task's cancellation token.
    AbortTask { task_id: TaskId },
    /// The task reached a terminal status; notify the caller and remove it after its grace period.
    ScheduleRemoval { task_id: TaskId, status: TaskStatus },
}
