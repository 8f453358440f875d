//! Companion core: pure page-state and background-task state machine.
mod effect;
mod msg;
mod page;
mod state;
mod task;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::Msg;
pub use page::{Millis, PageId, PageKey, PageStateEntry, PageStates, DEFAULT_MAX_AGE_MS};
pub use state::CompanionState;
pub use task::{BackgroundTask, TaskData, TaskId, TaskKind, TaskRegistry, TaskStatus};
pub use update::update;
pub use view_model::PageViewModel;
