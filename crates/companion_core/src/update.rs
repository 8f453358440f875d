use crate::{CompanionState, Effect, Msg, TaskData, TaskStatus};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: CompanionState, msg: Msg) -> (CompanionState, Vec<Effect>) {
    let effects = match msg {
        Msg::PageStateUpdated { page_id, data, at } => {
            state.write_page(page_id, data, at);
            vec![Effect::SchedulePersist]
        }
        Msg::PageStateCleared { page_id } => {
            // Persisted whether or not an entry existed.
            state.clear_page(&page_id);
            vec![Effect::PersistNow]
        }
        Msg::AllStatesCleared => {
            let dropped = state.clear_all();
            let mut effects = Vec::with_capacity(dropped.len() + 1);
            for task_id in dropped {
                effects.push(Effect::AbortTask { task_id });
            }
            effects.push(Effect::PersistNow);
            effects
        }
        Msg::Rehydrated { pages, at, max_age } => {
            state.rehydrate(pages, at, max_age);
            Vec::new()
        }
        Msg::TaskRegistered { page_id, task } => {
            state.register_task(page_id, task);
            Vec::new()
        }
        Msg::TaskRunning { task_id } => {
            state.mark_running(&task_id);
            Vec::new()
        }
        Msg::TaskProgress { task_id, progress } => {
            state.set_progress(&task_id, progress);
            Vec::new()
        }
        Msg::TaskSucceeded { task_id, output } => {
            if state.settle(&task_id, TaskStatus::Completed, TaskData::Output(output)) {
                vec![Effect::ScheduleRemoval {
                    task_id,
                    status: TaskStatus::Completed,
                }]
            } else {
                Vec::new()
            }
        }
        Msg::TaskFailed { task_id, error } => {
            if state.settle(&task_id, TaskStatus::Failed, TaskData::Error(error)) {
                vec![Effect::ScheduleRemoval {
                    task_id,
                    status: TaskStatus::Failed,
                }]
            } else {
                Vec::new()
            }
        }
        Msg::TaskCancelled { task_id } => {
            state.remove_task(&task_id);
            vec![Effect::AbortTask { task_id }]
        }
        Msg::TaskExpired { task_id } => {
            if state.task(&task_id).is_some_and(|task| task.status.is_terminal()) {
                state.remove_task(&task_id);
            }
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
