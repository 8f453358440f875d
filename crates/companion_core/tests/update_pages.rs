use std::sync::Once;

use companion_core::{
    update, BackgroundTask, CompanionState, Effect, Msg, PageId, PageStateEntry, PageStates, TaskId,
    TaskKind, DEFAULT_MAX_AGE_MS,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const HOUR: u64 = 60 * 60 * 1000;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(companion_logging::initialize_for_tests);
}

fn write(state: CompanionState, page: &str, data: serde_json::Value, at: u64) -> (CompanionState, Vec<Effect>) {
    update(
        state,
        Msg::PageStateUpdated {
            page_id: PageId::from(page),
            data,
            at,
        },
    )
}

#[test]
fn dashboard_counter_keeps_latest_write() {
    init_logging();
    let (state, effects) = write(CompanionState::new(), "dashboard", json!({"counter": 0}), 1_000);
    assert_eq!(effects, vec![Effect::SchedulePersist]);

    let (state, _) = write(state, "dashboard", json!({"counter": 1}), 1_250);
    let entry = state.page_state(&PageId::from("dashboard")).unwrap();
    assert_eq!(
        entry,
        &PageStateEntry {
            data: json!({"counter": 1}),
            last_updated: 1_250,
        }
    );
}

#[test]
fn identical_rewrite_keeps_data_and_advances_timestamp() {
    init_logging();
    let payload = json!({"filter": "due-this-week", "scroll": 240});
    let (state, _) = write(CompanionState::new(), "assignments", payload.clone(), 10);
    let (state, _) = write(state, "assignments", payload.clone(), 20);

    let entry = state.page_state(&PageId::from("assignments")).unwrap();
    assert_eq!(entry.data, payload);
    assert_eq!(entry.last_updated, 20);
}

#[test]
fn pages_are_namespaced() {
    init_logging();
    let (state, _) = write(CompanionState::new(), "planner", json!({"day": "mon"}), 1);
    let (state, _) = write(state, "ai-chat", json!({"draft": "explain borrowing"}), 2);

    assert_eq!(state.pages().len(), 2);
    assert_eq!(
        state.page_state(&PageId::from("planner")).unwrap().data,
        json!({"day": "mon"})
    );
}

#[test]
fn clearing_one_page_persists_immediately() {
    init_logging();
    let (state, _) = write(CompanionState::new(), "planner", json!(1), 1);
    let (state, _) = write(state, "documents", json!(2), 1);

    let (state, effects) = update(
        state,
        Msg::PageStateCleared {
            page_id: PageId::from("planner"),
        },
    );

    assert_eq!(effects, vec![Effect::PersistNow]);
    assert!(state.page_state(&PageId::from("planner")).is_none());
    assert!(state.page_state(&PageId::from("documents")).is_some());
}

#[test]
fn clear_all_drops_pages_and_aborts_every_task() {
    init_logging();
    let (state, _) = write(CompanionState::new(), "documents", json!({"selected": 4}), 1);
    let upload = TaskId::generate(TaskKind::Upload, 1);
    let chat = TaskId::generate(TaskKind::AiGeneration, 2);
    let (state, _) = update(
        state,
        Msg::TaskRegistered {
            page_id: PageId::from("documents"),
            task: BackgroundTask::pending(upload.clone(), TaskKind::Upload, 1, true),
        },
    );
    let (state, _) = update(
        state,
        Msg::TaskRegistered {
            page_id: PageId::from("ai-chat"),
            task: BackgroundTask::pending(chat.clone(), TaskKind::AiGeneration, 1, false),
        },
    );

    let (state, effects) = update(state, Msg::AllStatesCleared);

    assert!(state.pages().is_empty());
    assert!(state.tasks().is_empty());
    assert_eq!(state.page_view(&PageId::from("documents")).entry, None);
    assert_eq!(
        effects,
        vec![
            Effect::AbortTask { task_id: chat },
            Effect::AbortTask { task_id: upload },
            Effect::PersistNow,
        ]
    );
}

#[test]
fn rehydration_keeps_only_entries_younger_than_a_day() {
    init_logging();
    let now = 1_000 * HOUR;
    let pages: PageStates = [
        (
            PageId::from("stale-form"),
            PageStateEntry {
                data: json!({"title": "half written"}),
                last_updated: now - 25 * HOUR,
            },
        ),
        (
            PageId::from("dashboard"),
            PageStateEntry {
                data: json!({"counter": 3}),
                last_updated: now - 23 * HOUR,
            },
        ),
    ]
    .into_iter()
    .collect();

    let (state, effects) = update(
        CompanionState::new(),
        Msg::Rehydrated {
            pages,
            at: now,
            max_age: DEFAULT_MAX_AGE_MS,
        },
    );

    assert!(effects.is_empty());
    assert!(state.page_state(&PageId::from("stale-form")).is_none());
    assert_eq!(
        state.page_state(&PageId::from("dashboard")).unwrap().data,
        json!({"counter": 3})
    );
}
