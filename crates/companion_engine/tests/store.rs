use std::sync::Arc;
use std::time::Duration;

use companion_core::{PageKey, PageStateEntry};
use companion_engine::{
    DisabledStorage, KeyValueStorage, ManualClock, MemoryStorage, PageStateStore, StoreSettings,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const KEY: &str = "page-state-storage";
const HOUR_MS: u64 = 60 * 60 * 1000;
const START: u64 = 1_700_000_000_000;

fn open(storage: Arc<dyn KeyValueStorage>, clock: Arc<ManualClock>) -> PageStateStore {
    companion_logging::initialize_for_tests();
    PageStateStore::open(storage, clock, StoreSettings::default())
}

fn persisted(storage: &MemoryStorage) -> Option<Value> {
    storage
        .get_item(KEY)
        .unwrap()
        .map(|text| serde_json::from_str(&text).unwrap())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DashboardState {
    counter: u32,
    last_action: String,
}

#[test]
fn updates_are_visible_immediately_and_persisted_once_after_the_debounce() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(START));
    let store = open(storage.clone(), clock.clone());

    for counter in 1..=3 {
        store.update_page_state("dashboard", json!({ "counter": counter }));
        assert_eq!(store.get_page_state("dashboard").unwrap().data["counter"], counter);
        clock.advance(Duration::from_millis(400));
    }
    assert!(store.has_pending_write());
    assert_eq!(persisted(&storage), None);

    // Deadline is one second after the last update, which was 400ms ago.
    clock.advance(Duration::from_millis(599));
    assert!(!store.tick());
    clock.advance(Duration::from_millis(1));
    assert!(store.tick());
    assert!(!store.tick());

    let blob = persisted(&storage).unwrap();
    assert_eq!(blob["dashboard"]["data"], json!({ "counter": 3 }));
    assert_eq!(blob["dashboard"]["lastUpdated"], json!(START + 800));
}

#[test]
fn flush_writes_pending_state_right_away() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(START));
    let store = open(storage.clone(), clock);

    assert!(!store.flush());
    store.update_page_state("documents", json!({ "filter": "pdf" }));
    assert!(store.flush());
    assert!(!store.has_pending_write());
    assert_eq!(persisted(&storage).unwrap()["documents"]["data"]["filter"], "pdf");
}

#[test]
fn clearing_one_page_persists_without_waiting() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(START));
    let store = open(storage.clone(), clock);

    store.update_page_state("dashboard", json!({ "counter": 1 }));
    store.update_page_state("flashcards", json!({ "deck": 4 }));
    store.clear_page_state("dashboard");

    assert_eq!(store.get_page_state("dashboard"), None);
    assert!(!store.has_pending_write());
    let blob = persisted(&storage).unwrap();
    assert!(blob.get("dashboard").is_none());
    assert_eq!(blob["flashcards"]["data"]["deck"], 4);
}

#[test]
fn clearing_a_missing_page_still_persists() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open(storage.clone(), Arc::new(ManualClock::new(START)));

    store.clear_page_state("never-written");
    assert_eq!(persisted(&storage), Some(json!({})));
}

#[test]
fn clear_all_persists_an_empty_map() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open(storage.clone(), Arc::new(ManualClock::new(START)));

    store.update_page_state("dashboard", json!({ "counter": 2 }));
    store.update_page_state("ai-chat", json!({ "messages": [] }));
    store.clear_all_states();

    assert_eq!(store.get_page_state("dashboard"), None);
    assert_eq!(store.get_page_state("ai-chat"), None);
    assert_eq!(persisted(&storage), Some(json!({})));
}

#[test]
fn rehydration_drops_entries_older_than_a_day() {
    let storage = Arc::new(MemoryStorage::new());
    let now = START + 48 * HOUR_MS;
    let seeded = json!({
        "stale": { "data": { "counter": 1 }, "lastUpdated": now - 25 * HOUR_MS },
        "fresh": { "data": { "counter": 2 }, "lastUpdated": now - 23 * HOUR_MS },
    });
    storage.set_item(KEY, &seeded.to_string()).unwrap();

    let store = open(storage, Arc::new(ManualClock::new(now)));

    assert_eq!(store.get_page_state("stale"), None);
    assert_eq!(
        store.get_page_state("fresh"),
        Some(PageStateEntry {
            data: json!({ "counter": 2 }),
            last_updated: now - 23 * HOUR_MS,
        })
    );
}

#[test]
fn corrupt_blob_starts_empty_and_recovers_on_next_write() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(KEY, "{not json").unwrap();

    let store = open(storage.clone(), Arc::new(ManualClock::new(START)));
    assert_eq!(store.get_page_state("dashboard"), None);

    store.update_page_state("dashboard", json!({ "counter": 1 }));
    assert!(store.flush());
    assert_eq!(persisted(&storage).unwrap()["dashboard"]["data"]["counter"], 1);
}

#[test]
fn unavailable_storage_keeps_state_in_memory() {
    let store = open(Arc::new(DisabledStorage), Arc::new(ManualClock::new(START)));

    store.update_page_state("dashboard", json!({ "counter": 5 }));
    assert!(!store.flush());
    store.clear_page_state("other");
    assert_eq!(store.get_page_state("dashboard").unwrap().data["counter"], 5);
}

#[test]
fn quota_errors_do_not_lose_in_memory_state() {
    let storage = Arc::new(MemoryStorage::with_quota(16));
    let store = open(storage.clone(), Arc::new(ManualClock::new(START)));

    store.update_page_state("documents", json!({ "notes": "x".repeat(64) }));
    assert!(!store.flush());
    assert_eq!(persisted(&storage), None);
    assert!(store.get_page_state("documents").is_some());
}

#[test]
fn typed_keys_read_back_their_payload() {
    let store = open(Arc::new(MemoryStorage::new()), Arc::new(ManualClock::new(START)));
    let key: PageKey<DashboardState> = PageKey::new("dashboard");
    let state = DashboardState {
        counter: 7,
        last_action: "increment".to_string(),
    };

    store.update(&key, &state);
    let entry = store.get(&key).unwrap();
    assert_eq!(entry.data, state);
    assert_eq!(entry.last_updated, START);

    let wrong: PageKey<Vec<u8>> = PageKey::new("dashboard");
    assert_eq!(store.get(&wrong), None);
}

#[test]
fn pages_are_namespaced() {
    let store = open(Arc::new(MemoryStorage::new()), Arc::new(ManualClock::new(START)));

    store.update_page_state("dashboard", json!({ "counter": 1 }));
    store.update_page_state("ai-chat", json!({ "draft": "hi" }));
    store.update_page_state("dashboard", json!({ "counter": 2 }));

    assert_eq!(store.get_page_state("ai-chat").unwrap().data, json!({ "draft": "hi" }));
    assert_eq!(store.get_page_state("dashboard").unwrap().data, json!({ "counter": 2 }));
}

#[test]
fn state_survives_reopening_the_same_storage() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(START));
    {
        let store = open(storage.clone(), clock.clone());
        store.update_page_state("flashcards", json!({ "deck": 3, "index": 12 }));
        assert!(store.flush());
    }

    clock.advance(Duration::from_secs(60));
    let reopened = open(storage, clock);
    assert_eq!(
        reopened.get_page_state("flashcards").unwrap().data,
        json!({ "deck": 3, "index": 12 })
    );
}

#[tokio::test(start_paused = true)]
async fn background_flusher_persists_after_the_interval() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(START));
    let store = open(storage.clone(), clock.clone());
    let flusher = store.spawn_flusher(&tokio::runtime::Handle::current());

    store.update_page_state("dashboard", json!({ "counter": 1 }));
    clock.advance(Duration::from_millis(1_000));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(persisted(&storage).is_some());
    flusher.abort();
}
