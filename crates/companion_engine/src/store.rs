use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use companion_core::{
    update, BackgroundTask, CompanionState, Effect, Millis, Msg, PageId, PageKey, PageStateEntry,
    PageViewModel, TaskId, DEFAULT_MAX_AGE_MS,
};
use companion_logging::{companion_debug, companion_error, companion_info, companion_trace, companion_warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::{duration_millis, Clock, SystemClock};
use crate::scheduler::WriteScheduler;
use crate::snapshot::{load_page_states, save_page_states};
use crate::storage::{KeyValueStorage, MemoryStorage};

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Storage key holding the serialized page map.
    pub storage_key: String,
    /// Debounce window for persisting updates.
    pub flush_interval: Duration,
    /// Entries at least this old are dropped on rehydration.
    pub max_age: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            storage_key: "page-state-storage".to_string(),
            flush_interval: Duration::from_secs(1),
            max_age: Duration::from_millis(DEFAULT_MAX_AGE_MS),
        }
    }
}

/// Handle to the page-state cache and the task registry it shares with the tracker.
///
/// Cloning is cheap; every clone sees the same state. Storage failures are
/// logged and never surface to callers: the in-memory state stays
/// authoritative and the next successful write catches storage up.
#[derive(Clone)]
pub struct PageStateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<CompanionState>,
    scheduler: Mutex<WriteScheduler>,
    /// Serializes snapshot-and-write so an older snapshot never lands last.
    persist_lock: Mutex<()>,
    aborts: Mutex<HashMap<TaskId, CancellationToken>>,
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
}

impl PageStateStore {
    /// Rehydrate from `storage` and return a ready store.
    pub fn open(
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
        settings: StoreSettings,
    ) -> Self {
        let loaded = load_page_states(storage.as_ref(), &settings.storage_key);
        let loaded_count = loaded.len();
        let store = Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(CompanionState::new()),
                scheduler: Mutex::new(WriteScheduler::new(settings.flush_interval)),
                persist_lock: Mutex::new(()),
                aborts: Mutex::new(HashMap::new()),
                storage,
                clock,
                settings,
            }),
        };

        store.dispatch(Msg::Rehydrated {
            pages: loaded,
            at: store.now(),
            max_age: duration_millis(store.inner.settings.max_age),
        });
        let kept = store.state().pages().len();
        if kept < loaded_count {
            companion_info!(
                "Dropped {} expired page entries during rehydration",
                loaded_count - kept
            );
        }
        companion_debug!("Page state store opened with {} entries", kept);
        store
    }

    /// Store without durable backing, using the system clock.
    pub fn in_memory() -> Self {
        Self::open(
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
            StoreSettings::default(),
        )
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.inner.storage
    }

    pub fn now(&self) -> Millis {
        self.inner.clock.now_millis()
    }

    /// Replace the payload for `page_id`. Persistence is debounced.
    pub fn update_page_state(&self, page_id: impl Into<PageId>, data: Value) {
        let page_id = page_id.into();
        companion_trace!("Updating page state {}", page_id);
        self.dispatch(Msg::PageStateUpdated {
            page_id,
            data,
            at: self.now(),
        });
    }

    /// Typed variant of [`update_page_state`](Self::update_page_state).
    pub fn update<T: Serialize>(&self, key: &PageKey<T>, data: &T) {
        match serde_json::to_value(data) {
            Ok(value) => self.update_page_state(key.id(), value),
            Err(err) => {
                companion_error!("Failed to serialize state for page {}: {}", key.id(), err);
            }
        }
    }

    pub fn get_page_state(&self, page_id: impl Into<PageId>) -> Option<PageStateEntry> {
        self.state().page_state(&page_id.into()).cloned()
    }

    /// Typed read; a payload that no longer matches `T` reads as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &PageKey<T>) -> Option<PageStateEntry<T>> {
        let entry = self.get_page_state(key.id())?;
        match entry.decode() {
            Ok(typed) => Some(typed),
            Err(err) => {
                companion_warn!("Cached state for page {} has an unexpected shape: {}", key.id(), err);
                None
            }
        }
    }

    /// Remove one entry and persist immediately.
    pub fn clear_page_state(&self, page_id: impl Into<PageId>) {
        let page_id = page_id.into();
        companion_debug!("Clearing page state {}", page_id);
        self.dispatch(Msg::PageStateCleared { page_id });
    }

    /// Forget every entry and every task, cancel running tasks and persist the
    /// empty map before returning. Used on logout.
    pub fn clear_all_states(&self) {
        companion_info!("Clearing all page states and background tasks");
        self.dispatch(Msg::AllStatesCleared);
    }

    pub fn page_view(&self, page_id: impl Into<PageId>) -> PageViewModel {
        self.state().page_view(&page_id.into())
    }

    /// Persist if the debounce deadline has passed. Returns whether a write landed.
    pub fn tick(&self) -> bool {
        let due = self.scheduler().take_due(self.now());
        due && self.persist()
    }

    /// Persist a pending debounced write right away. Returns whether a write landed.
    pub fn flush(&self) -> bool {
        let pending = self.scheduler().take_pending();
        pending && self.persist()
    }

    pub fn has_pending_write(&self) -> bool {
        self.scheduler().is_pending()
    }

    /// Drive [`tick`](Self::tick) from a background task on `runtime`.
    pub fn spawn_flusher(&self, runtime: &Handle) -> JoinHandle<()> {
        let store = self.clone();
        let period = (self.inner.settings.flush_interval / 4).max(Duration::from_millis(10));
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.tick();
            }
        })
    }

    /// Apply `msg`, run the storage and cancellation effects, and hand back
    /// the effects that belong to the task tracker.
    pub(crate) fn dispatch(&self, msg: Msg) -> Vec<Effect> {
        let effects = {
            let mut guard = self.state();
            let state = std::mem::take(&mut *guard);
            let (state, effects) = update(state, msg);
            *guard = state;
            effects
        };

        let mut remaining = Vec::new();
        for effect in effects {
            match effect {
                Effect::SchedulePersist => self.scheduler().schedule(self.now()),
                Effect::PersistNow => {
                    self.scheduler().cancel();
                    self.persist();
                }
                Effect::AbortTask { task_id } => {
                    if let Some(token) = self.aborts().remove(&task_id) {
                        companion_debug!("Aborting task {}", task_id);
                        token.cancel();
                    }
                }
                other => remaining.push(other),
            }
        }
        remaining
    }

    pub(crate) fn task(&self, task_id: &TaskId) -> Option<BackgroundTask> {
        self.state().task(task_id).cloned()
    }

    pub(crate) fn register_abort(&self, task_id: TaskId, token: CancellationToken) {
        self.aborts().insert(task_id, token);
    }

    pub(crate) fn forget_abort(&self, task_id: &TaskId) {
        self.aborts().remove(task_id);
    }

    fn persist(&self) -> bool {
        let _writing = self
            .inner
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let pages = self.state().pages().clone();
        save_page_states(
            self.inner.storage.as_ref(),
            &self.inner.settings.storage_key,
            &pages,
        )
    }

    fn state(&self) -> MutexGuard<'_, CompanionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scheduler(&self) -> MutexGuard<'_, WriteScheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn aborts(&self) -> MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.inner.aborts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PageStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStateStore")
            .field("settings", &self.inner.settings)
            .field("pending_write", &self.has_pending_write())
            .finish_non_exhaustive()
    }
}
