use companion_core::PageStates;
use companion_logging::{companion_debug, companion_error, companion_warn};

use crate::storage::KeyValueStorage;

/// Read the persisted page map stored under `key`.
///
/// A missing key, an unreadable store and a malformed blob all yield an empty
/// map; the latter two are logged.
pub fn load_page_states(storage: &dyn KeyValueStorage, key: &str) -> PageStates {
    let content = match storage.get_item(key) {
        Ok(Some(text)) => text,
        Ok(None) => {
            companion_debug!("No persisted page state under {:?}", key);
            return PageStates::new();
        }
        Err(err) => {
            companion_warn!("Failed to read persisted page state {:?}: {}", key, err);
            return PageStates::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(pages) => pages,
        Err(err) => {
            companion_warn!("Failed to parse persisted page state {:?}: {}", key, err);
            PageStates::new()
        }
    }
}

/// Write the page map under `key`. Returns whether the write landed.
pub fn save_page_states(storage: &dyn KeyValueStorage, key: &str, pages: &PageStates) -> bool {
    let content = match serde_json::to_string(pages) {
        Ok(text) => text,
        Err(err) => {
            companion_error!("Failed to serialize page state: {}", err);
            return false;
        }
    };

    match storage.set_item(key, &content) {
        Ok(()) => {
            companion_debug!("Persisted {} page entries under {:?}", pages.len(), key);
            true
        }
        Err(err) => {
            companion_error!("Failed to write page state {:?}: {}", key, err);
            false
        }
    }
}
