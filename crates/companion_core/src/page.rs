use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Entries older than this are dropped when persisted state is rehydrated.
pub const DEFAULT_MAX_AGE_MS: Millis = 24 * 60 * 60 * 1000;

/// Application-chosen name of a logical view, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&PageId> for PageId {
    fn from(value: &PageId) -> Self {
        value.clone()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStateEntry<T = Value> {
    pub data: T,
    pub last_updated: Millis,
}

impl PageStateEntry<Value> {
    /// Decode the open-ended payload into a view's own payload type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<PageStateEntry<T>, serde_json::Error> {
        Ok(PageStateEntry {
            data: T::deserialize(&self.data)?,
            last_updated: self.last_updated,
        })
    }
}

/// Typed handle for one page namespace.
///
/// A view declares its payload shape once and reads and writes through the
/// key, so the store stays generic while each page keeps a concrete type.
pub struct PageKey<T> {
    id: PageId,
    _payload: PhantomData<fn() -> T>,
}

impl<T> PageKey<T> {
    pub fn new(id: impl Into<PageId>) -> Self {
        Self {
            id: id.into(),
            _payload: PhantomData,
        }
    }

    pub fn id(&self) -> &PageId {
        &self.id
    }
}

impl<T> Clone for PageKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<T> fmt::Debug for PageKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageKey").field(&self.id).finish()
    }
}

/// All cached page entries, keyed by page id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageStates {
    entries: BTreeMap<PageId, PageStateEntry>,
}

impl PageStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the payload for `page_id`, creating the entry on first use.
    ///
    /// `last_updated` never moves backwards, even if the clock does.
    pub fn upsert(&mut self, page_id: PageId, data: Value, now: Millis) {
        let last_updated = self
            .entries
            .get(&page_id)
            .map_or(now, |previous| now.max(previous.last_updated));
        self.entries.insert(page_id, PageStateEntry { data, last_updated });
    }

    pub fn get(&self, page_id: &PageId) -> Option<&PageStateEntry> {
        self.entries.get(page_id)
    }

    pub fn remove(&mut self, page_id: &PageId) -> Option<PageStateEntry> {
        self.entries.remove(page_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PageId, &PageStateEntry)> {
        self.entries.iter()
    }

    /// Drop entries whose age at `now` is `max_age` or more. Returns how many were dropped.
    pub fn retain_fresh(&mut self, now: Millis, max_age: Millis) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.last_updated) < max_age);
        before - self.entries.len()
    }
}

impl FromIterator<(PageId, PageStateEntry)> for PageStates {
    fn from_iter<I: IntoIterator<Item = (PageId, PageStateEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
