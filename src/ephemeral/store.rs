//! Ephemeral key-value store
//!
//! Last-value-wins state that is never persisted: presence and cursors.
//! Local writes are broadcast through `subscribe_local_updates` as CBOR
//! change lists; remote change lists come back in through `apply`.
//!
//! A removed key leaves a timestamped tombstone behind, so a write older than
//! the removal cannot bring the key back whatever order the two arrive in.
//! `remove_outdated` drops tombstones once they are older than its cutoff.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use super::presence::PresenceRecord;
use super::EphemeralError;
use crate::subscription::{Subscribers, Subscription};

/// A structured text selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSelection {
    pub anchor: u64,
    pub focus: u64,
    pub user: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EphemeralValue {
    Presence(PresenceRecord),
    Selection(CursorSelection),
    /// Opaque incremental update for a cursor replica
    Update(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSource {
    Local,
    Import,
    Timeout,
}

/// Keys touched by one store operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralEvent {
    pub by: EventSource,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl EphemeralEvent {
    fn new(by: EventSource) -> Self {
        Self {
            by,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// One entry of a wire change list. `value: None` deletes the key.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct EphemeralChange {
    key: String,
    value: Option<EphemeralValue>,
    timestamp: i64,
}

fn to_cbor(changes: &[EphemeralChange]) -> Result<Vec<u8>, EphemeralError> {
    let mut buffer = Vec::new();
    ciborium::into_writer(changes, &mut buffer)
        .map_err(|e| EphemeralError::SerializationError(e.to_string()))?;
    Ok(buffer)
}

fn from_cbor(bytes: &[u8]) -> Result<Vec<EphemeralChange>, EphemeralError> {
    ciborium::from_reader(bytes).map_err(|e| EphemeralError::SerializationError(e.to_string()))
}

/// `value: None` is a tombstone
struct Entry {
    value: Option<EphemeralValue>,
    timestamp: i64,
}

impl Entry {
    fn live(&self) -> Option<&EphemeralValue> {
        self.value.as_ref()
    }

    /// Does `incoming` lose against what is held? Ties go to the removal.
    fn supersedes(&self, timestamp: i64, is_removal: bool) -> bool {
        self.timestamp > timestamp
            || (self.timestamp == timestamp && self.value.is_none() && !is_removal)
    }
}

/// Timestamp for a local write: never behind what is already held for the key.
fn next_timestamp(previous: Option<&Entry>) -> i64 {
    let now = Utc::now().timestamp_millis();
    previous.map_or(now, |e| now.max(e.timestamp + 1))
}

struct StoreInner {
    entries: Mutex<BTreeMap<String, Entry>>,
    events: Subscribers<EphemeralEvent>,
    local_updates: Subscribers<Vec<u8>>,
}

#[derive(Clone)]
pub struct EphemeralStore {
    inner: Arc<StoreInner>,
}

/// Non-owning handle for listeners registered on the store itself.
#[derive(Clone)]
pub struct WeakEphemeralStore {
    inner: Weak<StoreInner>,
}

impl WeakEphemeralStore {
    pub fn upgrade(&self) -> Option<EphemeralStore> {
        self.inner.upgrade().map(|inner| EphemeralStore { inner })
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(BTreeMap::new()),
                events: Subscribers::new(),
                local_updates: Subscribers::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEphemeralStore {
        WeakEphemeralStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<EphemeralValue> {
        self.entries().get(key).and_then(Entry::live).cloned()
    }

    /// When the key was last written, locally or by its remote owner.
    pub fn updated_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let timestamp = self
            .entries()
            .get(key)
            .filter(|e| e.live().is_some())?
            .timestamp;
        Utc.timestamp_millis_opt(timestamp).single()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|(_, e)| e.live().is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.live().is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn set(&self, key: &str, value: EphemeralValue) {
        let mut event = EphemeralEvent::new(EventSource::Local);
        let timestamp = {
            let mut entries = self.entries();
            let previous = entries.get(key);
            let timestamp = next_timestamp(previous);
            if previous.and_then(Entry::live).is_some() {
                event.updated.push(key.to_string());
            } else {
                event.added.push(key.to_string());
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Some(value.clone()),
                    timestamp,
                },
            );
            timestamp
        };
        self.broadcast(&[EphemeralChange {
            key: key.to_string(),
            value: Some(value),
            timestamp,
        }]);
        self.inner.events.emit(&event);
    }

    pub fn delete(&self, key: &str) -> bool {
        let timestamp = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(key).filter(|e| e.live().is_some()) else {
                return false;
            };
            let timestamp = next_timestamp(Some(&*entry));
            entry.timestamp = timestamp;
            entry.value = None;
            timestamp
        };
        self.broadcast(&[EphemeralChange {
            key: key.to_string(),
            value: None,
            timestamp,
        }]);
        let mut event = EphemeralEvent::new(EventSource::Local);
        event.removed.push(key.to_string());
        self.inner.events.emit(&event);
        true
    }

    fn broadcast(&self, changes: &[EphemeralChange]) {
        if self.inner.local_updates.is_empty() {
            return;
        }
        match to_cbor(changes) {
            Ok(bytes) => self.inner.local_updates.emit(&bytes),
            Err(e) => log::warn!("dropping ephemeral update: {}", e),
        }
    }

    /// Merge a change list produced by another peer's store. A change older
    /// than what is held for its key, tombstones included, is ignored.
    pub fn apply(&self, bytes: &[u8]) -> Result<EphemeralEvent, EphemeralError> {
        let changes = from_cbor(bytes)?;
        let mut event = EphemeralEvent::new(EventSource::Import);
        {
            let mut entries = self.entries();
            for change in changes {
                let current = entries.get(&change.key);
                let is_removal = change.value.is_none();
                if current.map_or(false, |e| e.supersedes(change.timestamp, is_removal)) {
                    continue;
                }
                let was_live = current.and_then(Entry::live).is_some();
                match (&change.value, was_live) {
                    (Some(_), true) => event.updated.push(change.key.clone()),
                    (Some(_), false) => event.added.push(change.key.clone()),
                    (None, true) => event.removed.push(change.key.clone()),
                    (None, false) => {}
                }
                entries.insert(
                    change.key,
                    Entry {
                        value: change.value,
                        timestamp: change.timestamp,
                    },
                );
            }
        }
        if !event.is_empty() {
            self.inner.events.emit(&event);
        }
        Ok(event)
    }

    /// The whole store as one change list, for a newly connected peer.
    /// Tombstones travel too.
    pub fn encode_all(&self) -> Result<Vec<u8>, EphemeralError> {
        let changes: Vec<EphemeralChange> = self
            .entries()
            .iter()
            .map(|(key, entry)| EphemeralChange {
                key: key.clone(),
                value: entry.value.clone(),
                timestamp: entry.timestamp,
            })
            .collect();
        to_cbor(&changes)
    }

    /// Drop keys locally without telling other peers. Listeners see a
    /// `Timeout` event. The key keeps its last timestamp as a tombstone, so
    /// only a newer write from its owner revives it.
    pub fn expire(&self, keys: &[String]) -> Vec<String> {
        let mut event = EphemeralEvent::new(EventSource::Timeout);
        {
            let mut entries = self.entries();
            for key in keys {
                if let Some(entry) = entries.get_mut(key).filter(|e| e.live().is_some()) {
                    entry.value = None;
                    event.removed.push(key.clone());
                }
            }
        }
        if !event.is_empty() {
            self.inner.events.emit(&event);
        }
        event.removed
    }

    /// Expire every key not written within `max_age` and forget tombstones
    /// older than that.
    pub fn remove_outdated(&self, max_age: Duration) -> Vec<String> {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let outdated: Vec<String> = {
            let mut entries = self.entries();
            entries.retain(|_, e| e.live().is_some() || e.timestamp >= cutoff);
            entries
                .iter()
                .filter(|(_, e)| e.live().is_some() && e.timestamp < cutoff)
                .map(|(k, _)| k.clone())
                .collect()
        };
        self.expire(&outdated)
    }

    /// Number of tombstones currently held.
    pub fn tombstone_count(&self) -> usize {
        self.entries().values().filter(|e| e.live().is_none()).count()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&EphemeralEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(Arc::new(callback))
    }

    /// Outbound hook: receives the encoded form of every local `set` and
    /// `delete`, ready for the transport.
    pub fn subscribe_local_updates(
        &self,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .local_updates
            .subscribe(Arc::new(move |bytes: &Vec<u8>| callback(bytes)))
    }
}
