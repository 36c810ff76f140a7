//! Per-container cursor replicas

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::store::{CursorSelection, EphemeralValue};
use crate::convergent::PeerId;
use crate::subscription::{Callback, Subscribers, Subscription};

/// The local view of everyone's cursors in one container.
///
/// `PresenceManager::bind_cursor_store` feeds remote values in through
/// `apply`/`remove_peer` and forwards whatever the local user produces,
/// announced through `subscribe_local_updates`.
pub trait CursorReplica: Send + Sync {
    fn apply(&self, peer: PeerId, value: &EphemeralValue);

    fn remove_peer(&self, peer: PeerId);

    /// Local-only updates; values received through `apply` are not echoed.
    fn subscribe_local_updates(&self, callback: Callback<EphemeralValue>) -> Subscription;
}

/// In-memory `CursorReplica` for one container
pub struct CursorStore {
    local: Mutex<Option<EphemeralValue>>,
    remote: Mutex<BTreeMap<PeerId, EphemeralValue>>,
    updates: Subscribers<EphemeralValue>,
}

impl Default for CursorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorStore {
    pub fn new() -> Self {
        Self {
            local: Mutex::new(None),
            remote: Mutex::new(BTreeMap::new()),
            updates: Subscribers::new(),
        }
    }

    pub fn set_local_selection(&self, selection: CursorSelection) {
        self.publish_local(EphemeralValue::Selection(selection));
    }

    /// Record and announce a local value of any shape.
    pub fn publish_local(&self, value: EphemeralValue) {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        self.updates.emit(&value);
    }

    pub fn local_cursor(&self) -> Option<EphemeralValue> {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cursor(&self, peer: PeerId) -> Option<EphemeralValue> {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)
            .cloned()
    }

    pub fn remote_cursors(&self) -> BTreeMap<PeerId, EphemeralValue> {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CursorReplica for CursorStore {
    fn apply(&self, peer: PeerId, value: &EphemeralValue) {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, value.clone());
    }

    fn remove_peer(&self, peer: PeerId) {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&peer);
    }

    fn subscribe_local_updates(&self, callback: Callback<EphemeralValue>) -> Subscription {
        self.updates.subscribe(callback)
    }
}

impl std::fmt::Debug for CursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorStore")
            .field("local", &self.local_cursor())
            .field("remote", &self.remote_cursors())
            .finish()
    }
}
