//! Presence heartbeat and cursor relays
//!
//! One `PresenceManager` per ephemeral store. It owns the local peer's
//! `user/{peer}` record and multiplexes any number of per-container cursor
//! replicas over the store's `cursor/{container}/{peer}` keys.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::cursor::CursorReplica;
use super::key::EphemeralKey;
use super::store::{EphemeralStore, EphemeralValue};
use crate::config::PresenceConfig;
use crate::convergent::{ContainerId, PeerId};
use crate::subscription::Subscription;

/// Identity shown next to a peer's cursor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub name: String,
    pub color: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PresenceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            id: id.into(),
            avatar: None,
        }
    }
}

/// Running presence heartbeat. Stops on `cancel` or drop.
pub struct PresenceHeartbeat {
    task: Option<JoinHandle<()>>,
}

impl PresenceHeartbeat {
    pub fn cancel(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PresenceHeartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PresenceInner {
    store: EphemeralStore,
    peer: PeerId,
    record: Mutex<PresenceRecord>,
    config: PresenceConfig,
}

impl PresenceInner {
    fn user_key(&self) -> String {
        EphemeralKey::User(self.peer).to_string()
    }

    fn publish_presence(&self) {
        let record = self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.store
            .set(&self.user_key(), EphemeralValue::Presence(record));
    }

    fn ensure_presence(&self) {
        if self.store.get(&self.user_key()).is_none() {
            self.publish_presence();
        }
    }

    fn is_fresh(&self, key: &str) -> bool {
        let timeout = self.config.presence_timeout_ms as i64;
        self.store.updated_at(key).map_or(false, |written| {
            Utc::now().signed_duration_since(written).num_milliseconds() < timeout
        })
    }
}

#[derive(Clone)]
pub struct PresenceManager {
    inner: Arc<PresenceInner>,
}

impl PresenceManager {
    pub fn new(
        store: EphemeralStore,
        peer: PeerId,
        record: PresenceRecord,
        config: PresenceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                store,
                peer,
                record: Mutex::new(record),
                config,
            }),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.inner.peer
    }

    pub fn store(&self) -> &EphemeralStore {
        &self.inner.store
    }

    /// Write the local presence record now.
    pub fn publish_presence(&self) {
        self.inner.publish_presence();
    }

    /// Replace the local presence record and publish it.
    pub fn set_presence(&self, record: PresenceRecord) {
        *self
            .inner
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = record;
        self.inner.publish_presence();
    }

    /// Re-publish the presence record every `interval`, starting now.
    /// Must be called inside a tokio runtime.
    pub fn broadcast_user_presence(&self, interval: Duration) -> PresenceHeartbeat {
        let inner = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.publish_presence();
            }
        });
        log::info!(
            "peer {} broadcasting presence every {:?}",
            self.inner.peer,
            period
        );
        PresenceHeartbeat { task: Some(task) }
    }

    /// Heartbeat at the configured interval.
    pub fn start_heartbeat(&self) -> PresenceHeartbeat {
        self.broadcast_user_presence(self.inner.config.heartbeat_interval())
    }

    /// Relay cursors of one container between the store and `replica`.
    ///
    /// Remote cursor keys already in the store are copied in first. After
    /// that, remote writes and removals flow into the replica and local
    /// replica updates are published under this peer's cursor key. Keys
    /// of other containers and of this peer never reach the replica.
    pub fn bind_cursor_store(
        &self,
        container: &ContainerId,
        replica: Arc<dyn CursorReplica>,
    ) -> Subscription {
        let me = self.inner.peer;
        let remote_peer = {
            let container = container.clone();
            move |key: &str| -> Option<PeerId> {
                match EphemeralKey::parse(key)? {
                    EphemeralKey::Cursor { container: c, peer } if c == container && peer != me => {
                        Some(peer)
                    }
                    _ => None,
                }
            }
        };

        let store = &self.inner.store;
        for key in store.keys_with_prefix(&EphemeralKey::cursor_prefix(container)) {
            if let (Some(peer), Some(value)) = (remote_peer(key.as_str()), store.get(&key)) {
                replica.apply(peer, &value);
            }
        }

        let weak_store = store.downgrade();
        let inbound_replica = replica.clone();
        let inbound = store.subscribe(move |event| {
            let Some(store) = weak_store.upgrade() else {
                return;
            };
            for key in event.added.iter().chain(&event.updated) {
                if let (Some(peer), Some(value)) = (remote_peer(key.as_str()), store.get(key)) {
                    inbound_replica.apply(peer, &value);
                }
            }
            for key in &event.removed {
                if let Some(peer) = remote_peer(key.as_str()) {
                    inbound_replica.remove_peer(peer);
                }
            }
        });

        let weak_inner = Arc::downgrade(&self.inner);
        let own_key = EphemeralKey::Cursor {
            container: container.clone(),
            peer: me,
        }
        .to_string();
        let outbound = replica.subscribe_local_updates(Arc::new(move |value: &EphemeralValue| {
            let Some(inner) = weak_inner.upgrade() else {
                return;
            };
            inner.ensure_presence();
            inner.store.set(&own_key, value.clone());
        }));

        log::debug!("peer {} bound cursors of {}", me, container);
        Subscription::join(vec![inbound, outbound])
    }

    /// Every presence record in the store, live or not.
    pub fn presences(&self) -> BTreeMap<PeerId, PresenceRecord> {
        let store = &self.inner.store;
        store
            .keys_with_prefix(&EphemeralKey::user_prefix())
            .into_iter()
            .filter_map(|key| {
                let EphemeralKey::User(peer) = EphemeralKey::parse(&key)? else {
                    return None;
                };
                match store.get(&key)? {
                    EphemeralValue::Presence(record) => Some((peer, record)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Presence records written within the presence timeout.
    pub fn live_presences(&self) -> BTreeMap<PeerId, PresenceRecord> {
        self.presences()
            .into_iter()
            .filter(|(peer, _)| self.inner.is_fresh(&EphemeralKey::User(*peer).to_string()))
            .collect()
    }

    /// Expire remote peers whose presence outlived the timeout, along with
    /// their cursors. Returns the peers dropped.
    pub fn prune_stale(&self) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .presences()
            .into_keys()
            .filter(|peer| *peer != self.inner.peer)
            .filter(|peer| !self.inner.is_fresh(&EphemeralKey::User(*peer).to_string()))
            .collect();
        if stale.is_empty() {
            return stale;
        }

        let keys: Vec<String> = self
            .inner
            .store
            .keys()
            .into_iter()
            .filter(|key| {
                EphemeralKey::parse(key).map_or(false, |k| stale.contains(&k.peer()))
            })
            .collect();
        self.inner.store.expire(&keys);
        log::info!("peer {} pruned stale peers {:?}", self.inner.peer, stale);
        stale
    }

    /// Delete this peer's presence and cursor keys everywhere.
    pub fn disconnect(&self) {
        let me = self.inner.peer;
        for key in self.inner.store.keys() {
            if EphemeralKey::parse(&key).map_or(false, |k| k.peer() == me) {
                self.inner.store.delete(&key);
            }
        }
    }
}
