//! Shared handle to one peer's replica
//!
//! `Replica` owns a `ConvergentDocument` behind a lock together with two
//! listener registries: change events (local commits and imports) and the
//! outbound hook that receives every sealed transaction for broadcast.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use super::document::ConvergentDocument;
use super::horizon::{Horizon, PeerId};
use super::operation::{ContainerId, Transaction};
use super::snapshot;
use super::ReplicaError;
use crate::subscription::{Subscribers, Subscription};

/// Where a change came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOrigin {
    Local,
    Import,
}

/// "Something in these containers changed; re-read them."
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaEvent {
    pub origin: EventOrigin,
    pub containers: BTreeSet<ContainerId>,
}

struct ReplicaInner {
    doc: RwLock<ConvergentDocument>,
    events: Subscribers<ReplicaEvent>,
    commits: Subscribers<Transaction>,
}

#[derive(Clone)]
pub struct Replica {
    inner: Arc<ReplicaInner>,
}

/// Non-owning reference used by listeners that must not keep the replica alive.
#[derive(Clone)]
pub struct WeakReplica {
    inner: Weak<ReplicaInner>,
}

impl WeakReplica {
    pub fn upgrade(&self) -> Option<Replica> {
        self.inner.upgrade().map(|inner| Replica { inner })
    }
}

impl Replica {
    pub fn new(peer: PeerId) -> Self {
        Self::from_document(ConvergentDocument::new(peer))
    }

    pub fn from_document(doc: ConvergentDocument) -> Self {
        Self {
            inner: Arc::new(ReplicaInner {
                doc: RwLock::new(doc),
                events: Subscribers::new(),
                commits: Subscribers::new(),
            }),
        }
    }

    /// Rebuild a replica from a snapshot written by `save_snapshot`.
    pub fn load_snapshot(path: &Path, peer: PeerId) -> Result<Self, ReplicaError> {
        let txn = snapshot::read_snapshot(path)?;
        let mut doc = ConvergentDocument::new(peer);
        doc.import(&txn);
        Ok(Self::from_document(doc))
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), ReplicaError> {
        let txn = Transaction {
            author: self.peer(),
            ops: self.read().all_operations().cloned().collect(),
        };
        snapshot::write_snapshot(path, &txn)
    }

    pub fn downgrade(&self) -> WeakReplica {
        WeakReplica {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ConvergentDocument> {
        self.inner.doc.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ConvergentDocument> {
        self.inner.doc.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peer(&self) -> PeerId {
        self.read().peer()
    }

    pub fn horizon(&self) -> Horizon {
        self.read().horizon().clone()
    }

    /// Seal pending local mutations into one transaction, notify listeners
    /// and hand the transaction to the commit hooks.
    pub fn commit(&self) -> Option<Transaction> {
        let (txn, containers) = {
            let mut doc = self.write();
            let containers = doc.pending_containers();
            (doc.commit()?, containers)
        };
        log::debug!(
            "peer {} committed {} ops over {} containers",
            txn.author,
            txn.ops.len(),
            containers.len()
        );
        self.inner.commits.emit(&txn);
        self.inner.events.emit(&ReplicaEvent {
            origin: EventOrigin::Local,
            containers,
        });
        Some(txn)
    }

    /// Merge a transaction received from another peer.
    pub fn import(&self, txn: &Transaction) -> BTreeSet<ContainerId> {
        let changed = self.write().import(txn);
        if !changed.is_empty() {
            self.inner.events.emit(&ReplicaEvent {
                origin: EventOrigin::Import,
                containers: changed.clone(),
            });
        }
        changed
    }

    pub fn import_cbor(&self, bytes: &[u8]) -> Result<BTreeSet<ContainerId>, ReplicaError> {
        let txn = Transaction::from_cbor(bytes)?;
        Ok(self.import(&txn))
    }

    /// Everything committed here that `since` has not seen, as one batch.
    pub fn export_since(&self, since: &Horizon) -> Transaction {
        let doc = self.read();
        Transaction {
            author: doc.peer(),
            ops: doc.export_since(since),
        }
    }

    /// Bring `other` up to date with everything committed on this replica.
    pub fn sync_into(&self, other: &Replica) -> BTreeSet<ContainerId> {
        let batch = self.export_since(&other.horizon());
        if batch.is_empty() {
            return BTreeSet::new();
        }
        other.import(&batch)
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&ReplicaEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(Arc::new(callback))
    }

    /// Outbound hook: receives every transaction sealed by `commit()`.
    pub fn subscribe_local_commits(
        &self,
        callback: impl Fn(&Transaction) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.commits.subscribe(Arc::new(callback))
    }
}
