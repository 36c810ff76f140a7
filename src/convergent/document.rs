//! The core ConvergentDocument type
//!
//! A ConvergentDocument keeps the committed op log of every peer and a
//! materialized view of all containers. Local writes are applied to the view
//! immediately and parked in a pending transaction until `commit()`.

use super::horizon::{Horizon, PeerId, SeqNum};
use super::operation::{
    ContainerId, ContainerKind, OpEnvelope, Operation, Stamp, Transaction, Value,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Gap between freshly assigned list positions
const LIST_SPACING: i64 = 1 << 16;

#[derive(Clone, Debug)]
struct Entry {
    stamp: Stamp,
    value: Value,
}

/// Materialized state of one container
#[derive(Clone, Debug, Default)]
struct ContainerState {
    kind: Option<ContainerKind>,
    deleted: bool,
    entries: BTreeMap<String, Entry>,
}

/// One element of a list container, in list order
#[derive(Clone, Debug, PartialEq)]
pub struct ListEntry {
    pub key: String,
    pub position: i64,
    pub value: Value,
}

pub struct ConvergentDocument {
    peer: PeerId,

    /// Next sequence number for local operations
    next_seq: SeqNum,

    /// Counter used to mint container ids and list element keys
    next_counter: u64,

    /// Highest timestamp seen from anyone (hybrid clock)
    clock: u64,

    /// Timestamp shared by every op of the open transaction
    txn_timestamp: Option<u64>,

    /// Committed ops we have seen
    horizon: Horizon,

    /// Committed operations, ordered by (author, seq)
    operations: BTreeMap<(PeerId, SeqNum), OpEnvelope>,

    /// Local ops not yet sealed by `commit()`
    pending: Vec<OpEnvelope>,

    containers: HashMap<ContainerId, ContainerState>,
}

impl ConvergentDocument {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            next_seq: 1,
            next_counter: 1,
            clock: 0,
            txn_timestamp: None,
            horizon: Horizon::new(),
            operations: BTreeMap::new(),
            pending: Vec::new(),
            containers: HashMap::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn now_millis() -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }

    fn transaction_timestamp(&mut self) -> u64 {
        if let Some(ts) = self.txn_timestamp {
            return ts;
        }
        let ts = Self::now_millis().max(self.clock + 1);
        self.clock = ts;
        self.txn_timestamp = Some(ts);
        ts
    }

    /// Apply a local operation to the view and park it in the open transaction.
    pub fn apply_local(&mut self, op: Operation) -> OpEnvelope {
        let envelope = OpEnvelope {
            author: self.peer,
            seq: self.next_seq,
            timestamp: self.transaction_timestamp(),
            op,
        };
        self.next_seq += 1;
        self.apply_to_state(&envelope);
        self.pending.push(envelope.clone());
        envelope
    }

    /// Seal the open transaction into the durable log.
    pub fn commit(&mut self) -> Option<Transaction> {
        self.txn_timestamp = None;
        if self.pending.is_empty() {
            return None;
        }
        let ops = std::mem::take(&mut self.pending);
        for env in &ops {
            self.horizon.observe(env.author, env.seq);
            self.operations.insert((env.author, env.seq), env.clone());
        }
        Some(Transaction {
            author: self.peer,
            ops,
        })
    }

    /// Containers touched by the open transaction.
    pub fn pending_containers(&self) -> BTreeSet<ContainerId> {
        self.pending
            .iter()
            .map(|env| env.op.container().clone())
            .collect()
    }

    /// Merge a remote transaction. Envelopes already known are skipped, so
    /// importing twice (or out of order) converges to the same state.
    /// Returns the containers whose state may have changed.
    pub fn import(&mut self, txn: &Transaction) -> BTreeSet<ContainerId> {
        let mut changed = BTreeSet::new();
        for env in &txn.ops {
            let key = (env.author, env.seq);
            if self.operations.contains_key(&key) {
                continue;
            }
            if env.author == self.peer {
                // Our own history coming back from a snapshot or a relay
                self.next_seq = self.next_seq.max(env.seq + 1);
                // Every minted counter is paired with at least one op
                self.next_counter = self.next_counter.max(env.seq + 1);
            }
            self.clock = self.clock.max(env.timestamp);
            self.horizon.observe(env.author, env.seq);
            self.apply_to_state(env);
            changed.insert(env.op.container().clone());
            self.operations.insert(key, env.clone());
        }
        changed
    }

    /// Committed ops a peer at `since` has not seen yet.
    pub fn export_since(&self, since: &Horizon) -> Vec<OpEnvelope> {
        self.operations
            .iter()
            .filter(|((author, seq), _)| !since.has_seen(author, *seq))
            .map(|(_, env)| env.clone())
            .collect()
    }

    pub fn all_operations(&self) -> impl Iterator<Item = &OpEnvelope> {
        self.operations.values()
    }

    fn apply_to_state(&mut self, env: &OpEnvelope) {
        let state = self
            .containers
            .entry(env.op.container().clone())
            .or_default();
        match &env.op {
            Operation::Create { kind, .. } => {
                state.kind = Some(*kind);
            }
            Operation::Delete { .. } => {
                state.deleted = true;
                state.entries.clear();
            }
            Operation::Put { key, value, .. } => {
                if state.deleted {
                    return;
                }
                let stamp = env.stamp();
                let newer = state
                    .entries
                    .get(key)
                    .map_or(true, |existing| stamp > existing.stamp);
                if newer {
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            stamp,
                            value: value.clone(),
                        },
                    );
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Containers
    // ---------------------------------------------------------------------

    /// Create a new container and return its freshly minted id.
    pub fn create_container(&mut self, kind: ContainerKind) -> ContainerId {
        let id = ContainerId::normal(self.next_counter, self.peer, kind);
        self.next_counter += 1;
        self.apply_local(Operation::Create {
            container: id.clone(),
            kind,
        });
        id
    }

    pub fn delete_container(&mut self, container: &ContainerId) {
        if container.is_root() {
            return;
        }
        self.apply_local(Operation::Delete {
            container: container.clone(),
        });
    }

    /// Roots always exist; other containers exist once created and until deleted.
    pub fn contains(&self, container: &ContainerId) -> bool {
        if container.is_root() {
            return true;
        }
        self.containers
            .get(container)
            .map_or(false, |s| s.kind.is_some() && !s.deleted)
    }

    pub fn is_deleted(&self, container: &ContainerId) -> bool {
        self.containers.get(container).map_or(false, |s| s.deleted)
    }

    // ---------------------------------------------------------------------
    // Maps
    // ---------------------------------------------------------------------

    pub fn put(&mut self, container: &ContainerId, key: &str, value: Value) {
        self.apply_local(Operation::put(container, key, value));
    }

    pub fn remove_key(&mut self, container: &ContainerId, key: &str) {
        if self.get(container, key).is_some() {
            self.put(container, key, Value::Null);
        }
    }

    /// Tombstone every live key of a container. Returns how many were cleared.
    pub fn clear(&mut self, container: &ContainerId) -> usize {
        let keys: Vec<String> = self.entries(container).map(|(k, _)| k.to_string()).collect();
        for key in &keys {
            self.put(container, key, Value::Null);
        }
        keys.len()
    }

    pub fn get(&self, container: &ContainerId, key: &str) -> Option<&Value> {
        self.containers
            .get(container)
            .filter(|s| !s.deleted)
            .and_then(|s| s.entries.get(key))
            .map(|e| &e.value)
            .filter(|v| !v.is_null())
    }

    /// Live (non-tombstoned) entries in key order.
    pub fn entries<'a>(
        &'a self,
        container: &ContainerId,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.containers
            .get(container)
            .filter(|s| !s.deleted)
            .into_iter()
            .flat_map(|s| s.entries.iter())
            .filter(|(_, e)| !e.value.is_null())
            .map(|(k, e)| (k.as_str(), &e.value))
    }

    pub fn is_empty(&self, container: &ContainerId) -> bool {
        self.entries(container).next().is_none()
    }

    // ---------------------------------------------------------------------
    // Text
    // ---------------------------------------------------------------------

    pub fn set_text(&mut self, text: &ContainerId, content: &str) {
        self.put(text, "value", Value::string(content));
    }

    pub fn text(&self, text: &ContainerId) -> String {
        self.get(text, "value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    // ---------------------------------------------------------------------
    // Lists
    // ---------------------------------------------------------------------

    /// Elements of a list container in order.
    pub fn list_entries(&self, list: &ContainerId) -> Vec<ListEntry> {
        let mut items: Vec<ListEntry> = self
            .entries(list)
            .filter_map(|(key, raw)| {
                let map = raw.as_map()?;
                Some(ListEntry {
                    key: key.to_string(),
                    position: map.get("pos").and_then(Value::as_int)?,
                    value: map.get("value").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        items.sort_by(|a, b| (a.position, &a.key).cmp(&(b.position, &b.key)));
        items
    }

    fn list_value(position: i64, value: Value) -> Value {
        Value::Map(BTreeMap::from([
            ("pos".to_string(), Value::Int(position)),
            ("value".to_string(), value),
        ]))
    }

    /// Insert `value` so that it lands at `index` (clamped to the list length).
    /// Returns the element key.
    pub fn list_insert(&mut self, list: &ContainerId, index: usize, value: Value) -> String {
        let mut items = self.list_entries(list);
        let index = index.min(items.len());

        let before = index.checked_sub(1).map(|i| items[i].position);
        let after = items.get(index).map(|e| e.position);
        let position = match (before, after) {
            (None, None) => 0,
            (Some(b), None) => b + LIST_SPACING,
            (None, Some(a)) => a - LIST_SPACING,
            (Some(b), Some(a)) if a - b > 1 => b + (a - b) / 2,
            (Some(_), Some(_)) => {
                // No room left between neighbours: spread everything out again
                for (i, item) in items.iter_mut().enumerate() {
                    let slot = (if i < index { i } else { i + 1 }) as i64;
                    item.position = slot * LIST_SPACING;
                    let v = Self::list_value(item.position, item.value.clone());
                    self.put(list, &item.key, v);
                }
                index as i64 * LIST_SPACING
            }
        };

        let key = format!("{}@{}", self.next_counter, self.peer);
        self.next_counter += 1;
        self.put(list, &key, Self::list_value(position, value));
        key
    }

    pub fn list_remove(&mut self, list: &ContainerId, key: &str) -> bool {
        if self.get(list, key).is_none() {
            return false;
        }
        self.put(list, key, Value::Null);
        true
    }

    /// Exchange the positions of two elements.
    pub fn list_swap(&mut self, list: &ContainerId, a: &ListEntry, b: &ListEntry) {
        let (pa, pb) = if a.position == b.position {
            // Equal positions are ordered by key; nudge to keep the swap visible
            let (lo, hi) = if a.key < b.key { (a, b) } else { (b, a) };
            if lo.key == a.key {
                (a.position + 1, b.position)
            } else {
                (hi.position, lo.position + 1)
            }
        } else {
            (b.position, a.position)
        };
        self.put(list, &a.key, Self::list_value(pa, a.value.clone()));
        self.put(list, &b.key, Self::list_value(pb, b.value.clone()));
    }
}
