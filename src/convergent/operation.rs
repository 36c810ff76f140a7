//! The three primitive replica operations and their envelopes

use super::horizon::{PeerId, SeqNum};
use super::ReplicaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a container holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    Map,
    List,
    Text,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Map => "Map",
            ContainerKind::List => "List",
            ContainerKind::Text => "Text",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "Map" => Some(ContainerKind::Map),
            "List" => Some(ContainerKind::List),
            "Text" => Some(ContainerKind::Text),
            _ => None,
        }
    }
}

/// Stable, globally unique address of a container.
///
/// Normal containers look like `cid:{counter}@{peer}:{Kind}`, root
/// containers like `cid:root-{name}:{Kind}`. Ids never contain `/`, so they
/// can be embedded as one segment of an ephemeral key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn root(name: &str, kind: ContainerKind) -> Self {
        ContainerId(format!("cid:root-{}:{}", name, kind.as_str()))
    }

    pub(crate) fn normal(counter: u64, peer: PeerId, kind: ContainerKind) -> Self {
        ContainerId(format!("cid:{}@{}:{}", counter, peer, kind.as_str()))
    }

    /// Parse a container id from its string form, rejecting anything that
    /// does not follow the id grammar.
    pub fn parse(s: &str) -> Result<Self, ReplicaError> {
        let invalid = || ReplicaError::InvalidContainerId(s.to_string());
        if s.contains('/') {
            return Err(invalid());
        }
        let body = s.strip_prefix("cid:").ok_or_else(invalid)?;
        let (head, kind) = body.rsplit_once(':').ok_or_else(invalid)?;
        ContainerKind::parse(kind).ok_or_else(invalid)?;
        if let Some(name) = head.strip_prefix("root-") {
            if name.is_empty() {
                return Err(invalid());
            }
        } else {
            let (counter, peer) = head.split_once('@').ok_or_else(invalid)?;
            counter.parse::<u64>().map_err(|_| invalid())?;
            peer.parse::<u64>().map_err(|_| invalid())?;
        }
        Ok(ContainerId(s.to_string()))
    }

    pub fn kind(&self) -> ContainerKind {
        self.0
            .rsplit_once(':')
            .and_then(|(_, k)| ContainerKind::parse(k))
            .unwrap_or(ContainerKind::Map)
    }

    pub fn is_root(&self) -> bool {
        self.0.starts_with("cid:root-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value stored under a map key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Tombstone: a key holding `Null` is treated as absent
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Reference to a child container
    Container(ContainerId),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&ContainerId> {
        match self {
            Value::Container(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// A list of strings; non-string elements are skipped.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            Value::List(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<ContainerId> for Value {
    fn from(id: ContainerId) -> Self {
        Value::Container(id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Bring a container into existence
    Create {
        container: ContainerId,
        kind: ContainerKind,
    },

    /// Tombstone a container; remove-wins over any concurrent put
    Delete { container: ContainerId },

    /// Write one key of a map-like container (latest stamp wins)
    Put {
        container: ContainerId,
        key: String,
        value: Value,
    },
}

impl Operation {
    pub fn container(&self) -> &ContainerId {
        match self {
            Operation::Create { container, .. } => container,
            Operation::Delete { container } => container,
            Operation::Put { container, .. } => container,
        }
    }

    pub fn put(container: &ContainerId, key: impl Into<String>, value: Value) -> Self {
        Operation::Put {
            container: container.clone(),
            key: key.into(),
            value,
        }
    }
}

/// Total order used for last-writer-wins resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub timestamp: u64,
    pub author: PeerId,
    pub seq: SeqNum,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpEnvelope {
    pub author: PeerId,
    pub seq: SeqNum,
    /// Hybrid clock value; shared by all ops of one transaction
    pub timestamp: u64,
    pub op: Operation,
}

impl OpEnvelope {
    pub fn stamp(&self) -> Stamp {
        Stamp {
            timestamp: self.timestamp,
            author: self.author,
            seq: self.seq,
        }
    }

    pub fn is_later_than(&self, other: &OpEnvelope) -> bool {
        self.stamp() > other.stamp()
    }
}

/// The unit a peer broadcasts: every op sealed by one `commit()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub author: PeerId,
    pub ops: Vec<OpEnvelope>,
}

impl Transaction {
    pub fn to_cbor(&self) -> Result<Vec<u8>, ReplicaError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ReplicaError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self, ReplicaError> {
        ciborium::from_reader(data).map_err(|e| ReplicaError::SerializationError(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
