//! Convergent replica substrate
//!
//! An op-based CRDT holding nested map, list and text containers addressed by
//! stable container ids. Local mutations are visible immediately and are
//! sealed into a `Transaction` by `commit()`; remote transactions merge in
//! any order, any number of times.

mod document;
mod horizon;
mod operation;
mod replica;
mod snapshot;

pub use document::{ConvergentDocument, ListEntry};
pub use horizon::{Horizon, PeerId, SeqNum};
pub use operation::{
    ContainerId, ContainerKind, OpEnvelope, Operation, Stamp, Transaction, Value,
};
pub use replica::{EventOrigin, Replica, ReplicaEvent, WeakReplica};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("Invalid container id: {0}")]
    InvalidContainerId(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}
