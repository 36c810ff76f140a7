//! On-disk persistence for replica op logs
//!
//! A snapshot is the committed op log written as pretty JSON. Loading it
//! replays the ops into a fresh document, so snapshots from different peers
//! can be merged by importing one after the other.

use std::path::Path;

use super::operation::Transaction;
use super::ReplicaError;

pub(crate) fn write_snapshot(path: &Path, txn: &Transaction) -> Result<(), ReplicaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ReplicaError::IoError(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(txn)
        .map_err(|e| ReplicaError::SerializationError(e.to_string()))?;

    std::fs::write(path, json).map_err(|e| ReplicaError::IoError(e.to_string()))?;
    log::info!("wrote snapshot of {} ops to {}", txn.ops.len(), path.display());
    Ok(())
}

pub(crate) fn read_snapshot(path: &Path) -> Result<Transaction, ReplicaError> {
    let data = std::fs::read(path).map_err(|e| ReplicaError::IoError(e.to_string()))?;
    serde_json::from_slice(&data).map_err(|e| ReplicaError::SerializationError(e.to_string()))
}
