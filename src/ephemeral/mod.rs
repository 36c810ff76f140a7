//! Ephemeral presence and cursors
//!
//! Short-lived state shared over a flat key-value transport, decoupled from
//! document commits: presence records under `user/{peer}` and cursor data
//! under `cursor/{container}/{peer}`.

mod cursor;
mod key;
mod presence;
mod store;

pub use cursor::{CursorReplica, CursorStore};
pub use key::EphemeralKey;
pub use presence::{PresenceHeartbeat, PresenceManager, PresenceRecord};
pub use store::{
    CursorSelection, EphemeralEvent, EphemeralStore, EphemeralValue, EventSource,
    WeakEphemeralStore,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EphemeralError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
