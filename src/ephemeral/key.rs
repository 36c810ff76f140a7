//! Ephemeral key grammar
//!
//! ```text
//! user/{peerId}
//! cursor/{containerId}/{peerId}
//! ```
//!
//! Container ids never contain `/`, so a key splits into exactly two or
//! three segments. Anything else is not ours and is ignored.

use std::fmt;

use crate::convergent::{ContainerId, PeerId};

const USER: &str = "user";
const CURSOR: &str = "cursor";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EphemeralKey {
    User(PeerId),
    Cursor { container: ContainerId, peer: PeerId },
}

impl EphemeralKey {
    pub fn parse(key: &str) -> Option<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        match segments.as_slice() {
            [USER, peer] => Some(EphemeralKey::User(peer.parse().ok()?)),
            [CURSOR, container, peer] => Some(EphemeralKey::Cursor {
                container: ContainerId::parse(container).ok()?,
                peer: peer.parse().ok()?,
            }),
            _ => None,
        }
    }

    pub fn peer(&self) -> PeerId {
        match self {
            EphemeralKey::User(peer) => *peer,
            EphemeralKey::Cursor { peer, .. } => *peer,
        }
    }

    /// Prefix shared by every cursor key of one container.
    pub fn cursor_prefix(container: &ContainerId) -> String {
        format!("{}/{}/", CURSOR, container)
    }

    pub fn user_prefix() -> String {
        format!("{}/", USER)
    }
}

impl fmt::Display for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EphemeralKey::User(peer) => write!(f, "{}/{}", USER, peer),
            EphemeralKey::Cursor { container, peer } => {
                write!(f, "{}/{}/{}", CURSOR, container, peer)
            }
        }
    }
}
