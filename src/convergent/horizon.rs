//! Version vectors over peer op streams
//!
//! A Horizon records, per peer, which committed sequence numbers a replica
//! has observed: a contiguous prefix plus any numbers that arrived ahead of a
//! gap. Peers exchange horizons to work out which transactions the other side
//! is still missing, so a gap is resent until it is filled.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Sequence number within a peer's operation stream
pub type SeqNum = u64;

/// Identity of one replica (one editing session on one device).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Generate a fresh random peer id.
    pub fn random() -> Self {
        PeerId(Uuid::new_v4().as_u64_pair().0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PeerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(PeerId)
    }
}

impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        PeerId(value)
    }
}

/// Observed sequence numbers of one peer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PeerSeen {
    /// Every seq in `1..=contiguous` has been observed
    contiguous: SeqNum,
    /// Observed seqs above `contiguous + 1`, waiting for the gap to close
    ahead: BTreeSet<SeqNum>,
}

impl PeerSeen {
    fn observe(&mut self, seq: SeqNum) {
        if seq <= self.contiguous {
            return;
        }
        self.ahead.insert(seq);
        self.compact();
    }

    fn compact(&mut self) {
        while self.ahead.remove(&(self.contiguous + 1)) {
            self.contiguous += 1;
        }
    }

    fn contains(&self, seq: SeqNum) -> bool {
        seq <= self.contiguous || self.ahead.contains(&seq)
    }

    fn iter(&self) -> impl Iterator<Item = SeqNum> + '_ {
        (1..=self.contiguous).chain(self.ahead.iter().copied())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    seen: BTreeMap<PeerId, PeerSeen>,
}

impl Horizon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the gap-free prefix seen from a peer (0 if never seen)
    pub fn get(&self, peer: &PeerId) -> SeqNum {
        self.seen.get(peer).map_or(0, |s| s.contiguous)
    }

    /// Highest sequence number seen from a peer, gaps included
    pub fn highest(&self, peer: &PeerId) -> SeqNum {
        self.seen.get(peer).map_or(0, |s| {
            s.ahead.iter().next_back().copied().unwrap_or(s.contiguous)
        })
    }

    pub fn observe(&mut self, peer: PeerId, seq: SeqNum) {
        if seq == 0 {
            return;
        }
        self.seen.entry(peer).or_default().observe(seq);
    }

    pub fn merge(&mut self, other: &Horizon) {
        for (peer, seen) in &other.seen {
            let mine = self.seen.entry(*peer).or_default();
            if seen.contiguous > mine.contiguous {
                mine.contiguous = seen.contiguous;
                let floor = mine.contiguous;
                mine.ahead.retain(|s| *s > floor);
                mine.compact();
            }
            for seq in &seen.ahead {
                mine.observe(*seq);
            }
        }
    }

    pub fn has_seen(&self, peer: &PeerId, seq: SeqNum) -> bool {
        self.seen.get(peer).map_or(false, |s| s.contains(seq))
    }

    /// True if a peer's stream has holes below its highest observed seq.
    pub fn has_gaps(&self, peer: &PeerId) -> bool {
        self.seen.get(peer).map_or(false, |s| !s.ahead.is_empty())
    }

    /// True if this horizon has seen everything `other` has seen.
    pub fn dominates(&self, other: &Horizon) -> bool {
        other
            .seen
            .iter()
            .all(|(p, seen)| seen.iter().all(|seq| self.has_seen(p, seq)))
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.seen.keys()
    }
}
