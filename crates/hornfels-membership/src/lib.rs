//! hornfels-membership: cluster peer cache for `Hornfels`
//!
//! The peer cache is the process-wide view of the other nodes in the
//! cluster: cluster members proper, plus remote (agent-proxied) nodes that
//! never join the membership layer but still run resources. The controller
//! borrows peer records for the duration of a single dispatch; the cache
//! owns them.
//!
//! Mutation funnels through [`PeerCache::update_state`] and
//! [`PeerCache::update_expected`] so every membership transition is logged
//! in one place.

use std::collections::HashMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// Peer Records
// ============================================================================

/// Membership state of a peer as last reported by the cluster layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Never seen, or membership information not yet received.
    #[default]
    Unknown,
    /// In the current membership.
    Member,
    /// Dropped out of the membership.
    Lost,
}

impl Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Unknown => "unknown",
            PeerState::Member => "member",
            PeerState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// What the join protocol expects this peer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinExpectation {
    /// The peer is expected to leave the cluster.
    Down,
    /// The peer has been offered membership and has not yet answered.
    Pending,
    /// The peer completed the join round.
    Member,
    /// The peer's join was refused.
    Nack,
}

impl Display for JoinExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinExpectation::Down => "down",
            JoinExpectation::Pending => "pending",
            JoinExpectation::Member => "member",
            JoinExpectation::Nack => "nack",
        };
        f.write_str(name)
    }
}

/// Peer attribute bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFlags(u32);

impl PeerFlags {
    /// No flags set.
    pub const NONE: PeerFlags = PeerFlags(0);
    /// The peer is a remote node, not a full cluster member.
    pub const REMOTE: PeerFlags = PeerFlags(1 << 0);

    /// Returns whether every bit in `other` is set in `self`.
    pub fn contains(self, other: PeerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `self` with the bits of `other` set.
    pub fn with(self, other: PeerFlags) -> PeerFlags {
        PeerFlags(self.0 | other.0)
    }
}

/// A known cluster or remote node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Transport-layer node id; 0 when the transport has not assigned one.
    pub id: u32,
    /// Human node name.
    pub uname: String,
    /// Stable node identifier, resolved lazily from the configuration store.
    pub uuid: Option<String>,
    /// Last reported membership state.
    pub state: PeerState,
    /// Attribute bits.
    pub flags: PeerFlags,
    /// Expected next join-protocol move, if the DC has one on record.
    pub expected: Option<JoinExpectation>,
}

impl Peer {
    fn new(uname: &str, flags: PeerFlags) -> Self {
        Self {
            id: 0,
            uname: uname.to_string(),
            uuid: None,
            state: PeerState::Unknown,
            flags,
            expected: None,
        }
    }

    /// Returns whether this peer is a remote node.
    pub fn is_remote(&self) -> bool {
        self.flags.contains(PeerFlags::REMOTE)
    }
}

// ============================================================================
// Peer Cache
// ============================================================================

/// Process-wide cache of cluster and remote peers.
///
/// Cluster peers and remote peers live in separate tables because their
/// lifecycles differ: cluster peers come and go with membership events,
/// remote peers with resource state. Lookups that serve diagnostics
/// ([`PeerCache::find_any`]) search both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerCache {
    cluster: HashMap<String, Peer>,
    remote: HashMap<String, Peer>,
    fence_failures: HashMap<String, u32>,
}

impl PeerCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a cluster peer by name, falling back to transport id.
    ///
    /// A name takes precedence when both are given; an id of 0 never
    /// matches.
    pub fn find(&self, id: u32, uname: Option<&str>) -> Option<&Peer> {
        if let Some(name) = uname {
            return self.cluster.get(name);
        }
        if id == 0 {
            return None;
        }
        self.cluster.values().find(|p| p.id == id)
    }

    /// Looks up a peer of any kind, remote nodes first.
    pub fn find_any(&self, id: u32, uname: Option<&str>) -> Option<&Peer> {
        if let Some(name) = uname
            && let Some(peer) = self.remote.get(name)
        {
            return Some(peer);
        }
        self.find(id, uname)
    }

    /// Returns the cluster peer entry for `uname`, creating it if absent.
    pub fn cluster_peer(&mut self, uname: &str) -> &mut Peer {
        self.cluster
            .entry(uname.to_string())
            .or_insert_with(|| Peer::new(uname, PeerFlags::NONE))
    }

    /// Returns the remote peer entry for `uname`, creating it if absent.
    pub fn remote_peer(&mut self, uname: &str) -> &mut Peer {
        self.remote
            .entry(uname.to_string())
            .or_insert_with(|| Peer::new(uname, PeerFlags::REMOTE))
    }

    /// Records a membership state transition for `uname`.
    ///
    /// Remote peers are updated in the remote table; everything else in the
    /// cluster table (creating the entry on first sight).
    pub fn update_state(&mut self, uname: &str, state: PeerState) {
        let is_remote = self.remote.contains_key(uname);
        let peer = if is_remote {
            let Some(peer) = self.remote.get_mut(uname) else {
                return;
            };
            peer
        } else {
            self.cluster_peer(uname)
        };
        if peer.state != state {
            info!(node = %uname, from = %peer.state, to = %state, "peer state change");
            peer.state = state;
        }
    }

    /// Records the DC's expectation for a peer's next join-protocol move.
    pub fn update_expected(&mut self, uname: &str, expected: JoinExpectation) {
        let peer = self.cluster_peer(uname);
        if peer.expected != Some(expected) {
            debug!(node = %uname, expected = %expected, "peer join expectation change");
            peer.expected = Some(expected);
        }
    }

    /// Fills in a peer's stable identifier using `resolve` if it is missing.
    ///
    /// `resolve` is typically backed by the configuration store's
    /// node-uuid query; the cache stays agnostic of that client.
    pub fn ensure_uuid(
        &mut self,
        uname: &str,
        resolve: impl FnOnce(&str) -> Option<String>,
    ) -> Option<&str> {
        let peer = self.cluster_peer(uname);
        if peer.uuid.is_none() {
            peer.uuid = resolve(uname);
        }
        peer.uuid.as_deref()
    }

    /// Drops a node from the cluster cache, by name or transport id.
    ///
    /// Fencing failure counters for the node are reset too, so a node later
    /// re-added under the same name starts clean.
    pub fn evict(&mut self, id: u32, uname: Option<&str>) {
        let name = match uname {
            Some(name) => Some(name.to_string()),
            None => self
                .cluster
                .values()
                .find(|p| id != 0 && p.id == id)
                .map(|p| p.uname.clone()),
        };
        let Some(name) = name else {
            debug!(id, "no cached peer to evict");
            return;
        };
        if self.cluster.remove(&name).is_some() {
            info!(node = %name, "evicted peer from cache");
        }
        self.reset_fence_failures(&name);
    }

    /// Counts a failed fencing attempt against a node.
    pub fn record_fence_failure(&mut self, uname: &str) {
        *self.fence_failures.entry(uname.to_string()).or_insert(0) += 1;
    }

    /// Returns the recorded fencing failures for a node.
    pub fn fence_failures(&self, uname: &str) -> u32 {
        self.fence_failures.get(uname).copied().unwrap_or(0)
    }

    /// Forgets fencing failures for a node.
    pub fn reset_fence_failures(&mut self, uname: &str) {
        if self.fence_failures.remove(uname).is_some() {
            debug!(node = %uname, "reset fencing failure count");
        }
    }

    /// Number of cached cluster peers.
    pub fn len(&self) -> usize {
        self.cluster.len()
    }

    /// Returns whether the cluster cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cluster.is_empty()
    }
}
