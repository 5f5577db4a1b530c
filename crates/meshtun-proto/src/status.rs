//! Status snapshot and aggregation types
//!
//! An [`EngineStatus`] is constructed fresh on every status poll and
//! never cached. The [`StatusAggregator`] is a caller-supplied sink the
//! engine and the NAT-traversal transport both append per-peer detail
//! into.

use crate::key::PublicKey;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Per-peer statistics decoded from the tunnel device's introspection dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    /// Peer identity
    pub public_key: PublicKey,
    /// Bytes received from this peer
    pub rx_bytes: u64,
    /// Bytes transmitted to this peer
    pub tx_bytes: u64,
    /// Completion time of the most recent handshake; `None` means the
    /// peer has never handshaked
    pub last_handshake: Option<SystemTime>,
}

impl PeerStatus {
    /// A zero-valued record for a configured peer absent from the dump
    pub fn zero(public_key: PublicKey) -> Self {
        Self {
            public_key,
            rx_bytes: 0,
            tx_bytes: 0,
            last_handshake: None,
        }
    }
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self::zero(PublicKey([0u8; 32]))
    }
}

/// Reachability of one fallback relay server, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    /// Relay server name or address
    pub server: String,
    /// Whether a connection to it is currently established
    pub connected: bool,
}

/// One full status snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    /// Local transport endpoints, as last announced by the transport
    pub local_addrs: Vec<String>,
    /// Per-peer statistics, ordered by the last applied configuration
    pub peers: Vec<PeerStatus>,
    /// Relay-server state snapshot
    pub relays: Vec<RelayStatus>,
}

/// One peer's entry in a [`StatusAggregator`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerEntry {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake: Option<SystemTime>,
    /// Whether the peer is present in this engine's applied configuration
    pub in_engine: bool,
    /// Relay server currently carrying traffic for this peer, if any
    pub relay: Option<String>,
}

/// Caller-supplied aggregator for `update_status`
///
/// Entries are keyed and iterated in public-key order so repeated
/// aggregations are deterministic.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    peers: BTreeMap<PublicKey, PeerEntry>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the entry for a peer
    pub fn entry(&mut self, key: PublicKey) -> &mut PeerEntry {
        self.peers.entry(key).or_default()
    }

    /// Iterate all aggregated peers
    pub fn peers(&self) -> impl Iterator<Item = (&PublicKey, &PeerEntry)> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// NAT characteristics discovered by the transport, passed through to a
/// registered control-plane callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetInfo {
    /// Whether direct UDP appears to work on the current link
    pub working_udp: Option<bool>,
    /// Relay server with the lowest observed latency
    pub preferred_relay: Option<String>,
}
