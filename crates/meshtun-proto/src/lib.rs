//! Shared data model for the meshtun engine
//!
//! Defines the key types, tunnel/route configuration snapshots, and the
//! status types exchanged between the engine and its control plane.

pub mod config;
pub mod key;
pub mod status;

pub use config::{config_signature, single_host_ips, Peer, RouteConfig, TunnelConfig};
pub use key::{KeyError, PrivateKey, PublicKey};
pub use status::{
    EngineStatus, NetInfo, PeerEntry, PeerStatus, RelayStatus, StatusAggregator,
};
