//! Collaborator interfaces consumed by the engine
//!
//! The engine orchestrates four external subsystems it does not
//! implement: the cryptographic tunnel device, the OS routing layer,
//! the NAT-traversal transport, and the host link monitor. Each is
//! injected at construction as a trait object; the engine owns them
//! exclusively and mutates their configuration only under its primary
//! guard.

use async_trait::async_trait;
use ipnet::IpNet;
use meshtun_proto::{
    EngineStatus, NetInfo, PrivateKey, PublicKey, RelayStatus, RouteConfig, StatusAggregator,
    TunnelConfig,
};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Invoked by the tunnel device when a handshake with a peer completes.
/// Dispatched synchronously from inside the device's own processing, so
/// implementations must hand real work off to an independent task.
pub type HandshakeCallback = Box<dyn Fn(PublicKey, Vec<IpNet>) + Send + Sync>;

/// Invoked by the transport when its set of local endpoints changes
pub type EndpointsCallback = Box<dyn Fn(Vec<String>) + Send + Sync>;

/// Invoked by the transport when discovered NAT characteristics change
pub type NetInfoCallback = Box<dyn Fn(NetInfo) + Send + Sync>;

/// Invoked by the link monitor on every detected host network change
pub type LinkChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Receives the outcome of each status poll
pub type StatusCallback = Arc<dyn Fn(Result<EngineStatus, EngineError>) + Send + Sync>;

/// Tunnel device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device I/O error: {0}")]
    Io(String),

    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),

    #[error("device is closed")]
    Closed,
}

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to apply routes: {0}")]
    ApplyFailed(String),

    #[error("router I/O error: {0}")]
    Io(String),
}

/// NAT-traversal transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid key material: {0}")]
    KeyError(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Link monitor errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("interface state unavailable: {0}")]
    Unavailable(String),
}

/// Interface lifecycle notifications from the tunnel device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunEvent {
    Up,
    Down,
    MtuUpdate(u32),
}

/// Verdict returned by the packet-filtering engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Drop,
}

/// Opaque handle to the packet-filtering engine. The engine core only
/// stores and forwards filters; filtering itself happens in the device's
/// data path.
pub trait PacketFilter: Send + Sync {
    fn check(&self, packet: &[u8]) -> FilterVerdict;
}

/// Snapshot of host network interfaces, compared by value to classify
/// link changes. Replaced wholesale on every observation, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    /// Interface name to assigned addresses
    pub interfaces: BTreeMap<String, Vec<IpAddr>>,
    /// Whether the current link is metered
    pub is_expensive: bool,
}

impl LinkState {
    /// Drop an interface from the snapshot. Used to exclude the tunnel's
    /// own interface, which would otherwise make every reconfiguration
    /// look like a host network change.
    pub fn remove_interface(&mut self, name: &str) {
        self.interfaces.remove(name);
    }
}

/// The cryptographic tunnel device
#[async_trait]
pub trait TunnelDevice: Send + Sync {
    /// OS-level interface name
    fn name(&self) -> &str;

    async fn up(&self) -> Result<(), DeviceError>;

    /// Replace the device's cryptographic state with the full config
    async fn reconfigure(&self, config: &TunnelConfig) -> Result<(), DeviceError>;

    /// Wipe key material and peer state ahead of shutdown
    async fn clear_config(&self) -> Result<(), DeviceError>;

    /// Pull the line-oriented introspection dump (`key=value` per line)
    async fn state_dump(&self) -> Result<String, DeviceError>;

    /// Inject a packet into the device's outbound (encrypting) path.
    /// Infallible to the caller; the device logs its own errors.
    fn inject_outbound(&self, packet: Vec<u8>);

    fn set_handshake_callback(&self, callback: HandshakeCallback);

    /// Interface up/down/MTU notifications
    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<TunEvent>;

    fn filter(&self) -> Option<Arc<dyn PacketFilter>>;

    fn set_filter(&self, filter: Arc<dyn PacketFilter>);

    async fn close(&self);
}

/// The OS routing layer
#[async_trait]
pub trait Router: Send + Sync {
    async fn up(&self) -> Result<(), RouterError>;

    /// Make the OS routing state match the given configuration
    async fn apply(&self, config: &RouteConfig) -> Result<(), RouterError>;

    async fn close(&self) -> Result<(), RouterError>;
}

/// The NAT-traversal transport (sockets, path discovery, relay fallback)
#[async_trait]
pub trait NatTransport: Send + Sync {
    /// Update local key material, needed for relay authentication before
    /// the device starts handshaking
    async fn set_private_key(&self, key: PrivateKey) -> Result<(), TransportError>;

    /// Replace the set of peer identities the transport tracks paths for
    async fn update_peers(&self, peers: HashSet<PublicKey>);

    /// Tear down and re-create sockets (major link change)
    async fn rebind(&self);

    /// Re-run NAT discovery, keeping existing sockets
    async fn rediscover(&self, why: &str);

    /// Current relay-server reachability snapshot
    fn relay_status(&self) -> Vec<RelayStatus>;

    fn set_endpoints_callback(&self, callback: EndpointsCallback);

    fn set_net_info_callback(&self, callback: NetInfoCallback);

    fn set_relay_enabled(&self, enabled: bool);

    /// Merge transport-level per-peer detail into a status aggregation
    fn update_status(&self, aggregator: &mut StatusAggregator);

    async fn close(&self);
}

/// The host network link monitor
pub trait LinkMonitor: Send + Sync {
    /// Read the current host interface state
    fn current_state(&self) -> Result<LinkState, MonitorError>;

    /// Register the change callback; must be called before `start`
    fn subscribe(&self, callback: LinkChangeCallback);

    fn start(&self);

    fn close(&self);
}
