//! The userspace tunnel engine
//!
//! Binds the tunnel device, NAT-traversal transport, router, and link
//! monitor into one reconfigurable unit. All collaborators are injected
//! at construction; the engine holds no global state.

use meshtun_proto::{config_signature, single_host_ips, PublicKey, RouteConfig, TunnelConfig};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::traits::{
    LinkMonitor, LinkState, NatTransport, NetInfoCallback, PacketFilter, Router, StatusCallback,
    TunEvent, TunnelDevice,
};

/// Collaborators handed to [`Engine::new`]
pub struct EngineOptions {
    pub tundev: Arc<dyn TunnelDevice>,
    pub router: Arc<dyn Router>,
    pub transport: Arc<dyn NatTransport>,
    pub link_monitor: Arc<dyn LinkMonitor>,
}

/// State under the primary guard: the last applied configuration.
/// Serializes every device/router/transport configuration mutation and
/// the pinger's source-address read.
pub(crate) struct ConfigState {
    pub(crate) last_signature: Option<String>,
    pub(crate) last_config: Option<TunnelConfig>,
}

/// State under the secondary guard: small, frequently touched fields.
/// Never held across an await point.
pub(crate) struct SharedState {
    pub(crate) status_callback: Option<StatusCallback>,
    /// Peer public keys in last-applied configuration order; status
    /// output follows this order even when the introspection dump
    /// order differs
    pub(crate) peer_sequence: Vec<PublicKey>,
    /// Local endpoints last announced by the transport
    pub(crate) endpoints: Vec<String>,
    /// Cancellation handle per peer currently in its probing window
    pub(crate) pingers: HashMap<PublicKey, CancellationToken>,
    pub(crate) link_state: Option<LinkState>,
}

/// The tunnel orchestration engine
///
/// Lock ordering: `cfg` (primary), then `shared` (secondary). Any path
/// needing both must acquire them in this order; no path may take `cfg`
/// while holding `shared`.
pub struct Engine {
    pub(crate) tundev: Arc<dyn TunnelDevice>,
    pub(crate) router: Arc<dyn Router>,
    pub(crate) transport: Arc<dyn NatTransport>,
    pub(crate) link_mon: Arc<dyn LinkMonitor>,

    pub(crate) cfg: AsyncMutex<ConfigState>,
    pub(crate) shared: Mutex<SharedState>,

    /// Status dispatcher latch: true while a poll is pending
    pub(crate) poll_pending: AtomicBool,
    /// One-shot close guard
    pub(crate) closed: AtomicBool,
    /// Fires once `close` has finished tearing everything down
    pub(crate) shutdown: CancellationToken,
}

impl Engine {
    /// Wire up the engine around pre-created collaborators
    ///
    /// Registers the transport's endpoints callback, the device's
    /// handshake callback, the link monitor's change callback, and the
    /// device event loop, then brings the device and router up. All
    /// callbacks hold a `Weak` reference, so invocations that race
    /// construction or teardown are no-ops.
    pub async fn new(options: EngineOptions) -> Result<Arc<Self>, EngineError> {
        let EngineOptions {
            tundev,
            router,
            transport,
            link_monitor,
        } = options;

        let initial_link = match link_monitor.current_state() {
            Ok(mut state) => {
                state.remove_interface(tundev.name());
                Some(state)
            }
            Err(e) => {
                warn!("initial interface state unavailable: {e}");
                None
            }
        };

        let engine = Arc::new(Engine {
            tundev,
            router,
            transport,
            link_mon: link_monitor,
            cfg: AsyncMutex::new(ConfigState {
                last_signature: None,
                last_config: None,
            }),
            shared: Mutex::new(SharedState {
                status_callback: None,
                peer_sequence: Vec::new(),
                endpoints: Vec::new(),
                pingers: HashMap::new(),
                link_state: initial_link,
            }),
            poll_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&engine);
        engine.transport.set_endpoints_callback(Box::new(move |endpoints| {
            if let Some(engine) = weak.upgrade() {
                engine.shared_lock().endpoints = endpoints;
                engine.request_status();
            }
        }));

        // Handshake completions arrive synchronously from inside the
        // device's own processing. Everything here must stay an
        // independent scheduling hop away from the device: the status
        // poll and the pinger both run on spawned tasks.
        let weak = Arc::downgrade(&engine);
        engine.tundev.set_handshake_callback(Box::new(move |peer, allowed_ips| {
            let Some(engine) = weak.upgrade() else { return };
            engine.request_status();

            let ips: Vec<IpAddr> = single_host_ips(&allowed_ips);
            if ips.is_empty() {
                warn!(
                    "[unexpected] peer {} has no single-IP routes: {:?}",
                    peer.short(),
                    allowed_ips
                );
                return;
            }
            tokio::spawn(async move { engine.run_pinger(peer, ips).await });
        }));

        let weak = Arc::downgrade(&engine);
        let mut events = engine.tundev.subscribe_events();
        let shutdown = engine.shutdown.clone();
        tokio::spawn(async move {
            let mut up = false;
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(engine) = weak.upgrade() else { break };
                match event {
                    TunEvent::MtuUpdate(mtu) => info!("tunnel device mtu: {mtu}"),
                    TunEvent::Up if !up => {
                        info!("tunnel device: up");
                        engine.request_status();
                        up = true;
                    }
                    TunEvent::Down if up => {
                        info!("tunnel device: down");
                        engine.request_status();
                        up = false;
                    }
                    TunEvent::Up | TunEvent::Down => {}
                }
            }
        });

        let weak = Arc::downgrade(&engine);
        engine.link_mon.subscribe(Box::new(move || {
            if let Some(engine) = weak.upgrade() {
                tokio::spawn(async move { engine.link_change(false).await });
            }
        }));

        // Any construction failure past this point leaves the device
        // closed, not half-up.
        if let Err(e) = engine.tundev.up().await {
            engine.tundev.close().await;
            return Err(e.into());
        }
        if let Err(e) = engine.router.up().await {
            engine.tundev.close().await;
            return Err(e.into());
        }
        engine.link_mon.start();

        info!(
            "userspace tunnel engine started (device {})",
            engine.tundev.name()
        );
        Ok(engine)
    }

    /// Acquire the secondary guard, recovering from poisoning
    pub(crate) fn shared_lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a new tunnel and route configuration
    ///
    /// Returns [`EngineError::NoChange`] when the configuration pair is
    /// identical to the applied one; no collaborator is touched in that
    /// case. Otherwise applies, strictly in order: transport private
    /// key (best effort), device crypto state (hard failure), transport
    /// peer set, routes (hard failure). The transport must hold the new
    /// key before the device starts handshakes that may need the relay
    /// fallback, and routes assume crypto/peer state is already
    /// consistent, hence the ordering.
    pub async fn reconfigure(
        &self,
        config: &TunnelConfig,
        routes: &RouteConfig,
    ) -> Result<(), EngineError> {
        let mut state = self.cfg.lock().await;

        let signature = config_signature(config, routes)?;
        if state.last_signature.as_deref() == Some(signature.as_str()) {
            return Err(EngineError::NoChange);
        }

        info!(
            "reconfigure: applying configuration ({} peers)",
            config.peers.len()
        );
        state.last_signature = Some(signature);
        state.last_config = Some(config.clone());

        let mut peer_set = HashSet::with_capacity(config.peers.len());
        {
            let mut shared = self.shared_lock();
            shared.peer_sequence.clear();
            for peer in &config.peers {
                shared.peer_sequence.push(peer.public_key);
                peer_set.insert(peer.public_key);
            }
        }

        // A stale transport key still lets later steps succeed; the
        // problem surfaces via failed handshakes rather than here.
        if let Err(e) = self.transport.set_private_key(config.private_key).await {
            warn!("reconfigure: transport private key update failed: {e}");
        }

        self.tundev.reconfigure(config).await?;
        self.transport.update_peers(peer_set).await;
        self.router.apply(routes).await?;

        info!("reconfigure: done");
        Ok(())
    }

    /// Current packet filter, as held by the device
    pub fn get_filter(&self) -> Option<Arc<dyn PacketFilter>> {
        self.tundev.filter()
    }

    pub fn set_filter(&self, filter: Arc<dyn PacketFilter>) {
        self.tundev.set_filter(filter);
    }

    /// Register the single observer for status poll results
    pub fn set_status_callback(&self, callback: StatusCallback) {
        self.shared_lock().status_callback = Some(callback);
    }

    pub fn set_net_info_callback(&self, callback: NetInfoCallback) {
        self.transport.set_net_info_callback(callback);
    }

    pub fn set_relay_enabled(&self, enabled: bool) {
        self.transport.set_relay_enabled(enabled);
    }

    /// Peers currently inside their post-handshake probing window
    pub fn active_probe_peers(&self) -> Vec<PublicKey> {
        self.shared_lock().pingers.keys().copied().collect()
    }

    /// Tear the engine down
    ///
    /// Intended to run once; repeated calls are a logged no-op. All
    /// outstanding pingers are cancelled before any collaborator is
    /// closed, so no pinger can touch a closed device.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("close: engine already closed");
            return;
        }
        debug!("close: shutting down");

        {
            let mut shared = self.shared_lock();
            for (_, handle) in shared.pingers.drain() {
                handle.cancel();
            }
        }

        if let Err(e) = self.tundev.clear_config().await {
            warn!("close: clearing device config: {e}");
        }
        self.tundev.close().await;
        self.link_mon.close();
        if let Err(e) = self.router.close().await {
            warn!("close: router: {e}");
        }
        self.transport.close().await;

        self.shutdown.cancel();
    }

    /// Block until [`close`](Engine::close) has finished its teardown
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
    }
}
