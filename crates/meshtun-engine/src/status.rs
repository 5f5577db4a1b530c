//! Status polling and the coalescing dispatcher
//!
//! A status poll can block inside the device for a while, and bursts of
//! concurrent requests would all report the same thing anyway. Requests
//! therefore go through a single pending latch: setting it is absorbed
//! if a poll is already pending, and whichever task claims the latch
//! runs exactly one poll and delivers the result to the registered
//! observer. Callers never wait on each other's polls.

use meshtun_proto::{EngineStatus, PeerStatus, StatusAggregator};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::introspect::parse_state_dump;

impl Engine {
    /// Pull the device's introspection dump and build a fresh snapshot
    ///
    /// Runs under the primary guard so it cannot observe a half-applied
    /// reconfiguration. Output is reconciled against the peer sequence:
    /// every configured peer appears, in configuration order, with a
    /// zero-valued record when absent from the dump.
    pub(crate) async fn get_status(&self) -> Result<EngineStatus, EngineError> {
        let _guard = self.cfg.lock().await;

        let dump = self.tundev.state_dump().await?;
        let mut parsed = parse_state_dump(&dump)?;

        let (peers, local_addrs) = {
            let shared = self.shared_lock();
            if parsed.len() != shared.peer_sequence.len() {
                warn!(
                    "status dump returned {} peers, expected {}",
                    parsed.len(),
                    shared.peer_sequence.len()
                );
            }
            let peers = shared
                .peer_sequence
                .iter()
                .map(|key| parsed.remove(key).unwrap_or_else(|| PeerStatus::zero(*key)))
                .collect();
            (peers, shared.endpoints.clone())
        };

        Ok(EngineStatus {
            local_addrs,
            peers,
            relays: self.transport.relay_status(),
        })
    }

    /// Request a status refresh; fire-and-forget
    ///
    /// Concurrent requests coalesce: at most one poll runs per latch
    /// claim, and a caller whose claim is lost is satisfied by the
    /// in-flight poll it helped trigger, which is at least as fresh as
    /// the call itself. The result goes to the callback registered via
    /// `set_status_callback`, or is dropped if none is.
    pub fn request_status(self: &Arc<Self>) {
        self.poll_pending.store(true, Ordering::SeqCst);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if !engine.poll_pending.swap(false, Ordering::SeqCst) {
                // Another task claimed the latch and polls for us.
                return;
            }
            if engine.closed.load(Ordering::SeqCst) {
                return;
            }
            let result = engine.get_status().await;
            let callback = engine.shared_lock().status_callback.clone();
            match callback {
                Some(callback) => callback(result),
                None => debug!("status poll finished with no observer registered"),
            }
        });
    }

    /// Append this engine's per-peer statistics into a caller-supplied
    /// aggregator, then let the transport merge its own detail
    pub async fn update_status(&self, aggregator: &mut StatusAggregator) {
        let status = match self.get_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("update_status: {e}");
                return;
            }
        };

        for peer in &status.peers {
            let entry = aggregator.entry(peer.public_key);
            entry.rx_bytes = peer.rx_bytes;
            entry.tx_bytes = peer.tx_bytes;
            entry.last_handshake = peer.last_handshake;
            entry.in_engine = true;
        }

        self.transport.update_status(aggregator);
    }
}
