//! Post-handshake NAT-traversal pinger
//!
//! After each successful handshake the engine injects synthetic probe
//! packets toward the peer's single-host routes for a bounded window.
//! The transport's path-discovery spray only acts on packets it sees,
//! so these probes guarantee early path observations even when no real
//! application traffic flows yet.

use ipnet::IpNet;
use meshtun_proto::PublicKey;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::probe;

/// Probe cadence; kept shorter than the transport's spray interval so
/// every probe is spray-eligible
const PROBE_CADENCE: Duration = Duration::from_millis(300);

/// Total probing window after a handshake
const PROBE_WINDOW: Duration = Duration::from_secs(3);

fn first_ipv4(nets: &[IpNet]) -> Option<Ipv4Addr> {
    nets.iter().find_map(|net| match net.addr() {
        IpAddr::V4(addr) => Some(addr),
        IpAddr::V6(_) => None,
    })
}

impl Engine {
    /// Probe a peer's single-host routes for a bounded window
    ///
    /// Supersedes any running pinger for the same peer. Ends on
    /// cancellation (shutdown or a newer handshake) or window expiry;
    /// whichever side observes the cancellation owns the handle
    /// removal, so the handle is removed exactly once.
    pub(crate) async fn run_pinger(self: Arc<Self>, peer: PublicKey, ips: Vec<IpAddr>) {
        info!("generating probe traffic to {} ({:?})", peer.short(), ips);

        let src = {
            let state = self.cfg.lock().await;
            state
                .last_config
                .as_ref()
                .and_then(|config| first_ipv4(&config.addresses))
        };
        let Some(src) = src else {
            info!("probe traffic to {}: no local IPv4 address", peer.short());
            return;
        };

        let dsts: Vec<Ipv4Addr> = ips
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(addr) => Some(*addr),
                IpAddr::V6(_) => None,
            })
            .collect();
        if dsts.is_empty() {
            debug!("probe traffic to {}: no IPv4 destinations", peer.short());
            return;
        }

        let token = CancellationToken::new();
        {
            let mut shared = self.shared_lock();
            if let Some(old) = shared.pingers.insert(peer, token.clone()) {
                // A renewed handshake supersedes the older window.
                old.cancel();
            }
        }

        let start = Instant::now();
        let mut ticker = tokio::time::interval(PROBE_CADENCE);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // the first tick completes immediately

        let mut ident: u16 = 1;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if start.elapsed() > PROBE_WINDOW {
                        break;
                    }
                    for dst in &dsts {
                        self.tundev.inject_outbound(probe::echo_request(src, *dst, ident));
                    }
                    ident = ident.wrapping_add(1);
                }
            }
        }

        // Cancellation means the canceller already removed (or
        // replaced) the handle; removing here again could delete a
        // successor's entry. The check and removal share the guard, so
        // there is no window for a double delete.
        let mut shared = self.shared_lock();
        if !token.is_cancelled() {
            shared.pingers.remove(&peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_ipv4_skips_v6() {
        let nets: Vec<IpNet> = vec![
            "fd00::1/128".parse().unwrap(),
            "100.64.0.1/32".parse().unwrap(),
        ];
        assert_eq!(first_ipv4(&nets), Some("100.64.0.1".parse().unwrap()));
        assert_eq!(first_ipv4(&nets[..1]), None);
    }
}
