//! Tunnel and route configuration snapshots
//!
//! Both types are immutable snapshots handed to the engine's
//! `reconfigure`; the engine copies them on acceptance so later caller
//! mutation cannot affect applied state. Route configuration is opaque
//! to the engine core and passed through to the router collaborator
//! as-is.

use crate::key::{PrivateKey, PublicKey};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A single peer in the tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer identity
    pub public_key: PublicKey,
    /// Ranges this peer is allowed to route
    pub allowed_ips: Vec<IpNet>,
}

impl Peer {
    /// The allowed ranges covering exactly one host address
    ///
    /// These are the targets for post-handshake NAT-traversal probes.
    pub fn single_host_ips(&self) -> Vec<IpAddr> {
        single_host_ips(&self.allowed_ips)
    }
}

/// The subset of `nets` covering exactly one host address each
pub fn single_host_ips(nets: &[IpNet]) -> Vec<IpAddr> {
    nets.iter()
        .filter(|net| net.prefix_len() == net.max_prefix_len() && net.prefix_len() != 0)
        .map(|net| net.addr())
        .collect()
}

/// Desired cryptographic state of the tunnel device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Local private key
    pub private_key: PrivateKey,
    /// Local tunnel addresses; the first IPv4 entry is the probe source
    pub addresses: Vec<IpNet>,
    /// Desired peer set, in caller order
    pub peers: Vec<Peer>,
}

/// Desired routing state, applied by the router collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Routes to install toward the tunnel interface
    pub routes: Vec<IpNet>,
    /// Routes that stay on the local network
    pub local_routes: Vec<IpNet>,
}

/// Derive the idempotence key for a configuration pair
///
/// Two equal signatures mean a reconfiguration would be a no-op and no
/// collaborator should be touched.
pub fn config_signature(
    cfg: &TunnelConfig,
    routes: &RouteConfig,
) -> Result<String, serde_json::Error> {
    Ok(format!(
        "{} {}",
        serde_json::to_string(cfg)?,
        serde_json::to_string(routes)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> TunnelConfig {
        TunnelConfig {
            private_key: PrivateKey([1u8; 32]),
            addresses: vec!["100.64.0.1/32".parse().unwrap()],
            peers: vec![Peer {
                public_key: PublicKey([2u8; 32]),
                allowed_ips: vec!["100.64.0.2/32".parse().unwrap()],
            }],
        }
    }

    #[test]
    fn test_signature_stable_for_equal_configs() {
        let routes = RouteConfig::default();
        let a = config_signature(&sample_config(), &routes).unwrap();
        let b = config_signature(&sample_config(), &routes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_differs_on_route_change() {
        let cfg = sample_config();
        let a = config_signature(&cfg, &RouteConfig::default()).unwrap();
        let b = config_signature(
            &cfg,
            &RouteConfig {
                routes: vec!["10.0.0.0/8".parse().unwrap()],
                local_routes: vec![],
            },
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_differs_on_peer_change() {
        let routes = RouteConfig::default();
        let mut cfg = sample_config();
        let a = config_signature(&cfg, &routes).unwrap();
        cfg.peers[0].public_key = PublicKey([3u8; 32]);
        let b = config_signature(&cfg, &routes).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_host_ips() {
        let peer = Peer {
            public_key: PublicKey([2u8; 32]),
            allowed_ips: vec![
                "100.64.0.2/32".parse().unwrap(),
                "10.0.0.0/8".parse().unwrap(),
                "fd7a::2/128".parse().unwrap(),
            ],
        };
        let ips = peer.single_host_ips();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0], "100.64.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(ips[1], "fd7a::2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_single_host_ips_excludes_wide_ranges() {
        let peer = Peer {
            public_key: PublicKey([2u8; 32]),
            allowed_ips: vec!["0.0.0.0/0".parse().unwrap()],
        };
        assert!(peer.single_host_ips().is_empty());
    }
}
