//! Introspection dump parser
//!
//! The tunnel device exposes its state as a pull-based, line-oriented
//! ASCII dump: one `key=value` statement (or bare key) per line,
//! terminated by an empty line or end of input. A `public_key` line
//! starts a new peer record; subsequent keyed lines populate the most
//! recent record. Unrecognized keys are ignored so the device can grow
//! its dump format without breaking the engine.
//!
//! Malformed keys and numbers are reported as a recoverable poll
//! failure through the normal error channel rather than aborting the
//! process; this is a pull protocol, not a security boundary.

use meshtun_proto::{PeerStatus, PublicKey};
use std::collections::HashMap;
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;

/// Introspection dump decode errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntrospectError {
    #[error("invalid public key in status dump: {0:?}")]
    InvalidKey(String),

    #[error("invalid {field} in status dump: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, IntrospectError> {
    value.parse().map_err(|_| IntrospectError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Decode a full introspection dump into per-peer records
///
/// Keyed lines seen before the first `public_key` are validated but
/// discarded. The handshake timestamp only materializes once the nsec
/// field arrives and combines with the previously seen sec field; both
/// zero means the peer has never handshaked. A sub-second count of a
/// full second or more, or a seconds value that does not fit in a
/// timestamp, is malformed.
pub fn parse_state_dump(dump: &str) -> Result<HashMap<PublicKey, PeerStatus>, IntrospectError> {
    let mut peers = HashMap::new();
    let mut current: Option<(PublicKey, PeerStatus)> = None;
    let mut handshake_sec: u64 = 0;

    for line in dump.lines() {
        if line.is_empty() {
            break;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key, value),
            None => (line, ""),
        };
        match key {
            "public_key" => {
                if let Some((pk, record)) = current.take() {
                    peers.insert(pk, record);
                }
                let pk = PublicKey::from_hex(value)
                    .map_err(|_| IntrospectError::InvalidKey(value.to_string()))?;
                current = Some((pk, PeerStatus::zero(pk)));
            }
            "rx_bytes" => {
                let n = parse_u64("rx_bytes", value)?;
                if let Some((_, record)) = current.as_mut() {
                    record.rx_bytes = n;
                }
            }
            "tx_bytes" => {
                let n = parse_u64("tx_bytes", value)?;
                if let Some((_, record)) = current.as_mut() {
                    record.tx_bytes = n;
                }
            }
            "last_handshake_time_sec" => {
                handshake_sec = parse_u64("last_handshake_time_sec", value)?;
            }
            "last_handshake_time_nsec" => {
                let nsec = parse_u64("last_handshake_time_nsec", value)?;
                if nsec >= 1_000_000_000 {
                    return Err(IntrospectError::InvalidNumber {
                        field: "last_handshake_time_nsec",
                        value: value.to_string(),
                    });
                }
                if let Some((_, record)) = current.as_mut() {
                    if handshake_sec != 0 || nsec != 0 {
                        let when = UNIX_EPOCH
                            .checked_add(Duration::new(handshake_sec, nsec as u32))
                            .ok_or_else(|| IntrospectError::InvalidNumber {
                                field: "last_handshake_time_sec",
                                value: handshake_sec.to_string(),
                            })?;
                        record.last_handshake = Some(when);
                    }
                }
            }
            _ => {}
        }
    }
    if let Some((pk, record)) = current.take() {
        peers.insert(pk, record);
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey([byte; 32])
    }

    #[test]
    fn test_parse_two_peers() {
        let dump = format!(
            "private_key=deadbeef\n\
             listen_port=41641\n\
             public_key={}\n\
             rx_bytes=100\n\
             tx_bytes=200\n\
             last_handshake_time_sec=1700000000\n\
             last_handshake_time_nsec=500\n\
             public_key={}\n\
             rx_bytes=1\n\
             tx_bytes=2\n\
             last_handshake_time_sec=0\n\
             last_handshake_time_nsec=0\n",
            key(1).to_hex(),
            key(2).to_hex(),
        );
        let peers = parse_state_dump(&dump).unwrap();
        assert_eq!(peers.len(), 2);

        let first = &peers[&key(1)];
        assert_eq!(first.rx_bytes, 100);
        assert_eq!(first.tx_bytes, 200);
        assert_eq!(
            first.last_handshake,
            Some(UNIX_EPOCH + Duration::new(1_700_000_000, 500))
        );

        let second = &peers[&key(2)];
        assert_eq!(second.rx_bytes, 1);
        assert_eq!(second.tx_bytes, 2);
        assert!(second.last_handshake.is_none(), "zero sec+nsec means never");
    }

    #[test]
    fn test_unrecognized_keys_ignored() {
        let dump = format!(
            "public_key={}\nendpoint=1.2.3.4:5\npersistent_keepalive_interval=25\nrx_bytes=7\n",
            key(3).to_hex()
        );
        let peers = parse_state_dump(&dump).unwrap();
        assert_eq!(peers[&key(3)].rx_bytes, 7);
    }

    #[test]
    fn test_bare_key_line() {
        let dump = format!("protocol_version\npublic_key={}\n", key(4).to_hex());
        let peers = parse_state_dump(&dump).unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_fields_before_first_peer_discarded() {
        let dump = format!("rx_bytes=500\npublic_key={}\nrx_bytes=9\n", key(5).to_hex());
        let peers = parse_state_dump(&dump).unwrap();
        assert_eq!(peers[&key(5)].rx_bytes, 9);
    }

    #[test]
    fn test_fields_before_first_peer_still_validated() {
        let result = parse_state_dump("rx_bytes=banana\n");
        assert_eq!(
            result,
            Err(IntrospectError::InvalidNumber {
                field: "rx_bytes",
                value: "banana".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_key_is_recoverable_error() {
        let result = parse_state_dump("public_key=nothex\n");
        assert_eq!(result, Err(IntrospectError::InvalidKey("nothex".to_string())));
    }

    #[test]
    fn test_empty_line_terminates() {
        let dump = format!(
            "public_key={}\nrx_bytes=1\n\npublic_key={}\n",
            key(6).to_hex(),
            key(7).to_hex()
        );
        let peers = parse_state_dump(&dump).unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers.contains_key(&key(6)));
    }

    #[test]
    fn test_empty_dump() {
        assert!(parse_state_dump("").unwrap().is_empty());
    }

    #[test]
    fn test_handshake_sec_overflow_is_error() {
        let dump = format!(
            "public_key={}\nlast_handshake_time_sec={}\nlast_handshake_time_nsec=1\n",
            key(8).to_hex(),
            u64::MAX,
        );
        let result = parse_state_dump(&dump);
        assert_eq!(
            result,
            Err(IntrospectError::InvalidNumber {
                field: "last_handshake_time_sec",
                value: u64::MAX.to_string(),
            })
        );
    }

    #[test]
    fn test_handshake_nsec_out_of_range_is_error() {
        // 2^32 would truncate to 0 if cast blindly.
        let dump = format!(
            "public_key={}\nlast_handshake_time_sec=0\nlast_handshake_time_nsec=4294967296\n",
            key(8).to_hex()
        );
        let result = parse_state_dump(&dump);
        assert_eq!(
            result,
            Err(IntrospectError::InvalidNumber {
                field: "last_handshake_time_nsec",
                value: "4294967296".to_string(),
            })
        );
    }

    #[test]
    fn test_handshake_nsec_at_range_edge() {
        let dump = format!(
            "public_key={}\nlast_handshake_time_sec=1\nlast_handshake_time_nsec=999999999\n",
            key(8).to_hex()
        );
        let peers = parse_state_dump(&dump).unwrap();
        assert_eq!(
            peers[&key(8)].last_handshake,
            Some(UNIX_EPOCH + Duration::new(1, 999_999_999))
        );
    }
}
