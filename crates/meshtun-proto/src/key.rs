//! Curve25519 key wrappers
//!
//! The engine never performs cryptography itself; keys are opaque
//! 32-byte identities handed to the tunnel device and the NAT-traversal
//! transport. Public keys travel hex-encoded in the device's
//! introspection dump.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key must be 32 bytes, got {0}")]
    BadLength(usize),

    #[error("invalid hex encoding: {0}")]
    BadHex(String),
}

/// A peer's public identity key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Decode from the hex form used by the introspection wire format
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|e| KeyError::BadHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Hex encoding, as emitted by the tunnel device
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> String {
        let full = self.to_hex();
        format!("[{}]", &full[..8])
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.short())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// The local node's private key
///
/// Debug/Display never print key material.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey(pub [u8; 32]);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}
