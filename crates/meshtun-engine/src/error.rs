//! Engine error taxonomy
//!
//! `NoChange` is an expected no-op outcome, signaled distinctly so
//! callers can skip redundant logging. Device and router failures abort
//! a reconfiguration and surface here; no partial rollback is attempted.

use crate::introspect::IntrospectError;
use crate::traits::{DeviceError, RouterError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The submitted configuration is identical to the applied one;
    /// nothing was touched
    #[error("no config changes")]
    NoChange,

    #[error("tunnel device: {0}")]
    Device(#[from] DeviceError),

    #[error("router: {0}")]
    Router(#[from] RouterError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("status dump: {0}")]
    Introspect(#[from] IntrospectError),

    #[error("config serialization: {0}")]
    Signature(#[from] serde_json::Error),
}

impl EngineError {
    /// True for the expected reapply-identical-config outcome
    pub fn is_no_change(&self) -> bool {
        matches!(self, EngineError::NoChange)
    }
}
