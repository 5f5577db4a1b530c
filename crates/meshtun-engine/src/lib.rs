//! Userspace tunnel orchestration engine
//!
//! Binds a virtual network interface, a cryptographic tunnel device, a
//! NAT-traversal transport, and an OS routing layer into one coherent,
//! reconfigurable unit driven by a control plane. The engine itself
//! performs no cryptography, packet I/O, or routing syscalls; those
//! live behind the collaborator traits in [`traits`].

pub mod engine;
pub mod error;
pub mod introspect;
mod link;
mod pinger;
mod probe;
mod status;
pub mod traits;

pub use engine::{Engine, EngineOptions};
pub use error::EngineError;
pub use introspect::IntrospectError;
pub use traits::{
    DeviceError, FilterVerdict, LinkMonitor, LinkState, MonitorError, NatTransport, PacketFilter,
    Router, RouterError, StatusCallback, TransportError, TunEvent, TunnelDevice,
};
