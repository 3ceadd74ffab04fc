//! Agent Pub/Sub
//!
//! Message bus, reflection protocol and tracker shared by every agent of
//! every article workflow in the process.

pub mod bus;
pub mod reflection;
pub mod tracker;
pub mod transport;
pub mod types;

pub use bus::{BusConfig, Callback, MessageBus};
pub use tracker::{ReflectionStats, ReflectionTracker, TrackerError};
pub use transport::{LogTransport, RedisTransport, Transport, TransportError, TransportStats};
pub use types::{
    Message, MessageType, Payload, ReflectionPriority, ReflectionRequest, ReflectionStatus,
};
