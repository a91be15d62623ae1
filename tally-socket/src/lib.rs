//! Tally Socket - resilient real-time event client.
//!
//! This crate provides the connection manager that handles:
//! - An authenticated handshake on every fresh transport
//! - Automatic reconnection with exponential backoff and jitter
//! - Heartbeat probes with stale-connection detection
//! - Subscription replay after every reconnect
//! - Event classification into typed broadcast streams

pub mod auth;
pub mod envelope;
pub mod events;
pub mod heartbeat;
pub mod manager;
pub mod policy;
pub mod router;
pub mod subscriptions;
pub mod transport;

// Re-export key types
pub use auth::{AuthOutcome, Credentials};
pub use envelope::{Envelope, FrameType};
pub use events::{
    ClientError, ConnectionState, ErrorKind, EventCategory, EventStreams, RealtimeEvent,
    TypingIndicator,
};
pub use heartbeat::HeartbeatConfig;
pub use manager::{DisconnectMode, SocketManager, SocketOptions};
pub use policy::ReconnectConfig;
pub use router::{classify, EventRouter};
pub use transport::{
    Connector, Frame, MemoryConnector, MemoryPeer, MemoryServer, Transport, WsConnector,
};
