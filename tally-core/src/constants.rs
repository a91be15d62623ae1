//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Tally";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default heartbeat probe interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default time allowed for the server to acknowledge credentials.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for the transport to open.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Default capacity of the bounded outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default capacity of each broadcast output stream.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Maximum number of recently seen chat message ids kept for deduplication.
pub const MAX_HANDLED_ID_HISTORY: usize = 100;

/// WebSocket close codes used by the client.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away (client disconnect, app backgrounded).
    pub const GOING_AWAY: u16 = 1001;
}

/// Event names with built-in meaning on the wire.
pub mod events {
    pub const AUTHENTICATE: &str = "authenticate";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const TYPING: &str = "typing";
    pub const FORCE_LOGOUT: &str = "force_logout";
    pub const FORCE_RECONNECT: &str = "force_reconnect";
}
