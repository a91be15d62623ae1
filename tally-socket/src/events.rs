//! Connection state, routed event types, and the broadcast output streams.
//!
//! Every output category gets its own tokio broadcast channel so consumers
//! can subscribe independently and a slow consumer of one stream never
//! blocks another.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::envelope::Envelope;

/// Connection state for the socket manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for the server to accept credentials.
    Authenticating,
    /// Authenticated and receiving events.
    Connected,
    /// Connection lost, waiting out the backoff before the next attempt.
    Reconnecting,
    /// Terminal until the application calls `reconnect` or `connect`.
    Failed,
}

impl ConnectionState {
    /// Whether `connect` should be ignored in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Connected
        )
    }

    /// Legal edges of the connection state machine.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (from, to) if *from == to => false,
            (_, Disconnected) => true,
            (Disconnected | Reconnecting | Failed, Connecting) => true,
            (Connecting, Authenticating | Reconnecting | Failed) => true,
            (Authenticating, Connected | Reconnecting | Failed) => true,
            (Connected, Reconnecting | Failed) => true,
            (Reconnecting, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Category an inbound event name is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Chat,
    Typing,
    Notification,
    Budget,
    Transaction,
    System,
    Heartbeat,
    Auth,
    Unclassified,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Typing => "typing",
            Self::Notification => "notification",
            Self::Budget => "budget",
            Self::Transaction => "transaction",
            Self::System => "system",
            Self::Heartbeat => "heartbeat",
            Self::Auth => "auth",
            Self::Unclassified => "unclassified",
        }
    }

    /// Control categories are consumed by the client itself.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Heartbeat | Self::Auth)
    }
}

/// A classified inbound event as delivered to the application.
#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    pub category: EventCategory,
    pub envelope: Envelope,
}

impl RealtimeEvent {
    pub fn event(&self) -> &str {
        &self.envelope.event
    }

    pub fn channel(&self) -> Option<&str> {
        self.envelope.channel.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.envelope.data
    }
}

/// Ephemeral "user is typing" signal. Never stored, forwarded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub sender: String,
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl TypingIndicator {
    /// Extract an indicator from a typing envelope.
    ///
    /// The sender comes from `sender`, `userId` or `user_id`. The flag comes
    /// from `isTyping`/`is_typing`, or from a `_start`/`_stop` event suffix.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let sender = ["sender", "userId", "user_id"]
            .iter()
            .find_map(|key| envelope.data_str(key))?
            .to_string();

        let flag = envelope
            .data
            .get("isTyping")
            .or_else(|| envelope.data.get("is_typing"))
            .and_then(Value::as_bool);
        let is_typing = match flag {
            Some(flag) => flag,
            None if envelope.event.ends_with("_start") => true,
            None if envelope.event.ends_with("_stop") => false,
            None => return None,
        };

        Some(Self {
            sender,
            is_typing,
            channel: envelope.channel.clone(),
        })
    }
}

/// Kind of fault reported on the error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket reset, DNS failure, unexpected close. Retried automatically.
    Transport,
    /// Credentials rejected or never acknowledged. Not retried.
    Authentication,
    /// A malformed frame was dropped.
    Protocol,
    /// No pong within the heartbeat interval. Treated as a transport failure.
    HeartbeatStale,
    /// The reconnect attempt cap was exceeded.
    ReconnectExhausted,
    /// The server sent an `error` envelope.
    Server,
}

/// An error surfaced asynchronously on the error stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the client keeps trying on its own.
    pub recoverable: bool,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let recoverable = matches!(
            kind,
            ErrorKind::Transport | ErrorKind::Protocol | ErrorKind::HeartbeatStale | ErrorKind::Server
        );
        Self {
            kind,
            message: message.into(),
            recoverable,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Broadcast-based output streams, one per category.
///
/// Receivers that fall behind observe `RecvError::Lagged`. All streams
/// close once the owning socket manager and its actor are dropped.
#[derive(Clone)]
pub struct EventStreams {
    chat: broadcast::Sender<RealtimeEvent>,
    typing: broadcast::Sender<TypingIndicator>,
    notification: broadcast::Sender<RealtimeEvent>,
    budget: broadcast::Sender<RealtimeEvent>,
    transaction: broadcast::Sender<RealtimeEvent>,
    system: broadcast::Sender<RealtimeEvent>,
    generic: broadcast::Sender<RealtimeEvent>,
    errors: broadcast::Sender<ClientError>,
}

impl EventStreams {
    /// Create the streams with the given per-channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            chat: broadcast::channel(capacity).0,
            typing: broadcast::channel(capacity).0,
            notification: broadcast::channel(capacity).0,
            budget: broadcast::channel(capacity).0,
            transaction: broadcast::channel(capacity).0,
            system: broadcast::channel(capacity).0,
            generic: broadcast::channel(capacity).0,
            errors: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe_chat(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.chat.subscribe()
    }

    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingIndicator> {
        self.typing.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.notification.subscribe()
    }

    pub fn subscribe_budget(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.budget.subscribe()
    }

    pub fn subscribe_transactions(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.transaction.subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.system.subscribe()
    }

    /// Events whose names match no known category.
    pub fn subscribe_generic(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.generic.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ClientError> {
        self.errors.subscribe()
    }

    /// Send a classified event to the stream for its category.
    ///
    /// Control categories have no stream and are ignored here.
    pub fn dispatch(&self, event: RealtimeEvent) {
        let sender = match event.category {
            EventCategory::Chat => &self.chat,
            EventCategory::Notification => &self.notification,
            EventCategory::Budget => &self.budget,
            EventCategory::Transaction => &self.transaction,
            EventCategory::System => &self.system,
            EventCategory::Unclassified | EventCategory::Typing => &self.generic,
            EventCategory::Heartbeat | EventCategory::Auth => return,
        };
        let category = event.category.as_str();
        let name = event.envelope.event.clone();
        match sender.send(event) {
            Ok(count) => debug!("dispatched {category}/{name} to {count} subscriber(s)"),
            // No active receivers -- fine during startup/shutdown
            Err(_) => debug!("no subscribers for {category}/{name}"),
        }
    }

    pub fn dispatch_typing(&self, indicator: TypingIndicator) {
        if self.typing.send(indicator).is_err() {
            debug!("no subscribers for typing indicators");
        }
    }

    pub fn emit_error(&self, error: ClientError) {
        if self.errors.send(error).is_err() {
            debug!("no subscribers for client errors");
        }
    }

    /// Total receivers across all streams.
    pub fn subscriber_count(&self) -> usize {
        self.chat.receiver_count()
            + self.typing.receiver_count()
            + self.notification.receiver_count()
            + self.budget.receiver_count()
            + self.transaction.receiver_count()
            + self.system.receiver_count()
            + self.generic.receiver_count()
            + self.errors.receiver_count()
    }
}
