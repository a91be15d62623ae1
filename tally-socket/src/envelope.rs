//! Wire envelope and its JSON codec.
//!
//! Every frame exchanged with the server is a single JSON object:
//!
//! ```json
//! { "type": "data", "event": "budget_updated", "data": { ... },
//!   "channel": "budget-updates", "timestamp": "2024-07-01T10:30:00Z" }
//! ```
//!
//! Decoding is the only place raw bytes are validated. A frame that fails
//! here is dropped by the caller; it never reaches the router.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use tally_core::constants::events;
use tally_core::error::{TallyError, TallyResult};

/// Control category of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Auth,
    Data,
    Heartbeat,
    Error,
    Subscribe,
    Unsubscribe,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Data => "data",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Control category.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Semantic event name, e.g. `message_received`.
    pub event: String,
    /// Opaque payload. Always an object or other non-null JSON value.
    #[serde(default = "empty_payload", deserialize_with = "payload_or_empty")]
    pub data: Value,
    /// Logical topic the frame belongs to, if any.
    #[serde(default)]
    pub channel: Option<String>,
    /// Server or client send time.
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

fn payload_or_empty<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => empty_payload(),
        Some(v) => v,
    })
}

/// Accepts RFC 3339 strings or epoch milliseconds; anything else is
/// replaced by the receive time instead of failing the whole frame.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(Utc::now))
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(frame_type: FrameType, event: impl Into<String>, data: Value) -> Self {
        let data = if data.is_null() { empty_payload() } else { data };
        Self {
            frame_type,
            event: event.into(),
            data,
            channel: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Application data frame.
    pub fn data(event: impl Into<String>, data: Value, channel: Option<String>) -> Self {
        let mut envelope = Self::new(FrameType::Data, event, data);
        envelope.channel = channel;
        envelope
    }

    /// Liveness probe.
    pub fn ping() -> Self {
        Self::new(FrameType::Heartbeat, events::PING, empty_payload())
    }

    /// Reply to a liveness probe.
    pub fn pong() -> Self {
        Self::new(FrameType::Heartbeat, events::PONG, empty_payload())
    }

    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::new(FrameType::Subscribe, events::SUBSCRIBE, empty_payload()).with_channel(channel)
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::new(FrameType::Unsubscribe, events::UNSUBSCRIBE, empty_payload())
            .with_channel(channel)
    }

    /// Read a string field from an object payload.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Serialize an envelope to its text wire form.
pub fn encode(envelope: &Envelope) -> TallyResult<String> {
    if envelope.event.trim().is_empty() {
        return Err(TallyError::Protocol("envelope event name is empty".into()));
    }
    Ok(serde_json::to_string(envelope)?)
}

/// Parse and validate one inbound frame.
pub fn decode(bytes: &[u8]) -> TallyResult<Envelope> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| TallyError::Protocol(format!("malformed frame: {e}")))?;
    if envelope.event.trim().is_empty() {
        return Err(TallyError::Protocol("frame has an empty event name".into()));
    }
    Ok(envelope)
}
