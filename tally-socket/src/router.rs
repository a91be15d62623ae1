//! Classification and dispatch of inbound envelopes.
//!
//! Event names map onto a closed set of categories by name prefix. Names
//! that match nothing go to the generic stream so new server events degrade
//! gracefully instead of being dropped.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, warn};

use tally_core::constants::{self, events};

use crate::envelope::{Envelope, FrameType};
use crate::events::{ClientError, ErrorKind, EventCategory, EventStreams, RealtimeEvent, TypingIndicator};

/// Built-in reactions to system events, run before the event is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// Drop the session: disconnect and clear subscriptions and credentials.
    ForceLogout,
    /// Drop the link and go through the normal reconnect path.
    ForceReconnect,
}

/// Control signals the connection actor handles itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    Ping,
    Pong,
    /// An auth verdict that arrived outside a pending handshake.
    Auth(String),
}

/// What happened to one envelope.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Sent to the stream for this category.
    Delivered(EventCategory),
    /// Consumed by the client, not forwarded.
    Control(ControlSignal),
    /// A system event with a built-in handler. The caller runs the handler
    /// and then forwards the event with [`EventRouter::forward`].
    System(SystemCommand, RealtimeEvent),
    /// A chat event already delivered recently.
    Duplicate,
    /// An `error` envelope, surfaced on the error stream.
    ServerError(String),
}

/// Map an envelope to its category.
pub fn classify(envelope: &Envelope) -> EventCategory {
    match envelope.frame_type {
        FrameType::Heartbeat => return EventCategory::Heartbeat,
        FrameType::Auth => return EventCategory::Auth,
        _ => {}
    }

    let name = envelope.event.to_ascii_lowercase();
    match name.as_str() {
        events::PING | events::PONG => return EventCategory::Heartbeat,
        events::AUTHENTICATE | events::AUTHENTICATED | events::AUTHENTICATION_FAILED => {
            return EventCategory::Auth
        }
        events::FORCE_LOGOUT
        | events::FORCE_RECONNECT
        | "maintenance"
        | "server_shutdown"
        | "app_update_required" => return EventCategory::System,
        _ => {}
    }

    let prefix = name
        .split(|c| matches!(c, ':' | '.' | '_' | '-'))
        .next()
        .unwrap_or_default();
    match prefix {
        "typing" => EventCategory::Typing,
        "chat" | "message" | "conversation" => EventCategory::Chat,
        "notification" | "notify" => EventCategory::Notification,
        "budget" => EventCategory::Budget,
        "transaction" => EventCategory::Transaction,
        "system" => EventCategory::System,
        _ => EventCategory::Unclassified,
    }
}

fn system_command(event: &str) -> Option<SystemCommand> {
    match event {
        events::FORCE_LOGOUT => Some(SystemCommand::ForceLogout),
        events::FORCE_RECONNECT => Some(SystemCommand::ForceReconnect),
        _ => None,
    }
}

/// Routes decoded envelopes to the output streams.
pub struct EventRouter {
    streams: EventStreams,
    /// Recently delivered chat ids, oldest first.
    handled_ids: VecDeque<String>,
}

impl EventRouter {
    pub fn new(streams: EventStreams) -> Self {
        Self {
            streams,
            handled_ids: VecDeque::with_capacity(constants::MAX_HANDLED_ID_HISTORY),
        }
    }

    pub fn streams(&self) -> &EventStreams {
        &self.streams
    }

    pub fn route(&mut self, envelope: Envelope) -> RouteOutcome {
        if envelope.frame_type == FrameType::Error {
            let message = envelope
                .data_str("message")
                .unwrap_or(envelope.event.as_str())
                .to_string();
            warn!("server error event {}: {message}", envelope.event);
            self.streams
                .emit_error(ClientError::new(ErrorKind::Server, message.clone()));
            return RouteOutcome::ServerError(message);
        }

        let category = classify(&envelope);
        match category {
            EventCategory::Heartbeat => {
                let signal = if envelope.event == events::PING {
                    ControlSignal::Ping
                } else {
                    ControlSignal::Pong
                };
                RouteOutcome::Control(signal)
            }
            EventCategory::Auth => RouteOutcome::Control(ControlSignal::Auth(envelope.event)),
            EventCategory::Typing => match TypingIndicator::from_envelope(&envelope) {
                Some(indicator) => {
                    self.streams.dispatch_typing(indicator);
                    RouteOutcome::Delivered(EventCategory::Typing)
                }
                None => {
                    debug!(
                        "typing event {} without sender or flag, sent to generic stream",
                        envelope.event
                    );
                    self.streams.dispatch(RealtimeEvent { category, envelope });
                    RouteOutcome::Delivered(EventCategory::Unclassified)
                }
            },
            EventCategory::Chat if self.is_duplicate(&envelope) => {
                debug!("duplicate chat event skipped: {}", envelope.event);
                RouteOutcome::Duplicate
            }
            EventCategory::System => {
                let event = RealtimeEvent { category, envelope };
                match system_command(&event.envelope.event) {
                    Some(command) => RouteOutcome::System(command, event),
                    None => {
                        self.streams.dispatch(event);
                        RouteOutcome::Delivered(category)
                    }
                }
            }
            _ => {
                self.streams.dispatch(RealtimeEvent { category, envelope });
                RouteOutcome::Delivered(category)
            }
        }
    }

    /// Deliver an event held back by [`RouteOutcome::System`].
    pub fn forward(&self, event: RealtimeEvent) {
        self.streams.dispatch(event);
    }

    pub fn clear_dedup_history(&mut self) {
        self.handled_ids.clear();
    }

    /// Records the id as seen and reports whether it was already present.
    fn is_duplicate(&mut self, envelope: &Envelope) -> bool {
        let id = match envelope
            .data
            .get("id")
            .or_else(|| envelope.data.get("messageId"))
        {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return false,
        };
        let key = format!("{}:{id}", envelope.event);
        if self.handled_ids.contains(&key) {
            return true;
        }
        self.handled_ids.push_back(key);
        if self.handled_ids.len() > constants::MAX_HANDLED_ID_HISTORY {
            self.handled_ids.pop_front();
        }
        false
    }
}
