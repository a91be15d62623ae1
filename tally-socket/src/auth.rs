//! Authenticated handshake run on every freshly opened transport.
//!
//! The client sends one `auth` envelope and then waits, bounded by a fixed
//! timeout, for `authenticated` or `authentication_failed`. Nothing else
//! may be written until the handshake succeeds.

use std::fmt;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use tally_core::constants::events;
use tally_core::platform::Platform;

use crate::envelope::{Envelope, FrameType};

/// Credentials presented in the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token issued by the backend.
    pub token: String,
    /// Optional user id, forwarded for server-side logging.
    pub user_id: Option<String>,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

// Tokens never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Result of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected(String),
    TimedOut,
}

#[derive(Debug)]
pub struct AuthHandshake {
    timeout: Duration,
    client_id: String,
    deadline: Option<Instant>,
}

impl AuthHandshake {
    pub fn new(timeout: Duration, client_id: impl Into<String>) -> Self {
        Self {
            timeout,
            client_id: client_id.into(),
            deadline: None,
        }
    }

    /// Build the credential frame and arm the timeout.
    pub fn begin(&mut self, now: Instant, credentials: &Credentials) -> Envelope {
        self.deadline = Some(now + self.timeout);

        let mut data = json!({
            "token": credentials.token,
            "clientId": self.client_id,
            "device": Platform::hostname(),
            "platform": Platform::current().name(),
        });
        if let Some(user_id) = &credentials.user_id {
            data["userId"] = json!(user_id);
        }
        Envelope::new(FrameType::Auth, events::AUTHENTICATE, data)
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Inspect an inbound envelope while the handshake is pending.
    /// Returns `None` for frames unrelated to authentication.
    pub fn on_envelope(&mut self, envelope: &Envelope) -> Option<AuthOutcome> {
        if !self.is_pending() {
            return None;
        }
        match envelope.event.as_str() {
            events::AUTHENTICATED => {
                self.deadline = None;
                Some(AuthOutcome::Accepted)
            }
            events::AUTHENTICATION_FAILED => {
                self.deadline = None;
                let reason = envelope
                    .data_str("reason")
                    .or_else(|| envelope.data_str("message"))
                    .unwrap_or("credentials rejected")
                    .to_string();
                Some(AuthOutcome::Rejected(reason))
            }
            _ => None,
        }
    }

    /// The deadline fired before any verdict arrived.
    pub fn on_timeout(&mut self) -> AuthOutcome {
        self.deadline = None;
        AuthOutcome::TimedOut
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handshake() -> AuthHandshake {
        AuthHandshake::new(Duration::from_secs(5), "client-1")
    }

    #[test]
    fn test_begin_builds_auth_frame() {
        let mut hs = handshake();
        let now = Instant::now();
        let creds = Credentials::new("tok-123").with_user_id("user-9");
        let env = hs.begin(now, &creds);

        assert_eq!(env.frame_type, FrameType::Auth);
        assert_eq!(env.event, "authenticate");
        assert_eq!(env.data["token"], "tok-123");
        assert_eq!(env.data["userId"], "user-9");
        assert_eq!(env.data["clientId"], "client-1");
        assert_eq!(hs.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_accept() {
        let mut hs = handshake();
        hs.begin(Instant::now(), &Credentials::new("t"));
        let ack = Envelope::new(FrameType::Auth, "authenticated", json!({}));
        assert_eq!(hs.on_envelope(&ack), Some(AuthOutcome::Accepted));
        assert!(!hs.is_pending());
    }

    #[test]
    fn test_reject_carries_reason() {
        let mut hs = handshake();
        hs.begin(Instant::now(), &Credentials::new("t"));
        let nack = Envelope::new(
            FrameType::Auth,
            "authentication_failed",
            json!({"reason": "token expired"}),
        );
        assert_eq!(
            hs.on_envelope(&nack),
            Some(AuthOutcome::Rejected("token expired".into()))
        );
    }

    #[test]
    fn test_unrelated_frames_ignored() {
        let mut hs = handshake();
        hs.begin(Instant::now(), &Credentials::new("t"));
        let other = Envelope::data("message_received", json!({}), None);
        assert_eq!(hs.on_envelope(&other), None);
        assert!(hs.is_pending());
    }

    #[test]
    fn test_not_pending_ignores_ack() {
        let mut hs = handshake();
        let ack = Envelope::new(FrameType::Auth, "authenticated", json!({}));
        assert_eq!(hs.on_envelope(&ack), None);
    }

    #[test]
    fn test_timeout_clears_deadline() {
        let mut hs = handshake();
        hs.begin(Instant::now(), &Credentials::new("t"));
        assert_eq!(hs.on_timeout(), AuthOutcome::TimedOut);
        assert!(hs.deadline().is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("super-secret");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("redacted"));
    }
}
