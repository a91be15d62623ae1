//! Connection lifecycle integration tests.
//!
//! Covers the handshake, reconnection with backoff, attempt exhaustion and
//! manual recovery, heartbeat staleness, subscription replay, and
//! disconnect cancellation, all against the in-memory transport.

mod common;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::Sink;
use serde_json::json;
use tally_core::error::{TallyError, TallyResult};
use tally_socket::{
    ConnectionState, Connector, DisconnectMode, Envelope, ErrorKind, Frame, FrameType,
    SocketManager, SocketOptions, Transport,
};
use tokio::time::Instant;

use common::{within, wait_for};

// ---- Handshake ----

#[tokio::test(start_paused = true)]
async fn handshake_sends_credentials_before_anything_else() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    manager.subscribe("transactions").await;
    manager.connect(common::credentials()).await.unwrap();

    let mut peer = within(server.accept()).await.unwrap();
    wait_for(&manager, ConnectionState::Authenticating).await;

    let auth = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(auth.frame_type, FrameType::Auth);
    assert_eq!(auth.event, "authenticate");
    assert_eq!(auth.data["token"], "test-token");
    assert_eq!(auth.data["userId"], "user-1");

    // Nothing else is written until the server accepts.
    let _ = manager.subscriptions().await;
    assert!(peer.try_recv().is_none());

    peer.send(&Envelope::new(FrameType::Auth, "authenticated", json!({})))
        .unwrap();
    wait_for(&manager, ConnectionState::Connected).await;

    let replay = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(replay.frame_type, FrameType::Subscribe);
    assert_eq!(replay.channel.as_deref(), Some("transactions"));
}

#[tokio::test(start_paused = true)]
async fn authentication_failed_is_terminal_without_retry() {
    let (manager, connector, mut server) = common::start(common::test_options());
    let mut errors = manager.streams().subscribe_errors();

    manager.connect(common::credentials()).await.unwrap();
    let mut peer = within(server.accept()).await.unwrap();
    within(peer.reject_auth("token expired")).await.unwrap();

    wait_for(&manager, ConnectionState::Failed).await;
    let err = within(errors.recv()).await.unwrap();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert!(err.message.contains("token expired"));
    assert!(!err.recoverable);

    assert!(matches!(
        manager.send("message_sent", json!({}), None).await,
        Err(TallyError::NotConnected)
    ));

    // No reconnect is ever scheduled.
    assert!(tokio::time::timeout(Duration::from_secs(600), server.accept())
        .await
        .is_err());
    assert_eq!(connector.opens(), 1);
    assert_eq!(manager.state(), ConnectionState::Failed);

    // Credentials were dropped, so recovery needs a fresh connect.
    assert!(matches!(
        manager.reconnect().await,
        Err(TallyError::MissingCredentials)
    ));
    let _peer = common::connect(&manager, &mut server).await;
}

#[tokio::test(start_paused = true)]
async fn auth_timeout_fails_the_connection() {
    let (manager, connector, mut server) = common::start(common::test_options());
    let mut errors = manager.streams().subscribe_errors();

    manager.connect(common::credentials()).await.unwrap();
    let _peer = within(server.accept()).await.unwrap();

    let started = Instant::now();
    wait_for(&manager, ConnectionState::Failed).await;
    assert!(started.elapsed() >= Duration::from_secs(5));

    let err = within(errors.recv()).await.unwrap();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(connector.opens(), 1);
}

// ---- Reconnection ----

#[tokio::test(start_paused = true)]
async fn subscriptions_replayed_exactly_once_after_reconnect() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    manager.subscribe("budget-updates").await;
    manager.subscribe("transactions").await;

    let mut peer = common::connect(&manager, &mut server).await;
    for expected in ["budget-updates", "transactions"] {
        let frame = within(peer.recv_envelope()).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Subscribe);
        assert_eq!(frame.channel.as_deref(), Some(expected));
    }

    peer.close();
    wait_for(&manager, ConnectionState::Reconnecting).await;
    assert_eq!(manager.reconnect_attempts(), 1);

    let mut peer = common::accept_connected(&manager, &mut server).await;
    assert_eq!(manager.reconnect_attempts(), 0);

    let mut channels = Vec::new();
    for _ in 0..2 {
        let frame = within(peer.recv_envelope()).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Subscribe);
        channels.push(frame.channel.unwrap());
    }
    assert_eq!(channels, vec!["budget-updates", "transactions"]);

    let _ = manager.subscriptions().await;
    assert!(peer.try_recv().is_none(), "no duplicate subscribe frames");
}

#[tokio::test(start_paused = true)]
async fn budget_event_after_drop_reaches_budget_stream() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut budget = manager.streams().subscribe_budget();
    manager.subscribe("budget-updates").await;

    let peer = common::connect(&manager, &mut server).await;
    drop(peer);

    wait_for(&manager, ConnectionState::Reconnecting).await;
    let mut peer = common::accept_connected(&manager, &mut server).await;
    let _replay = within(peer.recv_envelope()).await.unwrap();

    peer.send(&Envelope::data(
        "budget_updated",
        json!({"budgetId": "b-1", "remaining": 120.5}),
        Some("budget-updates".into()),
    ))
    .unwrap();

    let event = within(budget.recv()).await.unwrap();
    assert_eq!(event.event(), "budget_updated");
    assert_eq!(event.channel(), Some("budget-updates"));
    assert_eq!(event.data()["budgetId"], "b-1");
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_between_attempts() {
    let (manager, connector, mut server) = common::start(common::test_options());
    let peer = common::connect(&manager, &mut server).await;

    connector.fail_next_opens(2);
    let dropped_at = Instant::now();
    drop(peer);

    // Delays of 100ms, 200ms, then 400ms before the third open succeeds.
    let _peer = common::accept_connected(&manager, &mut server).await;
    assert_eq!(connector.opens(), 4);
    let waited = dropped_at.elapsed();
    assert!(waited >= Duration::from_millis(700), "waited {waited:?}");
    assert!(waited < Duration::from_millis(800), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_fail_then_manual_reconnect_resets() {
    let (manager, connector, mut server) = common::start(common::test_options());
    let mut errors = manager.streams().subscribe_errors();
    connector.refuse_all(true);

    manager.connect(common::credentials()).await.unwrap();
    wait_for(&manager, ConnectionState::Failed).await;

    // One initial open plus five retries, then the sixth failure gives up.
    assert_eq!(connector.opens(), 6);
    assert_eq!(manager.reconnect_attempts(), 6);

    let mut kinds = Vec::new();
    while let Ok(err) = errors.try_recv() {
        kinds.push(err.kind);
    }
    assert_eq!(kinds.last(), Some(&ErrorKind::ReconnectExhausted));
    assert_eq!(
        kinds.iter().filter(|k| **k == ErrorKind::Transport).count(),
        6
    );

    // Failed stays put.
    assert!(tokio::time::timeout(Duration::from_secs(600), server.accept())
        .await
        .is_err());
    assert_eq!(connector.opens(), 6);

    connector.refuse_all(false);
    manager.reconnect().await.unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
    assert!(matches!(
        manager.state(),
        ConnectionState::Connecting | ConnectionState::Authenticating
    ));

    let _peer = common::accept_connected(&manager, &mut server).await;
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn attempt_counter_never_decreases_while_disconnected() {
    let (manager, connector, mut server) = common::start(common::test_options());
    let peer = common::connect(&manager, &mut server).await;
    let mut states = manager.state_receiver();

    connector.refuse_all(true);
    drop(peer);

    let mut last = 0;
    loop {
        within(states.changed()).await.unwrap();
        let state = *states.borrow_and_update();
        let attempts = manager.reconnect_attempts();
        assert!(attempts >= last, "attempts went from {last} to {attempts}");
        last = attempts;
        if state == ConnectionState::Failed {
            break;
        }
    }
    assert_eq!(last, 6);
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_skips_backoff() {
    let mut options = common::test_options();
    options.reconnect.base_delay = Duration::from_secs(60);
    options.reconnect.max_delay = Duration::from_secs(60);
    let (manager, _connector, mut server) = common::start(options);

    let peer = common::connect(&manager, &mut server).await;
    drop(peer);
    wait_for(&manager, ConnectionState::Reconnecting).await;

    let started = Instant::now();
    manager.connect(common::credentials()).await.unwrap();
    let _peer = common::accept_connected(&manager, &mut server).await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn reconnect_disabled_ends_in_disconnected() {
    let mut options = common::test_options();
    options.reconnect.enabled = false;
    let (manager, connector, mut server) = common::start(options);

    let peer = common::connect(&manager, &mut server).await;
    drop(peer);
    wait_for(&manager, ConnectionState::Disconnected).await;

    assert!(tokio::time::timeout(Duration::from_secs(600), server.accept())
        .await
        .is_err());
    assert_eq!(connector.opens(), 1);
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_error_triggers_reconnect() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut errors = manager.streams().subscribe_errors();
    let peer = common::connect(&manager, &mut server).await;

    peer.fail("connection reset by peer");
    wait_for(&manager, ConnectionState::Reconnecting).await;
    let err = within(errors.recv()).await.unwrap();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.recoverable);
    assert!(err.message.contains("connection reset"));
}

// ---- Heartbeat ----

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_detected_within_two_intervals() {
    let interval = Duration::from_secs(30);
    let mut options = common::test_options();
    options.heartbeat.interval = interval;
    let (manager, _connector, mut server) = common::start(options);
    let mut errors = manager.streams().subscribe_errors();

    let mut peer = common::connect(&manager, &mut server).await;
    let connected_at = Instant::now();

    let probe = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(probe.event, "ping");
    assert_eq!(probe.frame_type, FrameType::Heartbeat);

    // Never answer.
    wait_for(&manager, ConnectionState::Reconnecting).await;
    assert!(connected_at.elapsed() <= interval * 2);

    let err = within(errors.recv()).await.unwrap();
    assert_eq!(err.kind, ErrorKind::HeartbeatStale);
}

#[tokio::test(start_paused = true)]
async fn answered_heartbeats_keep_the_connection() {
    let mut options = common::test_options();
    options.heartbeat.interval = Duration::from_secs(30);
    let (manager, connector, mut server) = common::start(options);

    let mut peer = common::connect(&manager, &mut server).await;
    for _ in 0..4 {
        let probe = within(peer.recv_envelope()).await.unwrap();
        assert_eq!(probe.event, "ping");
        peer.send(&Envelope::pong()).unwrap();
    }

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_ping_is_answered() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut peer = common::connect(&manager, &mut server).await;

    peer.send(&Envelope::ping()).unwrap();
    let reply = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(reply.event, "pong");
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_and_transport_error_reconnect_once() {
    let interval = Duration::from_secs(10);
    let mut options = common::test_options();
    options.heartbeat.interval = interval;
    let (manager, connector, mut server) = common::start(options);
    let mut errors = manager.streams().subscribe_errors();

    let mut peer = common::connect(&manager, &mut server).await;
    let probe = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(probe.event, "ping");
    let probe_at = Instant::now();

    // The link dies in the same tick the heartbeat goes stale.
    tokio::time::sleep_until(probe_at + interval).await;
    peer.fail("connection reset by peer");

    wait_for(&manager, ConnectionState::Reconnecting).await;
    assert_eq!(manager.reconnect_attempts(), 1);

    let lost = within(errors.recv()).await.unwrap();
    assert!(matches!(
        lost.kind,
        ErrorKind::HeartbeatStale | ErrorKind::Transport
    ));

    // One backoff, one open.
    let _next = within(server.accept()).await.unwrap();
    assert_eq!(connector.opens(), 2);
    assert!(tokio::time::timeout(Duration::from_secs(1), server.accept())
        .await
        .is_err());
    assert_eq!(manager.reconnect_attempts(), 1);
    assert!(errors.try_recv().is_err(), "link loss reported twice");
}

// ---- Stalled writes ----

/// Connector whose sink accepts a fixed number of frames and then never
/// becomes ready again, like a link with a full send buffer.
struct StallingConnector {
    accepted: usize,
    server_tx: std::sync::Mutex<Option<fmpsc::UnboundedSender<TallyResult<Frame>>>>,
}

struct StallingSink {
    remaining: usize,
}

impl Sink<Frame> for StallingSink {
    type Error = TallyError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<TallyResult<()>> {
        if self.remaining > 0 {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn start_send(mut self: Pin<&mut Self>, _item: Frame) -> TallyResult<()> {
        self.remaining -= 1;
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<TallyResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<TallyResult<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Connector for StallingConnector {
    async fn open(&self) -> TallyResult<Transport> {
        let (tx, rx) = fmpsc::unbounded();
        *self.server_tx.lock().unwrap() = Some(tx);
        Ok(Transport {
            sink: Box::pin(StallingSink {
                remaining: self.accepted,
            }),
            stream: Box::pin(rx),
        })
    }
}

impl StallingConnector {
    fn new(accepted: usize) -> Arc<Self> {
        Arc::new(Self {
            accepted,
            server_tx: std::sync::Mutex::new(None),
        })
    }

    fn push(&self, envelope: &Envelope) {
        let text = tally_socket::envelope::encode(envelope).unwrap();
        if let Some(tx) = self.server_tx.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(Ok(Frame::Text(text)));
        }
    }
}

fn stalled_options() -> SocketOptions {
    let mut options = common::test_options();
    options.heartbeat.interval = Duration::from_secs(5);
    options.reconnect.enabled = false;
    options
}

async fn connect_stalled(manager: &SocketManager, connector: &StallingConnector) {
    manager.connect(common::credentials()).await.unwrap();
    wait_for(manager, ConnectionState::Authenticating).await;
    connector.push(&Envelope::new(FrameType::Auth, "authenticated", json!({})));
    wait_for(manager, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn stalled_heartbeat_write_drops_the_link() {
    let connector = StallingConnector::new(1);
    let manager = SocketManager::new(connector.clone(), stalled_options());
    let mut errors = manager.streams().subscribe_errors();

    connect_stalled(&manager, &connector).await;
    let connected_at = Instant::now();

    wait_for(&manager, ConnectionState::Disconnected).await;
    assert!(connected_at.elapsed() <= Duration::from_secs(10));

    let err = within(errors.recv()).await.unwrap();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("stalled"), "{}", err.message);
}

#[tokio::test(start_paused = true)]
async fn disconnect_returns_while_a_send_is_stalled() {
    let connector = StallingConnector::new(1);
    let manager = SocketManager::new(connector.clone(), stalled_options());
    connect_stalled(&manager, &connector).await;

    // The send is queued first and wedges the link; disconnect waits behind it.
    let started = Instant::now();
    let (sent, ()) = within(async {
        tokio::join!(
            manager.send("transaction_created", json!({"amount": 1}), None),
            manager.disconnect(DisconnectMode::Pause),
        )
    })
    .await;

    assert!(started.elapsed() <= Duration::from_secs(10));
    assert!(matches!(sent, Err(TallyError::Timeout(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ---- Sending ----

#[tokio::test(start_paused = true)]
async fn send_fails_in_every_non_connected_state() {
    async fn assert_rejected(manager: &tally_socket::SocketManager) {
        assert!(matches!(
            manager.send("transaction_created", json!({}), None).await,
            Err(TallyError::NotConnected)
        ));
        assert!(matches!(
            manager.send_typing("chat:1", true),
            Err(TallyError::NotConnected)
        ));
    }

    let (manager, connector, mut server) = common::start(common::test_options());

    // Disconnected
    assert_rejected(&manager).await;

    // Connecting
    connector.stall_opens(true);
    manager.connect(common::credentials()).await.unwrap();
    wait_for(&manager, ConnectionState::Connecting).await;
    assert_rejected(&manager).await;
    manager.disconnect(DisconnectMode::Pause).await;
    connector.stall_opens(false);

    // Authenticating
    manager.connect(common::credentials()).await.unwrap();
    let mut peer = within(server.accept()).await.unwrap();
    wait_for(&manager, ConnectionState::Authenticating).await;
    assert_rejected(&manager).await;

    // Reconnecting
    within(peer.accept_auth()).await.unwrap();
    wait_for(&manager, ConnectionState::Connected).await;
    connector.refuse_all(true);
    drop(peer);
    wait_for(&manager, ConnectionState::Reconnecting).await;
    assert_rejected(&manager).await;

    // Failed
    wait_for(&manager, ConnectionState::Failed).await;
    assert_rejected(&manager).await;
}

#[tokio::test(start_paused = true)]
async fn send_writes_a_data_frame() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut peer = common::connect(&manager, &mut server).await;

    manager
        .send(
            "transaction_created",
            json!({"amount": 42.0, "currency": "EUR"}),
            Some("transactions"),
        )
        .await
        .unwrap();

    let frame = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(frame.frame_type, FrameType::Data);
    assert_eq!(frame.event, "transaction_created");
    assert_eq!(frame.channel.as_deref(), Some("transactions"));
    assert_eq!(frame.data["currency"], "EUR");
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_is_sent() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut peer = common::connect(&manager, &mut server).await;

    manager.send_typing("chat:42", true).unwrap();
    let frame = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(frame.event, "typing");
    assert_eq!(frame.channel.as_deref(), Some("chat:42"));
    assert_eq!(frame.data["isTyping"], true);
}

#[tokio::test(start_paused = true)]
async fn subscribe_while_connected_sends_immediately() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut peer = common::connect(&manager, &mut server).await;

    manager.subscribe("notifications").await;
    manager.subscribe("notifications").await;
    manager.unsubscribe("notifications").await;
    manager.unsubscribe("notifications").await;

    let sub = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(sub.frame_type, FrameType::Subscribe);
    let unsub = within(peer.recv_envelope()).await.unwrap();
    assert_eq!(unsub.frame_type, FrameType::Unsubscribe);
    assert_eq!(unsub.channel.as_deref(), Some("notifications"));

    let _ = manager.subscriptions().await;
    assert!(peer.try_recv().is_none());
}

// ---- Disconnect ----

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_cancels_pending_reconnect() {
    let (manager, connector, mut server) = common::start(common::test_options());
    manager.subscribe("transactions").await;

    let peer = common::connect(&manager, &mut server).await;
    drop(peer);
    wait_for(&manager, ConnectionState::Reconnecting).await;

    manager.disconnect(DisconnectMode::Pause).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    manager.disconnect(DisconnectMode::Pause).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // The pending backoff never fires.
    assert!(tokio::time::timeout(Duration::from_secs(600), server.accept())
        .await
        .is_err());
    assert_eq!(connector.opens(), 1);

    // Pause keeps the session.
    assert_eq!(manager.subscriptions().await, vec!["transactions".to_string()]);
    manager.reconnect().await.unwrap();
    let _peer = common::accept_connected(&manager, &mut server).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_the_link_with_going_away() {
    let (manager, _connector, mut server) = common::start(common::test_options());
    let mut peer = common::connect(&manager, &mut server).await;

    manager.disconnect(DisconnectMode::Logout).await;
    match within(peer.recv()).await {
        Some(tally_socket::Frame::Close { code, .. }) => assert_eq!(code, 1001),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(within(peer.recv()).await.is_none());

    assert!(manager.subscriptions().await.is_empty());
    assert!(matches!(
        manager.reconnect().await,
        Err(TallyError::MissingCredentials)
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_an_open_in_progress() {
    let (manager, connector, _server) = common::start(common::test_options());
    connector.stall_opens(true);

    manager.connect(common::credentials()).await.unwrap();
    wait_for(&manager, ConnectionState::Connecting).await;
    manager.disconnect(DisconnectMode::Pause).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ---- Server URL ----

#[tokio::test(start_paused = true)]
async fn update_server_url_reconnects_a_live_link() {
    let (manager, connector, mut server) = common::start(common::test_options());
    let _old = common::connect(&manager, &mut server).await;

    manager
        .update_server_url("https://realtime.example.com/")
        .await
        .unwrap();
    assert_eq!(connector.url(), "wss://realtime.example.com");

    let _peer = common::accept_connected(&manager, &mut server).await;
    assert_eq!(connector.opens(), 2);
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_server_url_rejects_empty() {
    let (manager, _connector, _server) = common::start(SocketOptions::default());
    assert!(matches!(
        manager.update_server_url("  ").await,
        Err(TallyError::Config(_))
    ));
}
