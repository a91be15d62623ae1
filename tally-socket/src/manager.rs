//! Connection manager.
//!
//! [`SocketManager`] is a handle to a single background task that owns the
//! transport, the handshake, the heartbeat, the reconnect context, and the
//! subscription registry. Every public operation is a command sent to that
//! task, so state changes and timers are serialized without locks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use tally_core::config::{AppConfig, SocketConfig};
use tally_core::constants::{self, close_code, events};
use tally_core::error::{TallyError, TallyResult};

use crate::auth::{AuthHandshake, AuthOutcome, Credentials};
use crate::envelope::{self, Envelope};
use crate::events::{ClientError, ConnectionState, ErrorKind, EventStreams};
use crate::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use crate::policy::{ReconnectConfig, ReconnectContext, ReconnectDecision};
use crate::router::{ControlSignal, EventRouter, RouteOutcome, SystemCommand};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{Connector, Frame, Transport, WsConnector};

/// Upper bound on the close handshake when tearing a link down.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Tunables for one manager instance.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub auth_timeout: Duration,
    /// Capacity of the command queue between handle and connection task.
    pub outbound_queue_capacity: usize,
    /// Capacity of each broadcast output stream.
    pub event_channel_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            auth_timeout: Duration::from_millis(constants::DEFAULT_AUTH_TIMEOUT_MS),
            outbound_queue_capacity: constants::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            event_channel_capacity: constants::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl From<&SocketConfig> for SocketOptions {
    fn from(config: &SocketConfig) -> Self {
        Self {
            reconnect: ReconnectConfig::from(config),
            heartbeat: HeartbeatConfig::from(config),
            auth_timeout: Duration::from_millis(config.auth_timeout_ms),
            outbound_queue_capacity: config.outbound_queue_capacity.max(1),
            event_channel_capacity: config.event_channel_capacity.max(1),
        }
    }
}

/// How `disconnect` treats session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectMode {
    /// Keep credentials and subscriptions for a later `connect`/`reconnect`.
    Pause,
    /// Forget credentials, subscriptions, and dedup history.
    Logout,
}

enum Command {
    Connect {
        credentials: Credentials,
    },
    Reconnect {
        reply: oneshot::Sender<TallyResult<()>>,
    },
    Disconnect {
        mode: DisconnectMode,
        reply: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
        // `None` for lossy sends such as typing indicators.
        reply: Option<oneshot::Sender<TallyResult<()>>>,
    },
    Subscribe(String),
    Unsubscribe(String),
    Subscriptions(oneshot::Sender<Vec<String>>),
    UpdateUrl {
        url: String,
        reply: oneshot::Sender<TallyResult<()>>,
    },
}

/// Handle to a running connection.
///
/// Dropping the last handle shuts the connection task down and closes the
/// transport.
pub struct SocketManager {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    streams: EventStreams,
    attempts: Arc<AtomicU32>,
    _task: JoinHandle<()>,
}

impl SocketManager {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, options: SocketOptions) -> Self {
        let (commands, command_rx) = mpsc::channel(options.outbound_queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let streams = EventStreams::new(options.event_channel_capacity.max(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let client_id = uuid::Uuid::new_v4().to_string();
        debug!("socket manager created with client id {client_id}");

        let actor = ConnectionActor {
            commands: command_rx,
            connector,
            state_tx,
            attempts: attempts.clone(),
            router: EventRouter::new(streams.clone()),
            registry: SubscriptionRegistry::new(),
            reconnect: ReconnectContext::default(),
            heartbeat: HeartbeatMonitor::new(options.heartbeat.clone()),
            auth: AuthHandshake::new(options.auth_timeout, client_id),
            credentials: None,
            link: None,
            opening: None,
            retry_at: None,
            options,
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands,
            state_rx,
            streams,
            attempts,
            _task: task,
        }
    }

    /// Build a WebSocket-backed manager from application config.
    pub fn from_config(config: &AppConfig) -> TallyResult<Self> {
        if config.server.url.is_empty() {
            return Err(TallyError::MissingConfig("server.url".into()));
        }
        config.socket.validate()?;
        let connector = WsConnector::from_config(&config.server);
        Ok(Self::new(
            Arc::new(connector),
            SocketOptions::from(&config.socket),
        ))
    }

    /// Start connecting with the given credentials.
    ///
    /// No-op while already connecting, authenticating, or connected. From
    /// `Reconnecting` the pending backoff is skipped. From `Failed` the
    /// attempt counter starts over.
    pub async fn connect(&self, credentials: Credentials) -> TallyResult<()> {
        self.commands
            .send(Command::Connect { credentials })
            .await
            .map_err(|_| TallyError::ClientClosed)
    }

    /// Manual recovery using the stored credentials.
    pub async fn reconnect(&self) -> TallyResult<()> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Close the link and cancel every pending timer. Idempotent.
    pub async fn disconnect(&self, mode: DisconnectMode) {
        if self
            .request(|reply| Command::Disconnect { mode, reply })
            .await
            .is_err()
        {
            debug!("disconnect on a closed socket manager");
        }
    }

    /// Send one data frame. Fails with `NotConnected` outside `Connected`.
    pub async fn send(&self, event: &str, data: Value, channel: Option<&str>) -> TallyResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(TallyError::NotConnected);
        }
        let envelope = Envelope::data(event, data, channel.map(str::to_string));
        self.request(|reply| Command::Send {
            envelope,
            reply: Some(reply),
        })
        .await?
    }

    /// Best-effort typing indicator. Dropped when the outbound queue is full.
    pub fn send_typing(&self, channel: &str, is_typing: bool) -> TallyResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(TallyError::NotConnected);
        }
        let envelope = Envelope::data(
            events::TYPING,
            json!({ "isTyping": is_typing }),
            Some(channel.to_string()),
        );
        match self.commands.try_send(Command::Send {
            envelope,
            reply: None,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("outbound queue full, typing indicator for {channel} dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TallyError::ClientClosed),
        }
    }

    /// Register interest in a channel. Sent now if connected, replayed on
    /// every future connect.
    pub async fn subscribe(&self, channel: &str) {
        if self
            .commands
            .send(Command::Subscribe(channel.to_string()))
            .await
            .is_err()
        {
            warn!("subscribe({channel}) on a closed socket manager");
        }
    }

    pub async fn unsubscribe(&self, channel: &str) {
        if self
            .commands
            .send(Command::Unsubscribe(channel.to_string()))
            .await
            .is_err()
        {
            warn!("unsubscribe({channel}) on a closed socket manager");
        }
    }

    /// Currently registered channels, sorted.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.request(Command::Subscriptions)
            .await
            .unwrap_or_default()
    }

    /// Use a new endpoint. A live link is dropped and re-established.
    pub async fn update_server_url(&self, url: &str) -> TallyResult<()> {
        let url = AppConfig::sanitize_server_url(url);
        if url.is_empty() {
            return Err(TallyError::Config("server url must not be empty".into()));
        }
        self.request(|reply| Command::UpdateUrl { url, reply }).await?
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the manager reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> TallyResult<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| TallyError::ClientClosed)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> &EventStreams {
        &self.streams
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> TallyResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| TallyError::ClientClosed)?;
        rx.await.map_err(|_| TallyError::ClientClosed)
    }
}

// ---- connection task ----

struct ConnectionActor {
    commands: mpsc::Receiver<Command>,
    connector: Arc<dyn Connector>,
    options: SocketOptions,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Arc<AtomicU32>,
    router: EventRouter,
    registry: SubscriptionRegistry,
    reconnect: ReconnectContext,
    heartbeat: HeartbeatMonitor,
    auth: AuthHandshake,
    credentials: Option<Credentials>,
    link: Option<Transport>,
    opening: Option<BoxFuture<'static, TallyResult<Transport>>>,
    retry_at: Option<Instant>,
}

async fn poll_opening(
    opening: &mut Option<BoxFuture<'static, TallyResult<Transport>>>,
) -> TallyResult<Transport> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(link: &mut Option<Transport>) -> Option<TallyResult<Frame>> {
    match link {
        Some(transport) => transport.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn close_link(mut link: Transport, code: u16, reason: &str) {
    let frame = Frame::Close {
        code,
        reason: reason.to_string(),
    };
    let result = tokio::time::timeout(CLOSE_GRACE, async {
        link.sink.send(frame).await?;
        link.sink.close().await
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("close handshake failed: {e}"),
        Err(_) => debug!("close handshake timed out"),
    }
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                result = poll_opening(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(result).await;
                }
                frame = next_frame(&mut self.link) => self.on_frame(frame).await,
                _ = sleep_until_opt(self.auth.deadline()) => self.on_auth_timeout().await,
                _ = sleep_until_opt(self.heartbeat.next_deadline()) => self.on_heartbeat_tick().await,
                _ = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    info!(
                        "reconnect attempt {} via {}",
                        self.reconnect.attempt,
                        self.state()
                    );
                    self.begin_open();
                }
            }
        }

        debug!("socket manager dropped, shutting down connection task");
        self.teardown(DisconnectMode::Pause).await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: ConnectionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!("refusing illegal state transition {current} -> {next}");
            return;
        }
        info!("socket state: {current} -> {next}");
        self.state_tx.send_replace(next);
    }

    fn sync_attempts(&self) {
        self.attempts.store(self.reconnect.attempt, Ordering::SeqCst);
    }

    fn emit_error(&self, kind: ErrorKind, message: impl Into<String>) {
        self.router.streams().emit_error(ClientError::new(kind, message));
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { credentials } => {
                let state = self.state();
                if state.is_active() {
                    debug!("connect ignored while {state}");
                    return;
                }
                self.credentials = Some(credentials);
                if matches!(state, ConnectionState::Disconnected | ConnectionState::Failed) {
                    self.reconnect.reset();
                    self.sync_attempts();
                }
                self.retry_at = None;
                self.begin_open();
            }
            Command::Reconnect { reply } => {
                let _ = reply.send(self.manual_reconnect());
            }
            Command::Disconnect { mode, reply } => {
                self.teardown(mode).await;
                let _ = reply.send(());
            }
            Command::Send { envelope, reply } => {
                let result = self.send_envelope(&envelope).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            debug!("lossy send of {} dropped: {e}", envelope.event);
                        }
                    }
                }
            }
            Command::Subscribe(channel) => {
                if self.registry.subscribe(&channel)
                    && self.state() == ConnectionState::Connected
                {
                    self.write_or_drop(&Envelope::subscribe(channel)).await;
                }
            }
            Command::Unsubscribe(channel) => {
                if self.registry.unsubscribe(&channel)
                    && self.state() == ConnectionState::Connected
                {
                    self.write_or_drop(&Envelope::unsubscribe(channel)).await;
                }
            }
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.registry.channels());
            }
            Command::UpdateUrl { url, reply } => {
                let result = self.update_url(&url).await;
                let _ = reply.send(result);
            }
        }
    }

    fn manual_reconnect(&mut self) -> TallyResult<()> {
        if self.credentials.is_none() {
            return Err(TallyError::MissingCredentials);
        }
        let state = self.state();
        if state.is_active() {
            debug!("reconnect ignored while {state}");
            return Ok(());
        }
        info!("manual reconnect from {state}");
        self.reconnect.reset();
        self.sync_attempts();
        self.retry_at = None;
        self.begin_open();
        Ok(())
    }

    async fn update_url(&mut self, url: &str) -> TallyResult<()> {
        self.connector.set_url(url)?;
        info!("server url updated to {url}");

        match self.state() {
            ConnectionState::Connected | ConnectionState::Authenticating => {
                self.auth.cancel();
                self.heartbeat.stop();
                if let Some(link) = self.link.take() {
                    close_link(link, close_code::GOING_AWAY, "server url changed").await;
                }
                self.transition(ConnectionState::Reconnecting);
                self.begin_open();
            }
            ConnectionState::Connecting => {
                // Restart the open against the new endpoint.
                self.begin_open();
            }
            // The next attempt picks the new url up.
            _ => {}
        }
        Ok(())
    }

    fn begin_open(&mut self) {
        self.transition(ConnectionState::Connecting);
        let connector = self.connector.clone();
        self.opening = Some(Box::pin(async move { connector.open().await }));
    }

    async fn on_opened(&mut self, result: TallyResult<Transport>) {
        match result {
            Ok(transport) => {
                self.link = Some(transport);
                self.transition(ConnectionState::Authenticating);

                let Some(credentials) = self.credentials.clone() else {
                    error!("transport opened without credentials");
                    self.teardown(DisconnectMode::Pause).await;
                    return;
                };
                let frame = self.auth.begin(Instant::now(), &credentials);
                debug!("sent auth frame, waiting up to {:?}", self.auth.timeout());
                if let Err(e) = self.write(&frame).await {
                    self.on_link_lost(ErrorKind::Transport, e.to_string()).await;
                }
            }
            Err(e) => {
                warn!("connection attempt failed: {e}");
                self.emit_error(ErrorKind::Transport, e.to_string());
                self.schedule_retry();
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<TallyResult<Frame>>) {
        match frame {
            None => {
                self.on_link_lost(ErrorKind::Transport, "connection closed").await;
            }
            Some(Err(e)) => {
                self.on_link_lost(ErrorKind::Transport, e.to_string()).await;
            }
            Some(Ok(Frame::Close { code, reason })) => {
                let message = format!("server closed connection ({code}) {reason}");
                self.on_link_lost(ErrorKind::Transport, message.trim_end().to_string())
                    .await;
            }
            Some(Ok(Frame::Text(text))) => match envelope::decode(text.as_bytes()) {
                Ok(envelope) => self.on_envelope(envelope).await,
                Err(e) => {
                    warn!("dropping malformed frame: {e}");
                    self.emit_error(ErrorKind::Protocol, e.to_string());
                }
            },
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        if self.state() == ConnectionState::Authenticating {
            match self.auth.on_envelope(&envelope) {
                Some(AuthOutcome::Accepted) => self.on_authenticated().await,
                Some(AuthOutcome::Rejected(reason)) => self.on_auth_failed(reason).await,
                Some(AuthOutcome::TimedOut) => {
                    self.on_auth_failed("authentication timed out".into()).await
                }
                None => debug!("ignoring {} before authentication", envelope.event),
            }
            return;
        }

        match self.router.route(envelope) {
            RouteOutcome::Control(ControlSignal::Pong) => self.heartbeat.on_ack(Instant::now()),
            RouteOutcome::Control(ControlSignal::Ping) => {
                self.write_or_drop(&Envelope::pong()).await;
            }
            RouteOutcome::Control(ControlSignal::Auth(event)) => {
                debug!("auth event {event} outside the handshake ignored");
            }
            RouteOutcome::System(SystemCommand::ForceLogout, event) => {
                warn!("server forced logout");
                self.teardown(DisconnectMode::Logout).await;
                self.router.forward(event);
            }
            RouteOutcome::System(SystemCommand::ForceReconnect, event) => {
                warn!("server requested reconnect");
                self.router.forward(event);
                self.on_link_lost(ErrorKind::Transport, "server requested reconnect")
                    .await;
            }
            RouteOutcome::ServerError(message) => {
                warn!("server error frame: {message}");
            }
            RouteOutcome::Delivered(_) | RouteOutcome::Duplicate => {}
        }
    }

    async fn on_authenticated(&mut self) {
        self.reconnect.reset();
        self.sync_attempts();
        self.transition(ConnectionState::Connected);
        self.heartbeat.start(Instant::now());

        let frames = self.registry.replay_frames();
        let count = frames.len();
        for frame in frames {
            if let Err(e) = self.write(&frame).await {
                self.on_link_lost(ErrorKind::Transport, e.to_string()).await;
                return;
            }
        }
        if count > 0 {
            info!("replayed {count} subscription(s)");
        }
    }

    async fn on_auth_failed(&mut self, reason: String) {
        error!("authentication failed: {reason}");
        self.auth.cancel();
        self.heartbeat.stop();
        self.retry_at = None;
        self.opening = None;
        if let Some(link) = self.link.take() {
            close_link(link, close_code::GOING_AWAY, "authentication failed").await;
        }
        // A fresh connect is required to try again.
        self.credentials = None;
        self.transition(ConnectionState::Failed);
        self.emit_error(ErrorKind::Authentication, reason);
    }

    async fn on_auth_timeout(&mut self) {
        if self.state() != ConnectionState::Authenticating {
            self.auth.cancel();
            return;
        }
        let timeout = self.auth.timeout();
        if self.auth.on_timeout() == AuthOutcome::TimedOut {
            self.on_auth_failed(format!("no authentication verdict within {timeout:?}"))
                .await;
        }
    }

    async fn on_heartbeat_tick(&mut self) {
        if self.state() != ConnectionState::Connected {
            self.heartbeat.stop();
            return;
        }
        match self.heartbeat.on_tick(Instant::now()) {
            HeartbeatAction::SendProbe => {
                if let Err(e) = self.write(&Envelope::ping()).await {
                    self.on_link_lost(ErrorKind::Transport, e.to_string()).await;
                }
            }
            HeartbeatAction::Stale { probe_sent } => {
                let waited = Instant::now().duration_since(probe_sent);
                self.on_link_lost(
                    ErrorKind::HeartbeatStale,
                    format!("no pong within {waited:?}"),
                )
                .await;
            }
        }
    }

    /// The live link or an open attempt in progress died.
    async fn on_link_lost(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        warn!("connection lost: {message}");
        self.heartbeat.stop();
        self.auth.cancel();
        if let Some(link) = self.link.take() {
            close_link(link, close_code::GOING_AWAY, "connection lost").await;
        }
        self.emit_error(kind, message);
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let decision = self.reconnect.record_failure(&self.options.reconnect);
        self.sync_attempts();
        match decision {
            ReconnectDecision::Retry(delay) => {
                self.transition(ConnectionState::Reconnecting);
                self.retry_at = Some(Instant::now() + delay);
                info!(
                    "reconnecting in {delay:?} (attempt {})",
                    self.reconnect.attempt
                );
            }
            ReconnectDecision::GiveUp => {
                error!(
                    "giving up after {} reconnect attempt(s)",
                    self.reconnect.attempt
                );
                self.transition(ConnectionState::Failed);
                self.emit_error(
                    ErrorKind::ReconnectExhausted,
                    format!(
                        "reconnect attempts exhausted after {}",
                        self.reconnect.attempt
                    ),
                );
            }
            ReconnectDecision::Disabled => {
                info!("automatic reconnect disabled");
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    async fn teardown(&mut self, mode: DisconnectMode) {
        self.opening = None;
        self.retry_at = None;
        self.auth.cancel();
        self.heartbeat.stop();
        if let Some(link) = self.link.take() {
            close_link(link, close_code::GOING_AWAY, "client disconnect").await;
        }
        if mode == DisconnectMode::Logout {
            self.credentials = None;
            self.registry.clear();
            self.router.clear_dedup_history();
        }
        self.transition(ConnectionState::Disconnected);
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> TallyResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(TallyError::NotConnected);
        }
        let text = envelope::encode(envelope)?;
        if let Err(e) = self.write_text(text).await {
            self.on_link_lost(ErrorKind::Transport, e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_or_drop(&mut self, envelope: &Envelope) {
        if let Err(e) = self.write(envelope).await {
            self.on_link_lost(ErrorKind::Transport, e.to_string()).await;
        }
    }

    async fn write(&mut self, envelope: &Envelope) -> TallyResult<()> {
        let text = envelope::encode(envelope)?;
        self.write_text(text).await
    }

    /// How long a single outbound write may block the connection task.
    fn write_timeout(&self) -> Duration {
        if self.state() == ConnectionState::Authenticating {
            self.options.auth_timeout
        } else {
            self.options.heartbeat.interval
        }
    }

    async fn write_text(&mut self, text: String) -> TallyResult<()> {
        let limit = self.write_timeout();
        let link = self.link.as_mut().ok_or(TallyError::NotConnected)?;
        let written = tokio::time::timeout(limit, link.sink.send(Frame::Text(text))).await;
        match written {
            Ok(result) => result,
            Err(_) => {
                // A wedged sink cannot carry a close frame either.
                self.link = None;
                Err(TallyError::Timeout(format!(
                    "outbound write stalled for {limit:?}"
                )))
            }
        }
    }
}
