//! Transport abstraction under the connection manager.
//!
//! A [`Connector`] opens a [`Transport`]: a sink and a stream of text or
//! close frames. [`WsConnector`] speaks WebSocket through
//! `tokio-tungstenite`; [`MemoryConnector`] wires the manager to an
//! in-process peer for tests and embedding.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{future, FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::debug;

use tally_core::config::ServerConfig;
use tally_core::error::{TallyError, TallyResult};

use crate::envelope::{self, Envelope, FrameType};

/// One unit on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TallyError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = TallyResult<Frame>> + Send>>;

/// An open, bidirectional connection.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports on demand. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self) -> TallyResult<Transport>;

    /// Point future `open` calls at a different endpoint.
    fn set_url(&self, _url: &str) -> TallyResult<()> {
        Err(TallyError::Config(
            "this connector does not support changing its URL".into(),
        ))
    }
}

// ---- WebSocket ----

/// WebSocket connector over `tokio-tungstenite`.
pub struct WsConnector {
    url: RwLock<String>,
    headers: HashMap<String, String>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: RwLock::new(url.into()),
            headers: HashMap::new(),
            connect_timeout: Duration::from_secs(15),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            url: RwLock::new(config.url.clone()),
            headers: config.custom_headers.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn url(&self) -> String {
        self.url
            .read()
            .map(|u| u.clone())
            .unwrap_or_default()
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<TallyResult<Frame>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(Frame::Text(text))),
            Err(_) => Some(Err(TallyError::Protocol("binary frame is not UTF-8".into()))),
        },
        Ok(Message::Close(frame)) => Some(Ok(match frame {
            Some(frame) => Frame::Close {
                code: u16::from(frame.code),
                reason: frame.reason.to_string(),
            },
            None => Frame::Close {
                code: 1005,
                reason: String::new(),
            },
        })),
        // Transport-level keepalive is answered by tungstenite itself.
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(TallyError::Transport(e.to_string()))),
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> TallyResult<Transport> {
        let url = self.url();
        if url.is_empty() {
            return Err(TallyError::MissingConfig("server url".into()));
        }

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TallyError::Config(format!("invalid websocket url {url}: {e}")))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TallyError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TallyError::Config(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        debug!("opening websocket to {url}");
        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    TallyError::Timeout(format!("websocket open exceeded {:?}", self.connect_timeout))
                })?
                .map_err(|e| TallyError::Transport(format!("websocket open failed: {e}")))?;

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(|e| TallyError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TallyError>(to_message(frame))));
        let stream = stream.filter_map(|msg| future::ready(from_message(msg)));

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn set_url(&self, url: &str) -> TallyResult<()> {
        let mut current = self
            .url
            .write()
            .map_err(|_| TallyError::Internal("connector url lock poisoned".into()))?;
        *current = url.to_string();
        Ok(())
    }
}

// ---- In-memory ----

/// Connector whose transports lead to a [`MemoryPeer`] in the same process.
///
/// Every successful `open` hands a new peer to the paired [`MemoryServer`].
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    fail_next: AtomicU32,
    refuse_all: AtomicBool,
    stall: AtomicBool,
    opens: AtomicU32,
    url: RwLock<String>,
}

/// Receives the server side of each transport a [`MemoryConnector`] opens.
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            fail_next: AtomicU32::new(0),
            refuse_all: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            opens: AtomicU32::new(0),
            url: RwLock::new("memory://local".into()),
        };
        (connector, MemoryServer { peers: rx })
    }

    /// Make the next `n` opens fail with a transport error.
    pub fn fail_next_opens(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Refuse every open until called again with `false`.
    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Make opens hang forever until called again with `false`.
    pub fn stall_opens(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Number of `open` calls so far, successful or not.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        self.url.read().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self) -> TallyResult<Transport> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.stall.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        if self.refuse_all.load(Ordering::SeqCst) {
            return Err(TallyError::Transport("connection refused".into()));
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(TallyError::Transport("connection refused".into()));
        }

        let (to_server, from_client) = fmpsc::unbounded::<Frame>();
        let (to_client, from_server) = fmpsc::unbounded::<TallyResult<Frame>>();

        let peer = MemoryPeer {
            from_client,
            to_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TallyError::Transport("memory server dropped".into()))?;

        let sink = to_server.sink_map_err(|e| TallyError::Transport(e.to_string()));
        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(from_server),
        })
    }

    fn set_url(&self, url: &str) -> TallyResult<()> {
        let mut current = self
            .url
            .write()
            .map_err(|_| TallyError::Internal("connector url lock poisoned".into()))?;
        *current = url.to_string();
        Ok(())
    }
}

impl MemoryServer {
    /// Wait for the next transport the client opens.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// Server end of one in-memory transport.
pub struct MemoryPeer {
    from_client: fmpsc::UnboundedReceiver<Frame>,
    to_client: fmpsc::UnboundedSender<TallyResult<Frame>>,
}

impl MemoryPeer {
    /// Next frame written by the client. `None` once the client dropped
    /// its end.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.next().await
    }

    /// Next decoded envelope. `None` on a close frame or a closed link.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => match envelope::decode(text.as_bytes()) {
                    Ok(env) => return Some(env),
                    Err(e) => debug!("memory peer skipped undecodable frame: {e}"),
                },
                Frame::Close { .. } => return None,
            }
        }
    }

    /// A frame already written by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.next().now_or_never().flatten()
    }

    pub fn send(&self, envelope: &Envelope) -> TallyResult<()> {
        let text = envelope::encode(envelope)?;
        self.send_raw(text)
    }

    pub fn send_raw(&self, text: impl Into<String>) -> TallyResult<()> {
        self.to_client
            .unbounded_send(Ok(Frame::Text(text.into())))
            .map_err(|_| TallyError::Transport("client end closed".into()))
    }

    /// Inject a transport error into the client's stream.
    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(TallyError::Transport(message.to_string())));
    }

    /// Read the auth frame and acknowledge it. Returns the auth envelope.
    pub async fn accept_auth(&mut self) -> Option<Envelope> {
        let auth = self.recv_envelope().await?;
        if auth.frame_type != FrameType::Auth {
            return None;
        }
        let ack = Envelope::new(FrameType::Auth, "authenticated", serde_json::json!({}));
        self.send(&ack).ok()?;
        Some(auth)
    }

    /// Read the auth frame and reject it.
    pub async fn reject_auth(&mut self, reason: &str) -> Option<Envelope> {
        let auth = self.recv_envelope().await?;
        let nack = Envelope::new(
            FrameType::Auth,
            "authentication_failed",
            serde_json::json!({ "reason": reason }),
        );
        self.send(&nack).ok()?;
        Some(auth)
    }

    /// Drop the link from the server side.
    pub fn close(self) {}
}
