//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tally_socket::policy::ReconnectConfig;
use tally_socket::{
    ConnectionState, Credentials, HeartbeatConfig, MemoryConnector, MemoryPeer, MemoryServer,
    SocketManager, SocketOptions,
};

/// Upper bound for any single wait in a test. Time is paused, so this only
/// matters when something never happens.
pub const WAIT: Duration = Duration::from_secs(300);

/// Options with deterministic backoff and a heartbeat slow enough to stay
/// out of the way.
pub fn test_options() -> SocketOptions {
    SocketOptions {
        reconnect: ReconnectConfig {
            enabled: true,
            base_delay: Duration::from_millis(100),
            growth_factor: 2.0,
            max_delay: Duration::from_secs(2),
            max_attempts: 5,
            jitter_factor: 0.0,
        },
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(3600),
        },
        auth_timeout: Duration::from_secs(5),
        outbound_queue_capacity: 64,
        event_channel_capacity: 64,
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("test-token").with_user_id("user-1")
}

/// Create a manager wired to an in-memory server.
pub fn start(options: SocketOptions) -> (SocketManager, Arc<MemoryConnector>, MemoryServer) {
    let (connector, server) = MemoryConnector::new();
    let connector = Arc::new(connector);
    let manager = SocketManager::new(connector.clone(), options);
    (manager, connector, server)
}

/// Await `fut`, failing the test if it does not finish within [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

pub async fn wait_for(manager: &SocketManager, state: ConnectionState) {
    within(manager.wait_for_state(state))
        .await
        .expect("manager closed");
}

/// Accept the next transport and complete the handshake on it.
pub async fn accept_connected(manager: &SocketManager, server: &mut MemoryServer) -> MemoryPeer {
    let mut peer = within(server.accept()).await.expect("server closed");
    within(peer.accept_auth()).await.expect("no auth frame");
    wait_for(manager, ConnectionState::Connected).await;
    peer
}

/// `connect` followed by [`accept_connected`].
pub async fn connect(manager: &SocketManager, server: &mut MemoryServer) -> MemoryPeer {
    manager.connect(credentials()).await.expect("connect");
    accept_connected(manager, server).await
}
