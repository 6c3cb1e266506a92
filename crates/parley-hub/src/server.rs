//! Accept loop tying a transport listener to the hub
//!
//! The server is transport-agnostic: anything implementing
//! [`TransportServer`] can feed it connections. Each accepted connection
//! becomes a [`Session`] that is registered with the hub and then run on the
//! server's task tracker, so shutdown can wait for it.

use parley_core::{ClientId, CLOSE_POLICY_VIOLATION};
use parley_transport::{
    CloseFrame, ConnectInfo, TransportReceiver, TransportSender, TransportServer,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[cfg(feature = "websocket")]
use parley_transport::{WebSocketConfig, WebSocketServer};

use crate::{
    error::{HubError, Result},
    hub::{Hub, HubConfig, HubHandle},
    session::Session,
    shutdown::ShutdownCoordinator,
};

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hub settings
    pub hub: HubConfig,
    /// WebSocket endpoint settings
    #[cfg(feature = "websocket")]
    pub websocket: WebSocketConfig,
    /// How long shutdown waits for sessions to close cleanly
    pub grace_period_ms: u64,
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            #[cfg(feature = "websocket")]
            websocket: WebSocketConfig::default(),
            grace_period_ms: 5000,
            max_sessions: 0,
        }
    }
}

impl ServerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Parley relay server
pub struct Server {
    config: ServerConfig,
    hub: HubHandle,
    /// Every session task, including rejected ones still closing
    sessions: TaskTracker,
    /// Stops the accept loop
    accept_stop: CancellationToken,
    /// Aborts sessions that outlive the grace period
    force_stop: CancellationToken,
}

impl Server {
    /// Validate the configuration and start the hub.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.hub.validate()?;
        let (hub, task) = Hub::spawn(config.hub.clone());
        tokio::spawn(watch_hub(task));

        Ok(Self {
            config,
            hub,
            sessions: TaskTracker::new(),
            accept_stop: CancellationToken::new(),
            force_stop: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Session tasks still running
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stop accepting new connections; running sessions are untouched
    pub fn stop_accepting(&self) {
        self.accept_stop.cancel();
    }

    /// A coordinator wired to this server's listener, hub and sessions
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            self.hub.clone(),
            self.sessions.clone(),
            self.accept_stop.clone(),
            self.force_stop.clone(),
            self.config.grace_period(),
        )
    }

    /// Serve using any [`TransportServer`] until accepting is stopped.
    ///
    /// The listener is dropped on return; sessions keep running.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        match server.local_addr() {
            Ok(addr) => info!("Relay accepting connections on {}", addr),
            Err(_) => info!("Relay accepting connections"),
        }

        loop {
            tokio::select! {
                _ = self.accept_stop.cancelled() => break,
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, info)) => {
                        self.handle_connection(Arc::new(sender), receiver, info);
                    }
                    // Handshake failures end up here too; they only affect that peer
                    Err(e) => warn!("Accept error: {}", e),
                },
            }
        }

        info!("Relay stopped accepting connections");
        Ok(())
    }

    /// Bind a WebSocket listener on `addr` and serve on it
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let server = WebSocketServer::bind(addr)
            .await?
            .with_config(self.config.websocket.clone());
        self.serve_on(server).await
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        receiver: impl TransportReceiver + 'static,
        info: ConnectInfo,
    ) {
        let full = self.config.max_sessions > 0 && self.sessions.len() >= self.config.max_sessions;
        let addr = info.addr;
        let client_id = info.client_id.unwrap_or_else(guest_id);

        debug!("New connection from {} as {} in {}", addr, client_id, info.room_id);

        let (session, handle) = Session::new(
            client_id,
            info.room_id,
            sender,
            receiver,
            self.config.hub.session_queue_capacity,
        );
        let hub = self.hub.clone();
        let cancel = self.force_stop.clone();

        self.sessions.spawn(async move {
            if full {
                warn!("Session limit reached, refusing {}", addr);
                reject(session, CloseFrame::new(CLOSE_POLICY_VIOLATION, "server full"), &cancel).await;
                return;
            }

            match hub.register(handle).await {
                Ok(()) => session.run(hub, cancel).await,
                Err(HubError::DuplicateClient { .. }) => {
                    let frame = CloseFrame::new(CLOSE_POLICY_VIOLATION, "duplicate client id");
                    reject(session, frame, &cancel).await;
                }
                Err(e) => {
                    debug!("Registration failed for {}: {}", addr, e);
                    reject(session, CloseFrame::going_away(), &cancel).await;
                }
            }
        });
    }
}

/// Close a session that never ran, giving up when shutdown forces it
async fn reject(session: Session, frame: CloseFrame, cancel: &CancellationToken) {
    tokio::select! {
        _ = session.reject(frame) => {}
        _ = cancel.cancelled() => {}
    }
}

/// Report how the hub task ended. Returns true for a clean stop.
async fn watch_hub(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => {
            debug!("Hub task finished");
            true
        }
        Err(e) if e.is_panic() => {
            error!("Hub task panicked, no further messages will be routed: {}", e);
            false
        }
        Err(e) => {
            warn!("Hub task ended abnormally: {}", e);
            false
        }
    }
}

/// Identifier for a client that joined without one
fn guest_id() -> ClientId {
    let id = Uuid::new_v4().simple().to_string();
    format!("guest-{}", &id[..8])
}
