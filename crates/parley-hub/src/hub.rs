//! The hub: single owner of room membership and routing
//!
//! Every operation is a command on one mpsc channel, serviced one at a time
//! by the hub task. Membership lives inside that task, so it needs no lock.
//!
//! ```text
//!  session read path ──Route──────┐
//!  session read/write ─Deregister─┤
//!  server accept loop ─Register───┼──► hub task ──► outbound queues
//!  shutdown coordinator ─Shutdown─┘       (Rooms)
//! ```

use parley_core::{Message, RoomId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    error::{HubError, Result},
    rooms::Rooms,
    session::{Delivery, SessionHandle, SessionId},
};

/// What the hub does when a recipient's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the new message for that recipient
    #[default]
    DropNewest,
    /// Remove the slow recipient from its room
    Disconnect,
    /// Wait up to `delivery_timeout_ms` for space, then discard
    Wait,
}

/// Hub configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound queue capacity per session
    pub session_queue_capacity: usize,
    /// Pending commands before submitters have to wait
    pub command_capacity: usize,
    /// Full-queue behaviour
    pub overflow: OverflowPolicy,
    /// Upper bound on one delivery under [`OverflowPolicy::Wait`]
    pub delivery_timeout_ms: u64,
    /// Refuse a second session with the same client id in one room.
    ///
    /// Off by default: duplicates are admitted and unicast reaches the first.
    pub unique_client_ids: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_queue_capacity: 64,
            command_capacity: 256,
            overflow: OverflowPolicy::DropNewest,
            delivery_timeout_ms: 1000,
            unique_client_ids: false,
        }
    }
}

impl HubConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_queue_capacity == 0 {
            return Err(HubError::Config("session_queue_capacity must be at least 1".into()));
        }
        if self.command_capacity == 0 {
            return Err(HubError::Config("command_capacity must be at least 1".into()));
        }
        if self.overflow == OverflowPolicy::Wait && self.delivery_timeout_ms == 0 {
            return Err(HubError::Config(
                "delivery_timeout_ms must be positive with the wait policy".into(),
            ));
        }
        Ok(())
    }
}

/// Membership counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub rooms: usize,
    pub sessions: usize,
}

/// What shutdown did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Outbound queues closed
    pub sessions_closed: usize,
    /// Rooms that still had members
    pub rooms: usize,
}

enum Command {
    Register {
        session: SessionHandle,
        reply: oneshot::Sender<Result<()>>,
    },
    Deregister {
        id: SessionId,
        room_id: RoomId,
    },
    Route(Message),
    Stats(oneshot::Sender<HubStats>),
    Shutdown(oneshot::Sender<ShutdownReport>),
}

/// Cloneable entry point to a running hub.
///
/// Every call fails with [`HubError::Stopped`] once the hub has shut down.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| HubError::Stopped)
    }

    /// Add a session to its room
    pub async fn register(&self, session: SessionHandle) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Register { session, reply }).await?;
        rx.await.map_err(|_| HubError::Stopped)?
    }

    /// Remove a session and close its outbound queue. Absent sessions are ignored.
    pub async fn deregister(&self, id: SessionId, room_id: RoomId) -> Result<()> {
        self.submit(Command::Deregister { id, room_id }).await
    }

    /// Broadcast or unicast a message inside its room
    pub async fn route(&self, message: Message) -> Result<()> {
        self.submit(Command::Route(message)).await
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Close every session's outbound queue and stop the hub
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Shutdown(reply)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The hub task state
pub struct Hub {
    config: HubConfig,
    rooms: Rooms,
    rx: mpsc::Receiver<Command>,
}

impl Hub {
    /// Start the hub on the current tokio runtime
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let hub = Hub {
            config,
            rooms: Rooms::new(),
            rx,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("Hub started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Register { session, reply } => {
                    let _ = reply.send(self.register(session));
                }
                Command::Deregister { id, room_id } => self.deregister(&id, &room_id),
                Command::Route(message) => self.route(message).await,
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown(reply) => {
                    let report = self.shutdown();
                    let _ = reply.send(report);
                    return;
                }
            }
        }

        // Every handle dropped without an explicit shutdown
        let report = self.shutdown();
        debug!("Hub handles dropped, closed {} sessions", report.sessions_closed);
    }

    fn register(&mut self, session: SessionHandle) -> Result<()> {
        if self.config.unique_client_ids
            && self.rooms.has_client(session.room_id(), session.client_id())
        {
            warn!(
                "Refusing duplicate client {} in room {}",
                session.client_id(),
                session.room_id()
            );
            return Err(HubError::DuplicateClient {
                client_id: session.client_id().to_string(),
                room_id: session.room_id().to_string(),
            });
        }

        info!("Client registered: {} in room {}", session.client_id(), session.room_id());
        self.rooms.join(session);
        Ok(())
    }

    fn deregister(&mut self, id: &str, room_id: &str) {
        // Dropping the handle closes the outbound queue
        match self.rooms.leave(room_id, id) {
            Some(session) => {
                info!("Client deregistered: {} from room {}", session.client_id(), room_id);
            }
            None => debug!("Deregister for unknown session {} ignored", id),
        }
    }

    async fn route(&mut self, message: Message) {
        debug!(
            "Routing from {} in {} to {:?} ({:?})",
            message.client_id,
            message.room_id,
            message.destination(),
            message.data_hint()
        );

        let message = Arc::new(message);
        let policy = self.config.overflow;
        let wait = self.config.delivery_timeout();
        let mut evicted = Vec::new();

        for session in self.rooms.recipients(&message) {
            if session.deliver(&message, policy, wait).await == Delivery::Evict {
                evicted.push(session.id().clone());
            }
        }

        for id in evicted {
            if let Some(session) = self.rooms.leave(&message.room_id, &id) {
                warn!("Evicted {} from room {}", session.client_id(), message.room_id);
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            rooms: self.rooms.room_count(),
            sessions: self.rooms.session_count(),
        }
    }

    fn shutdown(&mut self) -> ShutdownReport {
        info!("Hub shutting down");
        let rooms = self.rooms.room_count();
        let mut sessions_closed = 0;
        for session in self.rooms.drain() {
            debug!("Closing outbound queue of {} in {}", session.client_id(), session.room_id());
            sessions_closed += 1;
        }
        info!("All {} session queues closed", sessions_closed);
        ShutdownReport {
            sessions_closed,
            rooms,
        }
    }
}
