//! Session management
//!
//! A [`Session`] owns one connection and runs two paths over it:
//! - the read path decodes frames and submits them to the hub for routing
//! - the write path drains the outbound queue onto the connection
//!
//! The hub keeps the matching [`SessionHandle`], which holds the only producer
//! side of the outbound queue. Dropping the handle closes the queue, and the
//! write path answers with a "going away" close frame.

use parley_core::{codec, ClientId, Message, RoomId};
use parley_transport::{CloseFrame, TransportEvent, TransportReceiver, TransportSender};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{HubHandle, OverflowPolicy};

/// Session identifier
pub type SessionId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    id: SessionId,
    client_id: ClientId,
    room_id: RoomId,
}

impl Identity {
    fn new(client_id: ClientId, room_id: RoomId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_id,
            room_id,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.client_id, self.room_id)
    }
}

/// Outcome of handing a message to a session's outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued
    Queued,
    /// Queue full, message discarded
    Dropped,
    /// Session should be removed (slow consumer or writer already gone)
    Evict,
}

/// The hub's side of a session: identity plus the outbound queue producer
pub struct SessionHandle {
    identity: Identity,
    outbound: mpsc::Sender<Arc<Message>>,
}

impl SessionHandle {
    /// Create a handle and the consumer side of its outbound queue.
    ///
    /// [`Session::new`] uses this; it is public so the hub can be driven
    /// without a connection.
    pub fn new(
        client_id: impl Into<ClientId>,
        room_id: impl Into<RoomId>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = Self {
            identity: Identity::new(client_id.into(), room_id.into()),
            outbound,
        };
        (handle, rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.identity.id
    }

    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    pub fn room_id(&self) -> &str {
        &self.identity.room_id
    }

    /// Hand a message to the outbound queue under the given overflow policy
    pub async fn deliver(
        &self,
        message: &Arc<Message>,
        policy: OverflowPolicy,
        wait: Duration,
    ) -> Delivery {
        if policy == OverflowPolicy::Wait {
            return match tokio::time::timeout(wait, self.outbound.send(message.clone())).await {
                Ok(Ok(())) => Delivery::Queued,
                Ok(Err(_)) => Delivery::Evict,
                Err(_) => {
                    warn!("Delivery to {} timed out after {:?}, dropping", self.identity, wait);
                    Delivery::Dropped
                }
            };
        }

        match self.outbound.try_send(message.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) if policy == OverflowPolicy::Disconnect => {
                warn!("Outbound queue of {} is full, disconnecting", self.identity);
                Delivery::Evict
            }
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue of {} is full, dropping message", self.identity);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Evict,
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.identity.id)
            .field("client_id", &self.identity.client_id)
            .field("room_id", &self.identity.room_id)
            .finish()
    }
}

/// Why the read path stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    PeerClosed,
    Malformed,
    TransportError,
    HubStopped,
    WriterFinished,
    Cancelled,
}

/// Why the write path stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteEnd {
    QueueClosed,
    SendFailed,
    Cancelled,
}

/// A connected client session
pub struct Session {
    identity: Identity,
    sender: Arc<dyn TransportSender>,
    receiver: Box<dyn TransportReceiver>,
    outbound: mpsc::Receiver<Arc<Message>>,
}

impl Session {
    /// Create a session over a connection.
    ///
    /// The returned handle must be registered with the hub before [`Session::run`].
    pub fn new(
        client_id: impl Into<ClientId>,
        room_id: impl Into<RoomId>,
        sender: Arc<dyn TransportSender>,
        receiver: impl TransportReceiver + 'static,
        queue_capacity: usize,
    ) -> (Self, SessionHandle) {
        let (handle, outbound) = SessionHandle::new(client_id, room_id, queue_capacity);
        let session = Self {
            identity: handle.identity.clone(),
            sender,
            receiver: Box::new(receiver),
            outbound,
        };
        (session, handle)
    }

    pub fn id(&self) -> &SessionId {
        &self.identity.id
    }

    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    pub fn room_id(&self) -> &str {
        &self.identity.room_id
    }

    /// Close the connection without ever running the session
    pub async fn reject(self, frame: CloseFrame) {
        info!("Rejecting {}: {} {}", self.identity, frame.code, frame.reason);
        if let Err(e) = self.sender.close(Some(frame)).await {
            debug!("Close after rejection failed for {}: {}", self.identity, e);
        }
    }

    /// Run the read and write paths until both have stopped.
    ///
    /// Cancelling `cancel` aborts the connection without a close handshake.
    pub async fn run(self, hub: HubHandle, cancel: CancellationToken) {
        let Session {
            identity,
            sender,
            mut receiver,
            mut outbound,
        } = self;
        let writer_done = CancellationToken::new();

        debug!("Session {} ({}) started", identity, identity.id);

        let read = async {
            tokio::select! {
                _ = cancel.cancelled() => ReadEnd::Cancelled,
                _ = writer_done.cancelled() => ReadEnd::WriterFinished,
                end = read_path(&identity, receiver.as_mut(), &hub) => end,
            }
        };

        let write = async {
            let end = tokio::select! {
                _ = cancel.cancelled() => {
                    sender.abort();
                    WriteEnd::Cancelled
                }
                end = write_path(&identity, sender.as_ref(), &mut outbound, &hub) => end,
            };
            writer_done.cancel();
            end
        };

        let (read_end, write_end) = tokio::join!(read, write);

        info!(
            "Session {} closed (read: {:?}, write: {:?})",
            identity, read_end, write_end
        );
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.identity.id)
            .field("client_id", &self.identity.client_id)
            .field("room_id", &self.identity.room_id)
            .field("connected", &self.sender.is_connected())
            .finish()
    }
}

async fn read_path(
    identity: &Identity,
    receiver: &mut dyn TransportReceiver,
    hub: &HubHandle,
) -> ReadEnd {
    let end = loop {
        match receiver.recv().await {
            Some(TransportEvent::Data(data)) => match codec::decode(&data) {
                Ok(mut message) => {
                    message.stamp(&identity.client_id, &identity.room_id);
                    if hub.route(message).await.is_err() {
                        // A stopped hub has already closed our queue
                        return ReadEnd::HubStopped;
                    }
                }
                Err(e) => {
                    warn!("Can't read from {}: {}", identity, e);
                    break ReadEnd::Malformed;
                }
            },
            Some(TransportEvent::Connected) => continue,
            Some(TransportEvent::Disconnected { code, reason }) => {
                debug!("{} disconnected: {:?} {:?}", identity, code, reason);
                break ReadEnd::PeerClosed;
            }
            Some(TransportEvent::Error(e)) => {
                warn!("Transport error from {}: {}", identity, e);
                break ReadEnd::TransportError;
            }
            None => break ReadEnd::PeerClosed,
        }
    };

    // The write path may report the same session; the hub ignores the second one
    let _ = hub
        .deregister(identity.id.clone(), identity.room_id.clone())
        .await;
    end
}

async fn write_path(
    identity: &Identity,
    sender: &dyn TransportSender,
    outbound: &mut mpsc::Receiver<Arc<Message>>,
    hub: &HubHandle,
) -> WriteEnd {
    while let Some(message) = outbound.recv().await {
        let sent = match codec::encode(&message) {
            Ok(data) => sender.send(data).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = sent {
            warn!("Can't write to {}: {}", identity, e);
            let _ = hub
                .deregister(identity.id.clone(), identity.room_id.clone())
                .await;
            sender.abort();
            return WriteEnd::SendFailed;
        }
    }

    debug!("Outbound queue of {} closed, sending close frame", identity);
    if let Err(e) = sender.close(Some(CloseFrame::going_away())).await {
        debug!("Close frame to {} failed: {}", identity, e);
    }
    WriteEnd::QueueClosed
}
