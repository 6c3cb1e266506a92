//! WebSocket transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::{
    accept_hdr_async, connect_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse},
        http::{StatusCode, Uri},
        protocol::{frame::coding::CloseCode, CloseFrame as WsCloseFrame, Message as WsMessage},
        Error as WsError,
    },
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{
    CloseFrame, ConnectInfo, Transport, TransportEvent, TransportReceiver, TransportSender,
    TransportServer,
};

use parley_core::{ClientId, RoomId, CLIENT_PARAM, DEFAULT_WS_PATH, ROOM_PARAM};

/// Buffer between the connection tasks and their handles
const CHANNEL_CAPACITY: usize = 100;

/// WebSocket configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Request path accepted for upgrades
    pub path: String,
    /// Query parameter holding the client identifier
    pub client_param: String,
    /// Query parameter holding the room identifier
    pub room_param: String,
    /// How long a peer gets to complete the upgrade after connecting
    pub handshake_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_WS_PATH.to_string(),
            client_param: CLIENT_PARAM.to_string(),
            room_param: ROOM_PARAM.to_string(),
            handshake_timeout_ms: 10_000,
        }
    }
}

impl WebSocketConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Upgrade request parameters
#[derive(Debug, Clone, PartialEq, Eq)]
struct JoinParams {
    client_id: Option<ClientId>,
    room_id: RoomId,
}

/// Why an upgrade request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rejection {
    NotFound(String),
    BadRequest(String),
}

impl Rejection {
    fn into_response(self) -> ErrorResponse {
        let (status, body) = match self {
            Rejection::NotFound(body) => (StatusCode::NOT_FOUND, body),
            Rejection::BadRequest(body) => (StatusCode::BAD_REQUEST, body),
        };
        let mut response = ErrorResponse::new(Some(body));
        *response.status_mut() = status;
        response
    }
}

fn parse_join(uri: &Uri, config: &WebSocketConfig) -> std::result::Result<JoinParams, Rejection> {
    if uri.path() != config.path {
        return Err(Rejection::NotFound(format!("no endpoint at {}", uri.path())));
    }

    let mut client_id = None;
    let mut room_id = None;
    let query = uri.query().unwrap_or_default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        if key == config.client_param.as_str() && client_id.is_none() {
            client_id = Some(value.into_owned());
        } else if key == config.room_param.as_str() && room_id.is_none() {
            room_id = Some(value.into_owned());
        }
    }

    let room_id = room_id
        .ok_or_else(|| Rejection::BadRequest(format!("missing {} parameter", config.room_param)))?;

    Ok(JoinParams { client_id, room_id })
}

/// WebSocket connector (client side)
pub struct WebSocketTransport;

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
    kill: CancellationToken,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        // JSON frames go out as text; anything else stays binary
        let msg = match std::str::from_utf8(&data) {
            Ok(text) => WsMessage::Text(text.to_owned()),
            Err(_) => WsMessage::Binary(data.to_vec()),
        };

        // The writer task only goes away with the connection
        self.tx
            .send(msg)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self, frame: Option<CloseFrame>) -> Result<()> {
        {
            let mut connected = self.connected.lock();
            if !*connected {
                return Ok(());
            }
            *connected = false;
        }

        let frame = frame.map(|f| WsCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.into(),
        });
        // The writer may already be gone; the connection is closing either way
        let _ = self.tx.send(WsMessage::Close(frame)).await;
        Ok(())
    }

    fn abort(&self) {
        *self.connected.lock() = false;
        self.kill.cancel();
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Split a WebSocket stream into reader and writer tasks
fn spawn_io<S>(ws_stream: WebSocketStream<S>, addr: Option<SocketAddr>) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();
    let kill = CancellationToken::new();
    let kill_write = kill.clone();
    let kill_read = kill.clone();

    // Writer task
    tokio::spawn(async move {
        let mut write = write;
        loop {
            let msg = tokio::select! {
                _ = kill_write.cancelled() => break,
                msg = send_rx.recv() => msg,
            };
            let Some(msg) = msg else { break };
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error ({:?}): {}", addr, e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
        // Stop the reader too, so a peer that never answers our close can't hold the socket
        kill_write.cancel();
    });

    // Reader task
    tokio::spawn(async move {
        let mut read = read;

        if event_tx.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        loop {
            let next = tokio::select! {
                _ = kill_read.cancelled() => break,
                next = read.next() => next,
            };
            let event = match next {
                Some(Ok(WsMessage::Text(text))) => TransportEvent::Data(Bytes::from(text)),
                Some(Ok(WsMessage::Binary(data))) => TransportEvent::Data(Bytes::from(data)),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), Some(f.reason.into_owned())),
                        None => (None, None),
                    };
                    let _ = event_tx
                        .send(TransportEvent::Disconnected { code, reason })
                        .await;
                    break;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("WebSocket read error ({:?}): {}", addr, e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            code: None,
                            reason: None,
                        })
                        .await;
                    break;
                }
            };
            if event_tx.send(event).await.is_err() {
                break;
            }
        }

        *connected_read.lock() = false;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
        kill,
    };

    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, response) = connect_async(url).await.map_err(|e| match e {
            WsError::Url(e) => TransportError::InvalidUrl(e.to_string()),
            e => TransportError::ConnectionFailed(e.to_string()),
        })?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, None))
    }
}

/// A finished upgrade, ready to hand to the caller
type Upgraded = Result<(WebSocketSender, WebSocketReceiver, ConnectInfo)>;

/// WebSocket server
///
/// Upgrades run on their own tasks, so a peer that connects and then stalls
/// only holds up itself. Dropping the server aborts upgrades still pending.
pub struct WebSocketServer {
    listener: TcpListener,
    config: WebSocketConfig,
    handshakes: JoinSet<Upgraded>,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
            handshakes: JoinSet::new(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Upgrades accepted at the TCP level but not finished yet
    pub fn pending_handshakes(&self) -> usize {
        self.handshakes.len()
    }
}

async fn handshake(stream: TcpStream, addr: SocketAddr, config: WebSocketConfig) -> Upgraded {
    let mut join: Option<JoinParams> = None;
    let upgrade = accept_hdr_async(stream, |req: &HsRequest, response: HsResponse| {
        match parse_join(req.uri(), &config) {
            Ok(params) => {
                join = Some(params);
                Ok(response)
            }
            Err(rejection) => Err(rejection.into_response()),
        }
    });

    let ws_stream = tokio::time::timeout(config.handshake_timeout(), upgrade)
        .await
        .map_err(|_| {
            TransportError::Handshake(format!(
                "{}: no upgrade within {:?}",
                addr,
                config.handshake_timeout()
            ))
        })?
        .map_err(|e| TransportError::Handshake(format!("{}: {}", addr, e)))?;

    let join = join.ok_or_else(|| TransportError::Handshake(format!("{}: no join parameters", addr)))?;

    info!(
        "WebSocket client connected from {} (client={:?}, room={})",
        addr, join.client_id, join.room_id
    );

    let (sender, receiver) = spawn_io(ws_stream, Some(addr));
    let info = ConnectInfo {
        addr,
        client_id: join.client_id,
        room_id: join.room_id,
    };

    Ok((sender, receiver, info))
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    /// Next connection that finished its upgrade, or the next failed one.
    ///
    /// Cancel safe: pending upgrades live on the server, not in this future.
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, ConnectInfo)> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) =
                        accepted.map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
                    debug!("Accepted TCP connection from {}", addr);
                    self.handshakes.spawn(handshake(stream, addr, self.config.clone()));
                }
                Some(done) = self.handshakes.join_next() => {
                    return done.map_err(|e| TransportError::Handshake(e.to_string()))?;
                }
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_websocket_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.path, "/ws");
        assert_eq!(config.client_param, "username");
        assert_eq!(config.room_param, "roomid");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_websocket_config_from_toml() {
        let config: WebSocketConfig = toml::from_str(
            r#"
            path = "/signal"
            handshake_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.path, "/signal");
        assert_eq!(config.room_param, "roomid");
        assert_eq!(config.handshake_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_join() {
        let config = WebSocketConfig::default();
        let params = parse_join(&uri("/ws?username=alice&roomid=lobby"), &config).unwrap();
        assert_eq!(params.client_id.as_deref(), Some("alice"));
        assert_eq!(params.room_id, "lobby");
    }

    #[test]
    fn test_parse_join_decodes_percent_escapes() {
        let config = WebSocketConfig::default();
        let params = parse_join(&uri("/ws?roomid=team%20room&username=j%C3%BCrgen"), &config).unwrap();
        assert_eq!(params.room_id, "team room");
        assert_eq!(params.client_id.as_deref(), Some("jürgen"));
    }

    #[test]
    fn test_parse_join_anonymous() {
        let config = WebSocketConfig::default();
        let params = parse_join(&uri("/ws?roomid=lobby&username="), &config).unwrap();
        assert_eq!(params.client_id, None);
    }

    #[test]
    fn test_parse_join_rejects() {
        let config = WebSocketConfig::default();
        assert!(matches!(
            parse_join(&uri("/other?roomid=lobby"), &config),
            Err(Rejection::NotFound(_))
        ));
        assert!(matches!(
            parse_join(&uri("/ws?username=alice"), &config),
            Err(Rejection::BadRequest(_))
        ));
        assert!(matches!(
            parse_join(&uri("/ws"), &config),
            Err(Rejection::BadRequest(_))
        ));
    }

    #[test]
    fn test_rejection_status() {
        let response = Rejection::BadRequest("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_deref(), Some("nope"));
    }
}
