//! WebSocket client for the collaboration server.
//!
//! Connects, authenticates, joins a diagram room, and surfaces everything
//! the server relays as [`CollabEvent`]s on an mpsc channel. Outbound
//! change batches carry a client-side version counter the server relays
//! opaquely.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use charta_engine::codec::ChangeEvent;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the collaboration client.
#[derive(Debug, Clone)]
pub enum CollabEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Server confirmed authentication
    Authenticated { user_id: String, username: String },
    /// Server rejected authentication
    AuthFailed { message: String },
    /// A remote change batch to apply through the mediator
    RemoteChanges {
        changes: Vec<ChangeEvent>,
        version: u64,
        user_id: String,
        username: String,
    },
    /// Another participant joined the diagram
    UserJoined { user_id: String, username: String },
    /// Another participant left the diagram
    UserLeft { user_id: String, username: String },
    /// A participant moved their cursor
    CursorMoved { user_id: String, x: f64, y: f64 },
    /// Fresh roster after a membership change
    ParticipantsUpdated(Vec<crate::protocol::ParticipantProfile>),
    /// Server-side error surfaced to this client only
    ServerError { message: String },
}

/// The collaboration client.
pub struct CollabClient {
    user_id: String,
    username: String,
    diagram_id: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Client-side change version, bumped per outbound batch.
    version: Arc<RwLock<u64>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<CollabEvent>>,
    event_tx: mpsc::Sender<CollabEvent>,
}

impl CollabClient {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        diagram_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            user_id: user_id.into(),
            username: username.into(),
            diagram_id: diagram_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            version: Arc::new(RwLock::new(0)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CollabEvent>> {
        self.event_rx.take()
    }

    /// Connect, authenticate, and join the diagram room.
    ///
    /// Spawns background reader/writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;
        let (ws_stream, _) = match ws_result {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                log::error!("connect to {} failed: {e}", self.server_url);
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Text(frame.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            // Outgoing channel closed — the client went away; close the
            // socket so the server runs its disconnect cleanup.
            let _ = ws_writer
                .send(tokio_tungstenite::tungstenite::Message::Close(None))
                .await;
        });

        // Handshake: authenticate, then join the room.
        let auth = ClientMessage::Authenticate {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
        };
        let join = ClientMessage::JoinDiagram {
            diagram_id: self.diagram_id.clone(),
        };
        if let Some(tx) = &self.outgoing_tx {
            tx.send(auth.encode()?)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            tx.send(join.encode()?)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(CollabEvent::Connected).await;

        // Reader task: translate server frames into events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        let server_msg = match ServerMessage::decode(text.as_str()) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("undecodable server frame: {e}");
                                continue;
                            }
                        };
                        let event = match server_msg {
                            ServerMessage::Authenticated { user_id, username } => {
                                Some(CollabEvent::Authenticated { user_id, username })
                            }
                            ServerMessage::AuthError { message } => {
                                Some(CollabEvent::AuthFailed { message })
                            }
                            ServerMessage::DiagramUpdated {
                                changes,
                                version,
                                user_id,
                                username,
                                ..
                            } => Some(CollabEvent::RemoteChanges {
                                changes,
                                version,
                                user_id,
                                username,
                            }),
                            ServerMessage::UserJoined { user_id, username, .. } => {
                                Some(CollabEvent::UserJoined { user_id, username })
                            }
                            ServerMessage::UserLeft { user_id, username, .. } => {
                                Some(CollabEvent::UserLeft { user_id, username })
                            }
                            ServerMessage::CursorUpdated { user_id, x, y, .. } => {
                                Some(CollabEvent::CursorMoved { user_id, x, y })
                            }
                            ServerMessage::ParticipantsUpdated { participants } => {
                                Some(CollabEvent::ParticipantsUpdated(participants))
                            }
                            ServerMessage::Error { message } => {
                                Some(CollabEvent::ServerError { message })
                            }
                        };
                        if let Some(event) = event {
                            let _ = event_tx.send(event).await;
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(CollabEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send a batch of local changes. Bumps the client version counter.
    pub async fn send_changes(&self, changes: Vec<ChangeEvent>) -> Result<u64, ProtocolError> {
        if changes.is_empty() {
            return Ok(*self.version.read().await);
        }
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let version = {
            let mut v = self.version.write().await;
            *v += 1;
            *v
        };
        let msg = ClientMessage::DiagramChange {
            diagram_id: self.diagram_id.clone(),
            changes,
            version,
        };
        self.send(msg).await?;
        Ok(version)
    }

    /// Send a cursor position update.
    pub async fn send_cursor(&self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.send(ClientMessage::CursorMove {
            diagram_id: self.diagram_id.clone(),
            x,
            y,
        })
        .await
    }

    /// Leave the diagram room (the connection stays up).
    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::LeaveDiagram {
            diagram_id: self.diagram_id.clone(),
        })
        .await
    }

    /// Tear the connection down. The writer task sends a close frame once
    /// the outgoing channel drops.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn version(&self) -> u64 {
        *self.version.read().await
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn diagram_id(&self) -> &str {
        &self.diagram_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
