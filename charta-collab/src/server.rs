//! WebSocket relay server with diagram-room routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (diagram_id) ── BroadcastGroup
//! Client B ──┘          │
//!                       ├── SessionCoordinator (roster, cursors)
//!                       ├── UserDirectory (identity, online flags)
//!                       └── PresenceCache (user↔socket, 1h TTL)
//! ```
//!
//! Each connection runs one task: a `select!` loop over the socket and
//! its room receiver. A change from user U on diagram D is re-broadcast
//! to every participant of D except U — the origin tag on each frame is
//! checked at the receiving side of the channel. Version counters ride
//! along opaquely; the server never validates them.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastFrame, BroadcastGroup, RoomManager};
use crate::directory::UserDirectory;
use crate::presence::PresenceCache;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::SessionCoordinator;
use charta_engine::codec::now_ms;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum participants per diagram room
    pub max_participants_per_diagram: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Interval between TTL sweeps, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9595".to_string(),
            max_participants_per_diagram: 100,
            broadcast_capacity: 256,
            sweep_interval_secs: 5,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_diagrams: usize,
}

/// Shared state across all connection tasks.
struct ServerState {
    coordinator: RwLock<SessionCoordinator>,
    directory: RwLock<UserDirectory>,
    presence: RwLock<PresenceCache>,
    rooms: RoomManager,
    stats: RwLock<ServerStats>,
}

/// The collaboration relay server.
pub struct CollabServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl CollabServer {
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(ServerState {
            coordinator: RwLock::new(SessionCoordinator::new()),
            directory: RwLock::new(UserDirectory::new()),
            presence: RwLock::new(PresenceCache::new()),
            rooms: RoomManager::new(config.broadcast_capacity),
            stats: RwLock::new(ServerStats::default()),
        });
        Self { config, state }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.state.stats.read().await.clone()
    }

    pub async fn participant_count(&self, diagram_id: &str) -> usize {
        self.state.coordinator.read().await.participant_count(diagram_id)
    }

    /// Start listening. Runs the accept loop and the periodic sweep; call
    /// from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collab server listening on {}", self.config.bind_addr);

        // Periodic TTL sweep over sessions, presence, and online flags.
        let sweep_state = self.state.clone();
        let sweep_interval = std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep_interval).await;
                let purged = sweep_state.coordinator.write().await.sweep();
                let evicted = sweep_state.presence.write().await.sweep();
                let flipped = sweep_state.directory.write().await.sweep_stale();
                if purged + evicted + flipped > 0 {
                    log::debug!(
                        "sweep: {purged} sessions purged, {evicted} presence entries, {flipped} users offline"
                    );
                }
            }
        });

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let state = self.state.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, state, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let socket_id = Uuid::new_v4().to_string();

    log::info!("WebSocket connection established from {addr}");
    {
        let mut stats = state.stats.write().await;
        stats.total_connections += 1;
        stats.active_connections += 1;
    }

    // Per-connection state
    let mut user: Option<(String, String)> = None;
    let mut joined: Option<String> = None;
    let mut room: Option<Arc<BroadcastGroup>> = None;
    let mut room_rx: Option<tokio::sync::broadcast::Receiver<BroadcastFrame>> = None;

    loop {
        tokio::select! {
            // Incoming WebSocket message
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        {
                            let mut stats = state.stats.write().await;
                            stats.total_messages += 1;
                            stats.total_bytes += text.len() as u64;
                        }
                        let message = match ClientMessage::decode(text.as_str()) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Undecodable frame from {addr}: {e}");
                                let reply = ServerMessage::Error { message: e.to_string() };
                                ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                continue;
                            }
                        };

                        match message {
                            ClientMessage::Authenticate { user_id, username } => {
                                let result = state
                                    .directory
                                    .write()
                                    .await
                                    .ensure_user(&user_id, &username);
                                let reply = match result {
                                    Ok(()) => {
                                        state.presence.write().await.bind(&user_id, &socket_id);
                                        user = Some((user_id.clone(), username.clone()));
                                        log::info!("Authenticated {username} ({user_id}) from {addr}");
                                        ServerMessage::Authenticated { user_id, username }
                                    }
                                    Err(e) => ServerMessage::AuthError { message: e.to_string() },
                                };
                                ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                            }

                            ClientMessage::JoinDiagram { diagram_id } => {
                                let (user_id, username) = match &user {
                                    Some(u) => u.clone(),
                                    None => {
                                        let reply = ServerMessage::Error {
                                            message: "not authenticated".to_string(),
                                        };
                                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                        continue;
                                    }
                                };

                                {
                                    let mut coordinator = state.coordinator.write().await;
                                    if coordinator.participant_count(&diagram_id)
                                        >= config.max_participants_per_diagram
                                    {
                                        drop(coordinator);
                                        let reply = ServerMessage::Error {
                                            message: format!("diagram {diagram_id} is full"),
                                        };
                                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                        continue;
                                    }
                                    coordinator.add_participant(&diagram_id, &user_id, &socket_id);
                                }

                                let group = state.rooms.get_or_create(&diagram_id).await;
                                room_rx = Some(group.subscribe());
                                room = Some(group.clone());
                                joined = Some(diagram_id.clone());

                                // Tell the others, then reply with the roster.
                                let announce = ServerMessage::UserJoined {
                                    user_id: user_id.clone(),
                                    username: username.clone(),
                                    timestamp: now_ms(),
                                };
                                group.send(BroadcastFrame::new(
                                    Some(user_id.clone()),
                                    announce.encode()?,
                                ));

                                let participants = {
                                    let coordinator = state.coordinator.read().await;
                                    let directory = state.directory.read().await;
                                    coordinator.participants_resolved(&diagram_id, &directory)
                                };
                                let reply = ServerMessage::ParticipantsUpdated { participants };
                                ws_sender.send(Message::Text(reply.encode()?.into())).await?;

                                let open_rooms = state.rooms.room_count().await;
                                state.stats.write().await.active_diagrams = open_rooms;
                                log::info!("{username} joined diagram {diagram_id}");
                            }

                            ClientMessage::LeaveDiagram { diagram_id } => {
                                let (user_id, username) = match &user {
                                    Some(u) => u.clone(),
                                    None => continue,
                                };
                                // Only meaningful for the room this connection joined.
                                if joined.as_deref() != Some(diagram_id.as_str()) {
                                    continue;
                                }
                                let removed = state
                                    .coordinator
                                    .write()
                                    .await
                                    .remove_participant(&diagram_id, &user_id);
                                if removed {
                                    if let Some(group) = &room {
                                        let announce = ServerMessage::UserLeft {
                                            user_id: user_id.clone(),
                                            username,
                                            timestamp: now_ms(),
                                        };
                                        group.send(BroadcastFrame::new(
                                            Some(user_id),
                                            announce.encode()?,
                                        ));
                                    }
                                    room_rx = None;
                                    room = None;
                                    joined = None;
                                    state.rooms.remove_if_empty(&diagram_id).await;
                                    let open_rooms = state.rooms.room_count().await;
                                    state.stats.write().await.active_diagrams = open_rooms;
                                }
                            }

                            ClientMessage::DiagramChange { diagram_id, changes, version } => {
                                let (user_id, username) = match &user {
                                    Some(u) => u.clone(),
                                    None => {
                                        let reply = ServerMessage::Error {
                                            message: "not authenticated".to_string(),
                                        };
                                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                        continue;
                                    }
                                };
                                if joined.as_deref() != Some(diagram_id.as_str()) {
                                    let reply = ServerMessage::Error {
                                        message: format!("not joined to diagram {diagram_id}"),
                                    };
                                    ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                    continue;
                                }

                                state.directory.write().await.touch(&user_id);
                                if let Some(group) = &room {
                                    let update = ServerMessage::DiagramUpdated {
                                        changes,
                                        version,
                                        user_id: user_id.clone(),
                                        username,
                                        timestamp: now_ms(),
                                    };
                                    let delivered = group.send(BroadcastFrame::new(
                                        Some(user_id),
                                        update.encode()?,
                                    ));
                                    log::trace!(
                                        "diagram {diagram_id} change fanned out to {delivered} subscribers"
                                    );
                                }
                            }

                            ClientMessage::CursorMove { diagram_id, x, y } => {
                                let (user_id, username) = match &user {
                                    Some(u) => u.clone(),
                                    None => continue,
                                };
                                let tracked = state
                                    .coordinator
                                    .write()
                                    .await
                                    .update_cursor(&diagram_id, &user_id, x, y);
                                if tracked {
                                    if let Some(group) = &room {
                                        let update = ServerMessage::CursorUpdated {
                                            user_id: user_id.clone(),
                                            username,
                                            x,
                                            y,
                                            timestamp: now_ms(),
                                        };
                                        group.send(BroadcastFrame::new(
                                            Some(user_id),
                                            update.encode()?,
                                        ));
                                    }
                                }
                            }
                        }
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break;
                    }

                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }

                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }

                    _ => {}
                }
            }

            // Outgoing broadcast frame for this connection's room
            frame = async {
                match room_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    // No room joined yet — wait forever
                    None => std::future::pending().await,
                }
            } => {
                match frame {
                    Ok(frame) => {
                        // Never echo a frame back to its originator.
                        let own = user.as_ref().map(|(id, _)| id.as_str());
                        if frame.origin.is_some() && frame.origin.as_deref() == own {
                            continue;
                        }
                        ws_sender
                            .send(Message::Text(frame.payload.as_str().into()))
                            .await?;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Connection {addr} lagged by {n} frames");
                    }
                    Err(_) => break,
                }
            }
        }
    }

    // Cleanup: drop the room subscription before deciding emptiness.
    drop(room_rx);

    if let Some((user_id, username)) = &user {
        let affected = state
            .coordinator
            .write()
            .await
            .remove_from_all_sessions(user_id);
        state.presence.write().await.unbind_user(user_id);
        state.directory.write().await.mark_offline(user_id);

        if let Some(group) = &room {
            let announce = ServerMessage::UserLeft {
                user_id: user_id.clone(),
                username: username.clone(),
                timestamp: now_ms(),
            };
            if let Ok(encoded) = announce.encode() {
                group.send(BroadcastFrame::new(Some(user_id.clone()), encoded));
            }
        }
        for diagram_id in &affected {
            state.rooms.remove_if_empty(diagram_id).await;
        }
        log::info!("{username} ({user_id}) disconnected from {} sessions", affected.len());
    }

    let open_rooms = state.rooms.room_count().await;
    {
        let mut stats = state.stats.write().await;
        stats.active_connections = stats.active_connections.saturating_sub(1);
        stats.active_diagrams = open_rooms;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9595");
        assert_eq!(config.max_participants_per_diagram, 100);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.sweep_interval_secs, 5);
    }

    #[test]
    fn test_server_creation() {
        let server = CollabServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9595");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = CollabServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.active_diagrams, 0);
    }

    #[tokio::test]
    async fn test_participant_count_empty() {
        let server = CollabServer::with_defaults();
        assert_eq!(server.participant_count("d1").await, 0);
    }
}
