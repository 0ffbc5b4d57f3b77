//! # charta-collab — Real-time collaboration layer for Charta
//!
//! WebSocket-based multiplayer diagram editing over a last-writer-wins
//! broadcast mesh. No CRDT, no OT: every change batch is relayed to the
//! other participants of the diagram room, and each receiving client
//! applies it silently through the engine's mediator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ CollabClient │ ◄────────────────► │ CollabServer │
//! │  (per user)  │    JSON frames     │  (central)   │
//! └──────┬───────┘                    └──────┬───────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌──────────────┐                   ┌────────────────┐
//! │ EventMediator│                   │ SessionCoord.  │
//! │ (engine)     │                   │ participants   │
//! └──────────────┘                   └──────┬─────────┘
//!                                           │
//!                                   ┌───────┴────────┐
//!                                   │ BroadcastGroup │
//!                                   │ (N-1 fan-out)  │
//!                                   └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages for the transport event table
//! - [`broadcast`] — room-based fan-out with origin exclusion
//! - [`session`] — per-diagram participant roster and sweeps
//! - [`directory`] — in-memory user and diagram registries
//! - [`presence`] — user↔socket cache with TTL expiry
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket client with an event stream

pub mod broadcast;
pub mod client;
pub mod directory;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{BroadcastFrame, BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{CollabClient, CollabEvent, ConnectionState};
pub use directory::{Diagram, DiagramRegistry, DirectoryError, User, UserDirectory};
pub use presence::PresenceCache;
pub use protocol::{ClientMessage, ParticipantProfile, ProtocolError, ServerMessage};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use session::{CollaborationSession, CursorPos, ParticipantRecord, SessionCoordinator};
