//! # charta-engine — Silent mutation core for Charta
//!
//! Applies remote diagram mutations into the local model without echoing
//! them back out as local events, without polluting the local undo history,
//! and with exactly one repaint per batch.
//!
//! ## Architecture
//!
//! ```text
//! local edit                         remote change
//!     │                                   │
//!     ▼                                   ▼
//! editor event bus ──► EventMediator ◄── SessionCoordinator
//!                        │      │
//!       (debounce 100ms) │      │ (processing-remote flag,
//!                        ▼      ▼  5s echo suppression)
//!                  ChangeEvent  SilentUpdateService
//!                   (outbound)       │
//!                                    ▼
//!                          RenderGate suspension
//!                                    │
//!                                    ▼
//!                              ModelStore
//! ```
//!
//! ## Modules
//!
//! - [`codec`] — canonical wire form of a change event
//! - [`commands`] — command stack with a reentrant silent mode
//! - [`gate`] — repaint suspend/resume with coalescing
//! - [`editor`] — the low-level editor capability trait
//! - [`mutation`] — silent structural mutations and the batch executor
//! - [`mediator`] — local/remote classification and echo suppression

pub mod codec;
pub mod commands;
pub mod editor;
pub mod gate;
pub mod mediator;
pub mod mutation;

pub use codec::{ChangeEvent, ChangeKind, ElementData};
pub use commands::{CommandContext, CommandError, CommandStack, CommandStackEvent, HistoryEntry};
pub use editor::{GraphicsCall, HeadlessEditor, LowLevelEditor};
pub use gate::RenderGate;
pub use mediator::{ChangeOrigin, EditorEvent, EventMediator};
pub use mutation::{BatchReport, SilentUpdateService, DEFAULT_CHUNK_SIZE};
