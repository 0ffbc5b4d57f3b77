//! # charta-model — In-memory diagram graph for Charta
//!
//! The authoritative in-process replica of a diagram: a directed graph of
//! shapes and connections, each carrying an open business object.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ModelStore                    │
//! │                                              │
//! │  elements: id ──► Element                    │
//! │                   ├── kind (shape|connection)│
//! │                   ├── business object        │
//! │                   ├── geometry / waypoints   │
//! │                   └── incoming / outgoing    │
//! │                       (connection ids)       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Elements live in an arena keyed by id; adjacency is stored as sets of
//! connection ids, never pointers, so removal is always an id lookup and
//! a shape removal cascades to its incident connections.

pub mod element;
pub mod store;

pub use element::{
    BusinessObject, Element, ElementKind, Waypoint,
    DEFAULT_SHAPE_HEIGHT, DEFAULT_SHAPE_WIDTH,
};
pub use store::{GeometryPatch, ModelError, ModelStore};
