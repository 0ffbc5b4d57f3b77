//! Arena-keyed graph store with incidence bookkeeping.
//!
//! Invariants maintained by every mutation:
//! - a connection `c` is in `source.outgoing` iff `c.source_id == source.id`
//!   (symmetric for `incoming`/`target_id`);
//! - removing a shape cascades to every connection in `incoming ∪ outgoing`;
//! - each id appears at most once.
//!
//! Single-writer discipline: the store is owned by its hosting editor and
//! never mutated across threads.

use crate::element::{Element, ElementKind};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Store-level validation failures. Lookup misses are `Option`/`bool`,
/// never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    DuplicateId(String),
    UnknownEndpoint(String),
    KindMismatch(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "element id already registered: {id}"),
            Self::UnknownEndpoint(id) => write!(f, "connection endpoint not in registry: {id}"),
            Self::KindMismatch(id) => write!(f, "element kind mismatch for: {id}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// Partial geometry update; unset fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryPatch {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl GeometryPatch {
    pub fn position(x: i32, y: i32) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    pub fn size(width: u32, height: u32) -> Self {
        Self { width: Some(width), height: Some(height), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.width.is_none() && self.height.is_none()
    }
}

/// The element registry for one diagram.
#[derive(Debug, Default)]
pub struct ModelStore {
    elements: HashMap<String, Element>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// Register a shape. Fails on a duplicate id or a non-shape element.
    pub fn insert_shape(&mut self, shape: Element) -> Result<(), ModelError> {
        if shape.kind != ElementKind::Shape {
            return Err(ModelError::KindMismatch(shape.id));
        }
        if self.elements.contains_key(&shape.id) {
            return Err(ModelError::DuplicateId(shape.id));
        }
        self.elements.insert(shape.id.clone(), shape);
        Ok(())
    }

    /// Register a connection and wire up endpoint adjacency. Fails if the
    /// id is taken or either endpoint is missing from the registry.
    pub fn insert_connection(&mut self, conn: Element) -> Result<(), ModelError> {
        if conn.kind != ElementKind::Connection {
            return Err(ModelError::KindMismatch(conn.id));
        }
        if self.elements.contains_key(&conn.id) {
            return Err(ModelError::DuplicateId(conn.id));
        }
        let source_id = conn
            .source_id
            .clone()
            .ok_or_else(|| ModelError::UnknownEndpoint(String::new()))?;
        let target_id = conn
            .target_id
            .clone()
            .ok_or_else(|| ModelError::UnknownEndpoint(String::new()))?;
        if !self.elements.contains_key(&source_id) {
            return Err(ModelError::UnknownEndpoint(source_id));
        }
        if !self.elements.contains_key(&target_id) {
            return Err(ModelError::UnknownEndpoint(target_id));
        }

        let conn_id = conn.id.clone();
        self.elements.insert(conn_id.clone(), conn);
        if let Some(source) = self.elements.get_mut(&source_id) {
            source.outgoing.insert(conn_id.clone());
        }
        if let Some(target) = self.elements.get_mut(&target_id) {
            target.incoming.insert(conn_id);
        }
        Ok(())
    }

    /// Replace an existing registration in place, keeping adjacency sets.
    /// Used by the silent mutation layer for inbound creates whose id is
    /// already present (overwrite semantics).
    pub fn replace(&mut self, mut element: Element) {
        if let Some(existing) = self.elements.get(&element.id) {
            element.incoming = existing.incoming.clone();
            element.outgoing = existing.outgoing.clone();
        }
        self.elements.insert(element.id.clone(), element);
    }

    /// Remove an element by id. Shapes cascade to incident connections;
    /// connections detach from endpoint adjacency. Idempotent: returns
    /// false for unknown ids.
    pub fn remove_by_id(&mut self, id: &str) -> bool {
        let element = match self.elements.remove(id) {
            Some(e) => e,
            None => return false,
        };
        match element.kind {
            ElementKind::Shape => {
                let incident: Vec<String> = element
                    .incoming
                    .iter()
                    .chain(element.outgoing.iter())
                    .cloned()
                    .collect();
                for conn_id in incident {
                    self.remove_by_id(&conn_id);
                }
            }
            ElementKind::Connection => {
                if let Some(source_id) = &element.source_id {
                    if let Some(source) = self.elements.get_mut(source_id) {
                        source.outgoing.remove(id);
                    }
                }
                if let Some(target_id) = &element.target_id {
                    if let Some(target) = self.elements.get_mut(target_id) {
                        target.incoming.remove(id);
                    }
                }
            }
        }
        true
    }

    /// Shallow-merge a property patch into an element's business object.
    pub fn set_business(&mut self, id: &str, patch: &Map<String, Value>) -> bool {
        match self.elements.get_mut(id) {
            Some(element) => {
                element.business.merge(patch);
                true
            }
            None => false,
        }
    }

    /// Dotted-path assignment into an element's business object.
    pub fn set_business_path(&mut self, id: &str, path: &str, value: Value) -> bool {
        match self.elements.get_mut(id) {
            Some(element) => {
                element.business.set_path(path, value);
                true
            }
            None => false,
        }
    }

    /// Apply a partial geometry update; unset fields stay untouched.
    pub fn set_geometry(&mut self, id: &str, patch: GeometryPatch) -> bool {
        match self.elements.get_mut(id) {
            Some(element) => {
                if let Some(x) = patch.x {
                    element.x = x;
                }
                if let Some(y) = patch.y {
                    element.y = y;
                }
                if let Some(width) = patch.width {
                    element.width = width;
                }
                if let Some(height) = patch.height {
                    element.height = height;
                }
                true
            }
            None => false,
        }
    }

    /// Translate an element by a delta.
    pub fn move_by(&mut self, id: &str, dx: i32, dy: i32) -> bool {
        match self.elements.get_mut(id) {
            Some(element) => {
                element.x += dx;
                element.y += dy;
                true
            }
            None => false,
        }
    }

    /// Re-home `child_id` under `parent_id`: sets the parent back-reference
    /// and appends the child to the parent's `flow_elements` list when that
    /// list exists and doesn't already contain it.
    pub fn reparent(&mut self, child_id: &str, parent_id: &str) -> bool {
        if !self.elements.contains_key(child_id) || !self.elements.contains_key(parent_id) {
            return false;
        }
        if let Some(child) = self.elements.get_mut(child_id) {
            child.business.parent = Some(parent_id.to_string());
        }
        if let Some(parent) = self.elements.get_mut(parent_id) {
            if let Some(flow) = parent.business.flow_elements.as_mut() {
                if !flow.iter().any(|id| id == child_id) {
                    flow.push(child_id.to_string());
                }
            }
        }
        true
    }

    /// Count elements grouped by their domain type string.
    pub fn count_by_type(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for element in self.elements.values() {
            *counts.entry(element.element_type.clone()).or_insert(0) += 1;
        }
        counts
    }
}
