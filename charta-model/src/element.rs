//! Diagram element types: shapes, connections, and their business objects.
//!
//! A business object is an open record: a handful of well-known typed
//! properties (name, assignee, form key, …) plus an `extras` map that
//! absorbs any key the type system doesn't know about. Dotted-path writes
//! (`documentation.text`) descend into nested objects, creating
//! intermediate maps lazily.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Default shape width when a create payload carries no geometry.
pub const DEFAULT_SHAPE_WIDTH: u32 = 100;
/// Default shape height when a create payload carries no geometry.
pub const DEFAULT_SHAPE_HEIGHT: u32 = 80;

/// Structural kind tag for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Shape,
    Connection,
}

/// A single point on a connection's path, in diagram coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: i32,
    pub y: i32,
}

impl Waypoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Open business record attached to every element.
///
/// Known properties are typed fields; anything else lands in `extras`,
/// which serde flattens so the wire form stays a single flat object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusinessObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// String or nested object — dotted writes like `documentation.text`
    /// turn this into an object tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_users: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_groups: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_key: Option<String>,
    /// Number or expression string, so kept as a raw value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Owning parent element id (back-reference; the parents form a forest).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,
    /// Child ids, present only on container-like elements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_elements: Option<Vec<String>>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl BusinessObject {
    /// Set a single top-level property, routing known keys to their typed
    /// fields and unknown keys into `extras`. `null` clears.
    pub fn set(&mut self, key: &str, value: Value) {
        macro_rules! set_string_field {
            ($field:expr) => {
                *$field = if value.is_null() {
                    None
                } else {
                    Some(value_to_string(&value))
                }
            };
        }
        match key {
            "name" => set_string_field!(&mut self.name),
            "assignee" => set_string_field!(&mut self.assignee),
            "candidateUsers" => set_string_field!(&mut self.candidate_users),
            "candidateGroups" => set_string_field!(&mut self.candidate_groups),
            "formKey" => set_string_field!(&mut self.form_key),
            "dueDate" => set_string_field!(&mut self.due_date),
            "parent" => set_string_field!(&mut self.parent),
            "sourceRef" => set_string_field!(&mut self.source_ref),
            "targetRef" => set_string_field!(&mut self.target_ref),
            "documentation" => {
                self.documentation = if value.is_null() { None } else { Some(value) }
            }
            "priority" => self.priority = if value.is_null() { None } else { Some(value) },
            "flowElements" => {
                self.flow_elements = match value {
                    Value::Null => None,
                    Value::Array(items) => {
                        Some(items.iter().map(value_to_string).collect())
                    }
                    other => Some(vec![value_to_string(&other)]),
                }
            }
            _ => {
                if value.is_null() {
                    self.extras.remove(key);
                } else {
                    self.extras.insert(key.to_string(), value);
                }
            }
        }
    }

    /// Shallow-merge a patch of top-level properties.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.set(key, value.clone());
        }
    }

    /// Dotted-path assignment. `documentation.text = v` descends into the
    /// documentation value tree; any other multi-segment path descends into
    /// `extras`. Intermediate objects are created lazily; a non-object node
    /// in the way is replaced.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.');
        let head = match segments.next() {
            Some(h) if !h.is_empty() => h,
            _ => return,
        };
        let rest: Vec<&str> = segments.collect();

        if rest.is_empty() {
            self.set(head, value);
            return;
        }

        if head == "documentation" {
            let root = self
                .documentation
                .get_or_insert_with(|| Value::Object(Map::new()));
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            assign_nested(root.as_object_mut().expect("object ensured above"), &rest, value);
        } else {
            let entry = self
                .extras
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            assign_nested(entry.as_object_mut().expect("object ensured above"), &rest, value);
        }
    }

    /// Read a top-level property back as a JSON value.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "name" => self.name.clone().map(Value::String),
            "documentation" => self.documentation.clone(),
            "assignee" => self.assignee.clone().map(Value::String),
            "candidateUsers" => self.candidate_users.clone().map(Value::String),
            "candidateGroups" => self.candidate_groups.clone().map(Value::String),
            "formKey" => self.form_key.clone().map(Value::String),
            "priority" => self.priority.clone(),
            "dueDate" => self.due_date.clone().map(Value::String),
            "parent" => self.parent.clone().map(Value::String),
            "sourceRef" => self.source_ref.clone().map(Value::String),
            "targetRef" => self.target_ref.clone().map(Value::String),
            _ => self.extras.get(key).cloned(),
        }
    }
}

fn assign_nested(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    debug_assert!(!segments.is_empty());
    if segments.len() == 1 {
        map.insert(segments[0].to_string(), value);
        return;
    }
    let child = map
        .entry(segments[0].to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    assign_nested(
        child.as_object_mut().expect("object ensured above"),
        &segments[1..],
        value,
    );
}

/// A single diagram element: either a shape or a connection.
///
/// Adjacency (`incoming`/`outgoing`) holds connection ids, kept mutually
/// consistent with the connections' `source_id`/`target_id` by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub business: BusinessObject,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<Waypoint>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub incoming: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub outgoing: BTreeSet<String>,
}

impl Element {
    /// A shape with default geometry (100×80 at the origin).
    pub fn shape(id: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Shape,
            element_type: element_type.into(),
            business: BusinessObject::default(),
            x: 0,
            y: 0,
            width: DEFAULT_SHAPE_WIDTH,
            height: DEFAULT_SHAPE_HEIGHT,
            source_id: None,
            target_id: None,
            waypoints: Vec::new(),
            incoming: BTreeSet::new(),
            outgoing: BTreeSet::new(),
        }
    }

    /// A connection between two shape ids. Waypoints start empty; the
    /// mutation layer defaults them to the endpoint centers.
    pub fn connection(
        id: impl Into<String>,
        element_type: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Connection,
            element_type: element_type.into(),
            business: BusinessObject::default(),
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            source_id: Some(source_id.into()),
            target_id: Some(target_id.into()),
            waypoints: Vec::new(),
            incoming: BTreeSet::new(),
            outgoing: BTreeSet::new(),
        }
    }

    pub fn is_shape(&self) -> bool {
        self.kind == ElementKind::Shape
    }

    pub fn is_connection(&self) -> bool {
        self.kind == ElementKind::Connection
    }

    /// Geometric center, used for default connection waypoints.
    pub fn center(&self) -> Waypoint {
        Waypoint {
            x: self.x + self.width as i32 / 2,
            y: self.y + self.height as i32 / 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_defaults() {
        let shape = Element::shape("Task_1", "Task");
        assert_eq!(shape.width, 100);
        assert_eq!(shape.height, 80);
        assert_eq!((shape.x, shape.y), (0, 0));
        assert!(shape.is_shape());
        assert_eq!(shape.center(), Waypoint::new(50, 40));
    }

    #[test]
    fn test_connection_endpoints() {
        let conn = Element::connection("Flow_1", "SequenceFlow", "a", "b");
        assert!(conn.is_connection());
        assert_eq!(conn.source_id.as_deref(), Some("a"));
        assert_eq!(conn.target_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_business_set_known_and_extra() {
        let mut bo = BusinessObject::default();
        bo.set("name", json!("Review order"));
        bo.set("assignee", json!("kermit"));
        bo.set("customField", json!({"a": 1}));
        assert_eq!(bo.name.as_deref(), Some("Review order"));
        assert_eq!(bo.assignee.as_deref(), Some("kermit"));
        assert_eq!(bo.extras.get("customField"), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_business_set_null_clears() {
        let mut bo = BusinessObject::default();
        bo.set("name", json!("x"));
        bo.set("name", Value::Null);
        assert!(bo.name.is_none());

        bo.set("custom", json!(1));
        bo.set("custom", Value::Null);
        assert!(bo.extras.get("custom").is_none());
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut bo = BusinessObject::default();
        bo.set("name", json!("before"));
        let patch = json!({"name": "after", "priority": 50})
            .as_object()
            .cloned()
            .unwrap();
        bo.merge(&patch);
        assert_eq!(bo.name.as_deref(), Some("after"));
        assert_eq!(bo.priority, Some(json!(50)));
    }

    #[test]
    fn test_dotted_path_into_documentation() {
        let mut bo = BusinessObject::default();
        bo.set_path("documentation.text", json!("hello"));
        assert_eq!(bo.documentation, Some(json!({"text": "hello"})));

        // A second write under the same head must not clobber siblings.
        bo.set_path("documentation.format", json!("plain"));
        assert_eq!(
            bo.documentation,
            Some(json!({"text": "hello", "format": "plain"}))
        );
    }

    #[test]
    fn test_dotted_path_replaces_scalar_node() {
        let mut bo = BusinessObject::default();
        bo.set("documentation", json!("plain string"));
        bo.set_path("documentation.text", json!("structured"));
        assert_eq!(bo.documentation, Some(json!({"text": "structured"})));
    }

    #[test]
    fn test_dotted_path_into_extras() {
        let mut bo = BusinessObject::default();
        bo.set_path("extensionElements.props.color", json!("#ff0000"));
        assert_eq!(
            bo.extras.get("extensionElements"),
            Some(&json!({"props": {"color": "#ff0000"}}))
        );
    }

    #[test]
    fn test_serde_flattens_extras() {
        let mut bo = BusinessObject::default();
        bo.set("name", json!("n"));
        bo.set("custom", json!(true));
        let wire = serde_json::to_value(&bo).unwrap();
        assert_eq!(wire, json!({"name": "n", "custom": true}));

        let back: BusinessObject = serde_json::from_value(wire).unwrap();
        assert_eq!(back, bo);
    }

    #[test]
    fn test_element_serde_roundtrip() {
        let mut shape = Element::shape("Task_1", "Task");
        shape.business.set("name", json!("Ship it"));
        let wire = serde_json::to_string(&shape).unwrap();
        let back: Element = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, shape);
    }
}
