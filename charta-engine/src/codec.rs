//! Canonical wire representation of a change event.
//!
//! Every mutation that crosses the wire — local edits broadcast out,
//! remote edits applied in — is one of five kinds, ordered within a batch
//! as create → property → position → remove. Serialization is JSON
//! (property payloads are open key/value maps, which need a
//! self-describing format).

use charta_model::{BusinessObject, Element, DEFAULT_SHAPE_HEIGHT, DEFAULT_SHAPE_WIDTH};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The five change kinds a batch can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Property,
    Position,
    Remove,
    Connection,
}

/// Extracted element payload carried by create/connection changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Default for ElementData {
    fn default() -> Self {
        Self {
            id: None,
            element_type: None,
            x: 0,
            y: 0,
            width: DEFAULT_SHAPE_WIDTH,
            height: DEFAULT_SHAPE_HEIGHT,
            properties: Map::new(),
        }
    }
}

impl ElementData {
    /// Extract the wire payload for an element: identity, geometry
    /// (defaulted when degenerate), and the known business properties.
    pub fn from_element(element: &Element) -> Self {
        Self {
            id: Some(element.id.clone()),
            element_type: Some(element.element_type.clone()),
            x: element.x,
            y: element.y,
            width: if element.width == 0 { DEFAULT_SHAPE_WIDTH } else { element.width },
            height: if element.height == 0 { DEFAULT_SHAPE_HEIGHT } else { element.height },
            properties: extract_properties(&element.business),
        }
    }
}

/// Copy the known business keys into a flat map, each only when present.
pub fn extract_properties(business: &BusinessObject) -> Map<String, Value> {
    let mut props = Map::new();
    if let Some(name) = &business.name {
        props.insert("name".into(), Value::String(name.clone()));
    }
    if let Some(documentation) = &business.documentation {
        props.insert("documentation".into(), documentation.clone());
    }
    if let Some(assignee) = &business.assignee {
        props.insert("assignee".into(), Value::String(assignee.clone()));
    }
    if let Some(candidate_users) = &business.candidate_users {
        props.insert("candidateUsers".into(), Value::String(candidate_users.clone()));
    }
    if let Some(candidate_groups) = &business.candidate_groups {
        props.insert("candidateGroups".into(), Value::String(candidate_groups.clone()));
    }
    if let Some(form_key) = &business.form_key {
        props.insert("formKey".into(), Value::String(form_key.clone()));
    }
    if let Some(priority) = &business.priority {
        props.insert("priority".into(), priority.clone());
    }
    if let Some(due_date) = &business.due_date {
        props.insert("dueDate".into(), Value::String(due_date.clone()));
    }
    props
}

/// One change event in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_data: Option<ElementData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_remote: bool,
}

impl ChangeEvent {
    fn base(kind: ChangeKind, element_id: impl Into<String>) -> Self {
        Self {
            kind,
            element_id: element_id.into(),
            element_type: None,
            properties: None,
            x: None,
            y: None,
            width: None,
            height: None,
            element_data: None,
            source_id: None,
            target_id: None,
            timestamp: now_ms(),
            user_id: None,
            is_remote: false,
        }
    }

    /// A shape creation, carrying the full element payload.
    pub fn create(element: &Element) -> Self {
        let mut change = Self::base(ChangeKind::Create, element.id.clone());
        change.element_type = Some(element.element_type.clone());
        change.element_data = Some(ElementData::from_element(element));
        change.x = Some(element.x);
        change.y = Some(element.y);
        change
    }

    /// A connection creation, carrying endpoints alongside the payload.
    pub fn connection(element: &Element) -> Self {
        let mut change = Self::base(ChangeKind::Connection, element.id.clone());
        change.element_type = Some(element.element_type.clone());
        change.element_data = Some(ElementData::from_element(element));
        change.source_id = element.source_id.clone();
        change.target_id = element.target_id.clone();
        change
    }

    /// A property edit, carrying the extracted business properties.
    pub fn property(element: &Element) -> Self {
        let mut change = Self::base(ChangeKind::Property, element.id.clone());
        change.element_type = Some(element.element_type.clone());
        change.properties = Some(extract_properties(&element.business));
        change
    }

    /// A geometry edit.
    pub fn position(element: &Element) -> Self {
        let mut change = Self::base(ChangeKind::Position, element.id.clone());
        change.element_type = Some(element.element_type.clone());
        change.x = Some(element.x);
        change.y = Some(element.y);
        change.width = Some(element.width);
        change.height = Some(element.height);
        change
    }

    /// A removal; only the id survives (the element may already be gone).
    pub fn remove(element_id: impl Into<String>) -> Self {
        Self::base(ChangeKind::Remove, element_id)
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether this kind goes through the debounce buffer (property and
    /// position edits) rather than the immediate path.
    pub fn is_debounced(&self) -> bool {
        matches!(self.kind, ChangeKind::Property | ChangeKind::Position)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_shape() -> Element {
        let mut shape = Element::shape("Task_1", "Task");
        shape.business.set("name", json!("Approve"));
        shape.business.set("assignee", json!("gonzo"));
        shape.business.set("internalOnly", json!(true));
        shape.x = 40;
        shape.y = 60;
        shape
    }

    #[test]
    fn test_extract_properties_known_keys_only() {
        let shape = sample_shape();
        let props = extract_properties(&shape.business);
        assert_eq!(props.get("name"), Some(&json!("Approve")));
        assert_eq!(props.get("assignee"), Some(&json!("gonzo")));
        // Unknown keys stay out of the wire extraction.
        assert!(props.get("internalOnly").is_none());
    }

    #[test]
    fn test_element_data_defaults_geometry() {
        let conn = Element::connection("f", "SequenceFlow", "a", "b");
        let data = ElementData::from_element(&conn);
        assert_eq!(data.width, 100);
        assert_eq!(data.height, 80);
    }

    #[test]
    fn test_create_event_shape() {
        let shape = sample_shape();
        let change = ChangeEvent::create(&shape);
        assert_eq!(change.kind, ChangeKind::Create);
        assert_eq!(change.element_id, "Task_1");
        assert_eq!(change.element_type.as_deref(), Some("Task"));
        let data = change.element_data.unwrap();
        assert_eq!(data.id.as_deref(), Some("Task_1"));
        assert_eq!((data.x, data.y), (40, 60));
        assert!(change.timestamp > 0);
    }

    #[test]
    fn test_connection_event_carries_endpoints() {
        let mut store_shape = Element::shape("a", "Task");
        store_shape.business.set("name", json!("A"));
        let conn = Element::connection("f1", "SequenceFlow", "a", "b");
        let change = ChangeEvent::connection(&conn);
        assert_eq!(change.kind, ChangeKind::Connection);
        assert_eq!(change.source_id.as_deref(), Some("a"));
        assert_eq!(change.target_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_debounced_kinds() {
        let shape = sample_shape();
        assert!(ChangeEvent::property(&shape).is_debounced());
        assert!(ChangeEvent::position(&shape).is_debounced());
        assert!(!ChangeEvent::create(&shape).is_debounced());
        assert!(!ChangeEvent::remove("x").is_debounced());
    }

    #[test]
    fn test_wire_roundtrip() {
        let shape = sample_shape();
        let change = ChangeEvent::property(&shape).with_user("u1");
        let raw = change.encode().unwrap();
        let back = ChangeEvent::decode(&raw).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn test_wire_kind_tags_are_lowercase() {
        let raw = ChangeEvent::remove("x").encode().unwrap();
        assert!(raw.contains("\"kind\":\"remove\""));
    }

    #[test]
    fn test_decode_minimal_remote_payload() {
        let raw = r#"{"kind":"position","elementId":"s1","x":200,"y":200,"timestamp":1,"isRemote":true}"#;
        let change = ChangeEvent::decode(raw).unwrap();
        assert_eq!(change.kind, ChangeKind::Position);
        assert_eq!(change.element_id, "s1");
        assert_eq!(change.x, Some(200));
        assert!(change.is_remote);
        assert!(change.properties.is_none());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ChangeEvent::decode("{not json").is_err());
    }
}
