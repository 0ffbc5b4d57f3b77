//! Silent structural mutations and the batch executor.
//!
//! Every operation here mutates the model and refreshes graphics without
//! touching the editor's event bus or the command history — this is the
//! path remote changes take into the local replica.
//!
//! Batches run under render-gate suspension and apply in the fixed kind
//! order create → property → position → remove: creations must precede
//! references to them, removals must follow any last edits, and property
//! and visual edits commute among themselves.

use crate::codec::{ChangeEvent, ChangeKind, ElementData};
use crate::editor::LowLevelEditor;
use charta_model::{Element, GeometryPatch, ModelStore};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default chunk size for [`SilentUpdateService::batch_update_large`].
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Outcome of a batch: how many ops landed and how many were skipped.
/// Skips are logged; a batch never aborts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub skipped: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.applied + self.skipped
    }

    fn absorb(&mut self, other: BatchReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

/// The silent mutation layer: owns the model replica and the low-level
/// editor adapter, and applies changes beneath the event pipeline.
pub struct SilentUpdateService<E> {
    model: ModelStore,
    editor: E,
}

impl<E: LowLevelEditor> SilentUpdateService<E> {
    pub fn new(model: ModelStore, editor: E) -> Self {
        Self { model, editor }
    }

    pub fn model(&self) -> &ModelStore {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ModelStore {
        &mut self.model
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    /// Merge a property patch into an element's business object and force
    /// a graphics update. Returns the element, or `None` for unknown ids.
    pub fn update_business_object_directly(
        &mut self,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Option<&Element> {
        if !self.model.set_business(id, patch) {
            return None;
        }
        self.editor.refresh_graphics(id);
        self.model.get(id)
    }

    /// Dotted-path property assignment with a graphics refresh on success.
    pub fn set_business_object_property(&mut self, id: &str, path: &str, value: Value) -> bool {
        if !self.model.set_business_path(id, path, value) {
            return false;
        }
        self.editor.refresh_graphics(id);
        true
    }

    /// Re-home a child under a parent. Both ids must exist.
    pub fn set_business_object_parent(&mut self, child_id: &str, parent_id: &str) -> bool {
        self.model.reparent(child_id, parent_id)
    }

    /// Materialize a shape from a wire payload without emitting events.
    ///
    /// The requested id is used when supplied, otherwise one is generated.
    /// An already-present id is overwritten in place, keeping adjacency.
    pub fn add_element_silently(&mut self, data: &ElementData, parent: Option<&str>) -> Element {
        let element_type = data
            .element_type
            .clone()
            .unwrap_or_else(|| "Shape".to_string());
        let id = data
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_id(&element_type));

        let mut shape = Element::shape(&id, &element_type);
        shape.x = data.x;
        shape.y = data.y;
        shape.width = data.width;
        shape.height = data.height;
        shape.business.merge(&data.properties);

        if self.model.contains(&id) {
            log::debug!("overwriting existing element registration: {id}");
            self.model.replace(shape);
        } else {
            // Kind and duplicate checks both hold here.
            let _ = self.model.insert_shape(shape);
        }
        if let Some(parent_id) = parent {
            self.model.reparent(&id, parent_id);
        }
        self.editor.register_graphics(&id);
        self.model.get(&id).cloned().expect("inserted above")
    }

    /// Materialize a connection from a wire payload. Both endpoints must
    /// already exist; waypoints default to the endpoint centers.
    pub fn add_connection_silently(
        &mut self,
        data: &ElementData,
        source_id: &str,
        target_id: &str,
    ) -> Option<Element> {
        let (source_center, target_center) = match (self.model.get(source_id), self.model.get(target_id)) {
            (Some(source), Some(target)) => (source.center(), target.center()),
            _ => {
                log::warn!("connection endpoints missing: {source_id} -> {target_id}");
                return None;
            }
        };

        let element_type = data
            .element_type
            .clone()
            .unwrap_or_else(|| "Connection".to_string());
        let id = data
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_id(&element_type));

        let mut conn = Element::connection(&id, &element_type, source_id, target_id);
        conn.business.merge(&data.properties);
        conn.business.source_ref = Some(source_id.to_string());
        conn.business.target_ref = Some(target_id.to_string());
        conn.waypoints = vec![source_center, target_center];

        if self.model.contains(&id) {
            // Overwrite: detach the stale registration first so adjacency
            // stays consistent with the new endpoints.
            self.model.remove_by_id(&id);
        }
        if let Err(e) = self.model.insert_connection(conn) {
            log::warn!("connection rejected: {e}");
            return None;
        }
        self.editor.register_graphics(&id);
        self.model.get(&id).cloned()
    }

    /// Remove an element (cascading for shapes) without emitting events.
    /// Idempotent on unknown ids.
    pub fn remove_element_silently(&mut self, id: &str) -> bool {
        if !self.model.remove_by_id(id) {
            return false;
        }
        self.editor.unregister_graphics(id);
        true
    }

    /// Patch geometry fields and refresh graphics.
    pub fn update_visual_properties_directly(&mut self, id: &str, patch: GeometryPatch) -> bool {
        if !self.model.set_geometry(id, patch) {
            return false;
        }
        self.editor.refresh_graphics(id);
        true
    }

    pub fn set_element_position(&mut self, id: &str, x: i32, y: i32) -> bool {
        self.update_visual_properties_directly(id, GeometryPatch::position(x, y))
    }

    pub fn set_element_size(&mut self, id: &str, width: u32, height: u32) -> bool {
        self.update_visual_properties_directly(id, GeometryPatch::size(width, height))
    }

    /// Re-render one element without a data change.
    pub fn refresh_element_graphics(&mut self, id: &str) {
        self.editor.refresh_graphics(id);
    }

    /// Re-render everything.
    pub fn refresh_all_graphics(&mut self) {
        self.editor.refresh_all_graphics();
    }

    /// Apply one wire change. `Err` carries the skip reason; the caller
    /// logs and moves on.
    fn apply_change(&mut self, change: &ChangeEvent) -> Result<(), String> {
        if change.element_id.is_empty() {
            return Err("change without element id".into());
        }
        match change.kind {
            ChangeKind::Create => {
                let data = self.data_for(change);
                self.add_element_silently(&data, None);
                Ok(())
            }
            ChangeKind::Connection => {
                let data = self.data_for(change);
                let source = change
                    .source_id
                    .as_deref()
                    .ok_or_else(|| format!("connection {} without source", change.element_id))?;
                let target = change
                    .target_id
                    .as_deref()
                    .ok_or_else(|| format!("connection {} without target", change.element_id))?;
                self.add_connection_silently(&data, source, target)
                    .map(|_| ())
                    .ok_or_else(|| format!("connection {} endpoints unknown", change.element_id))
            }
            ChangeKind::Property => {
                let patch = change
                    .properties
                    .as_ref()
                    .ok_or_else(|| format!("property change {} without payload", change.element_id))?;
                if self.update_business_object_directly(&change.element_id, patch).is_none() {
                    return Err(format!("property change for unknown element {}", change.element_id));
                }
                Ok(())
            }
            ChangeKind::Position => {
                let patch = GeometryPatch {
                    x: change.x,
                    y: change.y,
                    width: change.width,
                    height: change.height,
                };
                if patch.is_empty() {
                    return Err(format!("position change {} without geometry", change.element_id));
                }
                if !self.update_visual_properties_directly(&change.element_id, patch) {
                    return Err(format!("position change for unknown element {}", change.element_id));
                }
                Ok(())
            }
            ChangeKind::Remove => {
                // Idempotent: removing an already-gone element is fine.
                self.remove_element_silently(&change.element_id);
                Ok(())
            }
        }
    }

    fn data_for(&self, change: &ChangeEvent) -> ElementData {
        change.element_data.clone().unwrap_or_else(|| {
            let mut data = ElementData::default();
            data.id = Some(change.element_id.clone());
            data.element_type = change.element_type.clone();
            if let Some(x) = change.x {
                data.x = x;
            }
            if let Some(y) = change.y {
                data.y = y;
            }
            if let Some(width) = change.width {
                data.width = width;
            }
            if let Some(height) = change.height {
                data.height = height;
            }
            if let Some(props) = &change.properties {
                data.properties = props.clone();
            }
            data
        })
    }

    /// Apply a batch in the order given, under render-gate suspension.
    /// The gate is resumed on return no matter what individual ops did.
    pub fn batch_update(&mut self, changes: &[ChangeEvent]) -> BatchReport {
        self.editor.suspend_render();
        let mut report = BatchReport::default();
        for change in changes {
            match self.apply_change(change) {
                Ok(()) => report.applied += 1,
                Err(reason) => {
                    report.skipped += 1;
                    log::warn!("skipping batched change: {reason}");
                }
            }
        }
        self.editor.resume_render();
        report
    }

    /// Apply a batch partitioned by kind in the fixed order
    /// create → property → position → remove (connections land with the
    /// creates, after shapes, so endpoints resolve).
    pub fn batch_update_optimized(&mut self, changes: &[ChangeEvent]) -> BatchReport {
        let mut ordered: Vec<&ChangeEvent> = Vec::with_capacity(changes.len());
        for kind in [
            ChangeKind::Create,
            ChangeKind::Connection,
            ChangeKind::Property,
            ChangeKind::Position,
            ChangeKind::Remove,
        ] {
            ordered.extend(changes.iter().filter(|c| c.kind == kind));
        }

        self.editor.suspend_render();
        let mut report = BatchReport::default();
        for change in ordered {
            match self.apply_change(change) {
                Ok(()) => report.applied += 1,
                Err(reason) => {
                    report.skipped += 1;
                    log::warn!("skipping batched change: {reason}");
                }
            }
        }
        self.editor.resume_render();
        report
    }

    /// Apply a large batch in fixed-size chunks, yielding to the host
    /// scheduler for 1 ms between chunks so the UI stays responsive.
    /// Chunking preserves the original op sequence.
    pub async fn batch_update_large(
        &mut self,
        changes: &[ChangeEvent],
        chunk_size: usize,
    ) -> BatchReport {
        let chunk_size = chunk_size.max(1);
        let mut report = BatchReport::default();
        let mut chunks = changes.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            report.absorb(self.batch_update_optimized(chunk));
            if chunks.peek().is_some() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }
        log::debug!(
            "large batch done: {} applied, {} skipped in {} ops",
            report.applied,
            report.skipped,
            changes.len()
        );
        report
    }
}

fn generate_id(element_type: &str) -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!("{}_{}", element_type, &tail[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{GraphicsCall, HeadlessEditor};
    use charta_model::Waypoint;
    use serde_json::json;

    fn service() -> SilentUpdateService<HeadlessEditor> {
        SilentUpdateService::new(ModelStore::new(), HeadlessEditor::new())
    }

    fn shape_data(id: &str, element_type: &str) -> ElementData {
        let mut data = ElementData::default();
        data.id = Some(id.to_string());
        data.element_type = Some(element_type.to_string());
        data
    }

    #[test]
    fn test_add_element_defaults_and_registers() {
        let mut svc = service();
        let element = svc.add_element_silently(&shape_data("t1", "Task"), None);
        assert_eq!(element.id, "t1");
        assert_eq!((element.width, element.height), (100, 80));
        assert_eq!((element.x, element.y), (0, 0));
        assert!(svc.editor().is_registered("t1"));
    }

    #[test]
    fn test_add_element_generates_id() {
        let mut svc = service();
        let mut data = ElementData::default();
        data.element_type = Some("Gateway".to_string());
        let element = svc.add_element_silently(&data, None);
        assert!(element.id.starts_with("Gateway_"));
        assert_eq!(element.id.len(), "Gateway_".len() + 8);
    }

    #[test]
    fn test_add_element_under_parent() {
        let mut svc = service();
        let mut proc_data = shape_data("proc", "Process");
        proc_data.properties = json!({"flowElements": []}).as_object().cloned().unwrap();
        svc.add_element_silently(&proc_data, None);

        svc.add_element_silently(&shape_data("t1", "Task"), Some("proc"));
        assert_eq!(
            svc.model().get("proc").unwrap().business.flow_elements,
            Some(vec!["t1".to_string()])
        );
        assert_eq!(
            svc.model().get("t1").unwrap().business.parent.as_deref(),
            Some("proc")
        );
    }

    #[test]
    fn test_add_element_overwrites_existing() {
        let mut svc = service();
        svc.add_element_silently(&shape_data("a", "Task"), None);
        svc.add_element_silently(&shape_data("b", "Task"), None);
        svc.add_connection_silently(&shape_data("c", "SequenceFlow"), "a", "b");

        let mut replacement = shape_data("a", "UserTask");
        replacement.properties = json!({"name": "v2"}).as_object().cloned().unwrap();
        svc.add_element_silently(&replacement, None);

        let a = svc.model().get("a").unwrap();
        assert_eq!(a.element_type, "UserTask");
        assert_eq!(a.business.name.as_deref(), Some("v2"));
        assert!(a.outgoing.contains("c"));
    }

    #[test]
    fn test_connection_defaults_waypoints_to_centers() {
        let mut svc = service();
        let mut a = shape_data("a", "Task");
        a.x = 0;
        a.y = 0;
        svc.add_element_silently(&a, None);
        let mut b = shape_data("b", "Task");
        b.x = 300;
        b.y = 200;
        svc.add_element_silently(&b, None);

        let conn = svc
            .add_connection_silently(&shape_data("f", "SequenceFlow"), "a", "b")
            .unwrap();
        assert_eq!(conn.waypoints, vec![Waypoint::new(50, 40), Waypoint::new(350, 240)]);
        assert_eq!(conn.business.source_ref.as_deref(), Some("a"));
        assert_eq!(conn.business.target_ref.as_deref(), Some("b"));
    }

    #[test]
    fn test_connection_missing_endpoint() {
        let mut svc = service();
        svc.add_element_silently(&shape_data("a", "Task"), None);
        assert!(svc
            .add_connection_silently(&shape_data("f", "SequenceFlow"), "a", "ghost")
            .is_none());
        assert!(!svc.model().contains("f"));
    }

    #[test]
    fn test_remove_cascades_and_unregisters() {
        let mut svc = service();
        svc.add_element_silently(&shape_data("a", "Task"), None);
        svc.add_element_silently(&shape_data("b", "Task"), None);
        svc.add_connection_silently(&shape_data("c1", "SequenceFlow"), "a", "b");

        assert!(svc.remove_element_silently("a"));
        assert!(!svc.model().contains("a"));
        assert!(!svc.model().contains("c1"));
        assert!(svc.model().get("b").unwrap().incoming.is_empty());
        assert!(!svc.remove_element_silently("a"));
    }

    #[test]
    fn test_property_and_visual_updates_refresh() {
        let mut svc = service();
        svc.add_element_silently(&shape_data("t", "Task"), None);
        svc.editor_mut().clear_journal();

        let patch = json!({"name": "renamed"}).as_object().cloned().unwrap();
        assert!(svc.update_business_object_directly("t", &patch).is_some());
        assert!(svc.set_business_object_property("t", "documentation.text", json!("d")));
        assert!(svc.set_element_position("t", 10, 20));
        assert!(svc.set_element_size("t", 120, 90));

        let t = svc.model().get("t").unwrap();
        assert_eq!(t.business.name.as_deref(), Some("renamed"));
        assert_eq!((t.x, t.y, t.width, t.height), (10, 20, 120, 90));
        assert_eq!(svc.editor().journal().len(), 4);
        assert!(svc
            .editor()
            .journal()
            .iter()
            .all(|call| matches!(call, GraphicsCall::Refresh(id) if id == "t")));
    }

    #[test]
    fn test_unknown_ids_return_negative() {
        let mut svc = service();
        let patch = json!({"name": "x"}).as_object().cloned().unwrap();
        assert!(svc.update_business_object_directly("ghost", &patch).is_none());
        assert!(!svc.set_business_object_property("ghost", "name", json!("x")));
        assert!(!svc.set_element_position("ghost", 1, 2));
        assert!(!svc.set_business_object_parent("ghost", "also-ghost"));
    }

    #[test]
    fn test_batch_update_skips_malformed_and_releases_gate() {
        let mut svc = service();
        svc.add_element_silently(&shape_data("t", "Task"), None);

        let mut good = ChangeEvent::position(svc.model().get("t").unwrap());
        good.x = Some(50);
        good.y = Some(60);
        let bad_target = {
            let mut c = ChangeEvent::remove("t"); // placeholder to clone shape
            c.kind = ChangeKind::Position;
            c.element_id = "ghost".to_string();
            c.x = Some(1);
            c
        };
        let mut no_geometry = ChangeEvent::remove("t");
        no_geometry.kind = ChangeKind::Position;

        let report = svc.batch_update(&[good, bad_target, no_geometry]);
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 2);
        assert!(!svc.editor().render_suspended());
        let t = svc.model().get("t").unwrap();
        assert_eq!((t.x, t.y), (50, 60));
    }

    #[test]
    fn test_batch_optimized_orders_mixed_ops() {
        // Remote batch: [remove x, create y, property z, position z] must
        // apply as create y, property z, position z, remove x.
        let mut svc = service();
        svc.add_element_silently(&shape_data("x", "Task"), None);
        svc.add_element_silently(&shape_data("z", "Task"), None);
        svc.editor_mut().clear_journal();

        let mut create_y = ChangeEvent::remove("y");
        create_y.kind = ChangeKind::Create;
        create_y.element_data = Some(shape_data("y", "Task"));

        let mut property_z = ChangeEvent::remove("z");
        property_z.kind = ChangeKind::Property;
        property_z.properties = json!({"name": "N"}).as_object().cloned();

        let mut position_z = ChangeEvent::remove("z");
        position_z.kind = ChangeKind::Position;
        position_z.x = Some(10);
        position_z.y = Some(20);

        let batch = vec![ChangeEvent::remove("x"), create_y, property_z, position_z];
        let report = svc.batch_update_optimized(&batch);
        assert_eq!(report.applied, 4);
        assert_eq!(report.skipped, 0);

        assert_eq!(
            svc.editor().journal(),
            &[
                GraphicsCall::Register("y".into()),
                GraphicsCall::Refresh("z".into()),
                GraphicsCall::Refresh("z".into()),
                GraphicsCall::Unregister("x".into()),
            ]
        );

        assert!(svc.model().contains("y"));
        assert!(!svc.model().contains("x"));
        let z = svc.model().get("z").unwrap();
        assert_eq!(z.business.name.as_deref(), Some("N"));
        assert_eq!((z.x, z.y), (10, 20));
    }

    #[test]
    fn test_batch_optimized_connection_after_creates() {
        let mut svc = service();

        let mut conn = ChangeEvent::remove("f");
        conn.kind = ChangeKind::Connection;
        conn.element_data = Some(shape_data("f", "SequenceFlow"));
        conn.source_id = Some("a".into());
        conn.target_id = Some("b".into());

        let mut create_a = ChangeEvent::remove("a");
        create_a.kind = ChangeKind::Create;
        create_a.element_data = Some(shape_data("a", "Task"));
        let mut create_b = ChangeEvent::remove("b");
        create_b.kind = ChangeKind::Create;
        create_b.element_data = Some(shape_data("b", "Task"));

        // Connection listed before its endpoints; partitioning fixes it.
        let report = svc.batch_update_optimized(&[conn, create_a, create_b]);
        assert_eq!(report.applied, 3);
        assert!(svc.model().contains("f"));
    }

    #[tokio::test]
    async fn test_batch_update_large_chunks() {
        let mut svc = service();
        let changes: Vec<ChangeEvent> = (0..250)
            .map(|i| {
                let mut c = ChangeEvent::remove(format!("s{i}"));
                c.kind = ChangeKind::Create;
                c.element_data = Some(shape_data(&format!("s{i}"), "Task"));
                c
            })
            .collect();

        let report = svc.batch_update_large(&changes, DEFAULT_CHUNK_SIZE).await;
        assert_eq!(report.applied, 250);
        assert_eq!(svc.model().len(), 250);
        assert!(!svc.editor().render_suspended());
        // One coalesced repaint per chunk.
        assert_eq!(svc.editor().gate().repaint_count(), 5);
    }

    #[tokio::test]
    async fn test_batch_update_large_zero_chunk_is_clamped() {
        let mut svc = service();
        let mut c = ChangeEvent::remove("only");
        c.kind = ChangeKind::Create;
        c.element_data = Some(shape_data("only", "Task"));
        let report = svc.batch_update_large(&[c], 0).await;
        assert_eq!(report.applied, 1);
    }
}
