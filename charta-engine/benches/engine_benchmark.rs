use charta_engine::codec::{ChangeEvent, ChangeKind, ElementData};
use charta_engine::editor::HeadlessEditor;
use charta_engine::mutation::SilentUpdateService;
use charta_model::{Element, ModelStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn create_change(id: &str) -> ChangeEvent {
    let mut data = ElementData::default();
    data.id = Some(id.to_string());
    data.element_type = Some("Task".to_string());
    let mut change = ChangeEvent::remove(id);
    change.kind = ChangeKind::Create;
    change.element_data = Some(data);
    change
}

fn bench_batch_apply_100(c: &mut Criterion) {
    let changes: Vec<ChangeEvent> = (0..100).map(|i| create_change(&format!("s{i}"))).collect();

    c.bench_function("batch_apply_100_creates", |b| {
        b.iter(|| {
            let mut svc = SilentUpdateService::new(ModelStore::new(), HeadlessEditor::new());
            let report = svc.batch_update_optimized(black_box(&changes));
            black_box(report);
        })
    });
}

fn bench_batch_partition_mixed(c: &mut Criterion) {
    // A realistic mixed batch: creates, property edits, moves, removes.
    let mut changes = Vec::new();
    for i in 0..25 {
        changes.push(create_change(&format!("n{i}")));
        let mut prop = ChangeEvent::remove(&format!("n{i}"));
        prop.kind = ChangeKind::Property;
        prop.properties = serde_json::json!({"name": format!("task {i}")})
            .as_object()
            .cloned();
        changes.push(prop);
        let mut pos = ChangeEvent::remove(&format!("n{i}"));
        pos.kind = ChangeKind::Position;
        pos.x = Some(i * 10);
        pos.y = Some(i * 10);
        changes.push(pos);
    }

    c.bench_function("batch_apply_mixed_75", |b| {
        b.iter(|| {
            let mut svc = SilentUpdateService::new(ModelStore::new(), HeadlessEditor::new());
            black_box(svc.batch_update_optimized(black_box(&changes)));
        })
    });
}

fn bench_change_encode(c: &mut Criterion) {
    let mut shape = Element::shape("Task_1", "Task");
    shape.business.set("name", serde_json::json!("Approve order"));
    let change = ChangeEvent::property(&shape);

    c.bench_function("change_encode_property", |b| {
        b.iter(|| {
            black_box(black_box(&change).encode().unwrap());
        })
    });
}

fn bench_cascade_remove(c: &mut Criterion) {
    c.bench_function("cascade_remove_hub_50", |b| {
        b.iter(|| {
            let mut store = ModelStore::new();
            store.insert_shape(Element::shape("hub", "Gateway")).unwrap();
            for i in 0..50 {
                let id = format!("s{i}");
                store.insert_shape(Element::shape(&id, "Task")).unwrap();
                store
                    .insert_connection(Element::connection(
                        format!("c{i}"),
                        "SequenceFlow",
                        "hub",
                        &id,
                    ))
                    .unwrap();
            }
            black_box(store.remove_by_id("hub"));
        })
    });
}

criterion_group!(
    benches,
    bench_batch_apply_100,
    bench_batch_partition_mixed,
    bench_change_encode,
    bench_cascade_remove
);
criterion_main!(benches);
