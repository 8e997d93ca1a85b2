use criterion::{criterion_group, criterion_main, Criterion};
use drawsync_collab::{
    generate_patch, EventCollector, ReplicatedDocument, Snapshot, INIT_ORIGIN, LOCAL_ORIGIN,
};
use drawsync_core::{Anchor, CellInsert, FileDocument, Page, PatchBuilder, Shape};
use std::hint::black_box;

fn document(pages: usize, cells: usize) -> FileDocument {
    FileDocument::new(
        (0..pages)
            .map(|p| {
                let mut page = Page::new(format!("page-{p}"), format!("Page {p}"));
                for c in 0..cells {
                    page.shapes.push(
                        Shape::new(format!("cell-{c}"))
                            .with("value", format!("Cell {c}"))
                            .with("vertex", "1"),
                    );
                }
                page
            })
            .collect(),
    )
}

fn edit() -> drawsync_core::FilePatch {
    let mut builder = PatchBuilder::new();
    let cells = builder.cells("page-1");
    for i in 0..20 {
        let previous = if i == 0 {
            Anchor::after("cell-10")
        } else {
            Anchor::after(format!("new-{}", i - 1))
        };
        cells.insert(CellInsert {
            id: format!("new-{i}"),
            previous,
            attributes: [("vertex".to_string(), "1".to_string())].into(),
        });
    }
    cells.move_cell("cell-0", Anchor::after("cell-99"));
    cells.set_attribute("cell-5", "value", Some("edited".into()));
    builder.build()
}

fn bench_load(c: &mut Criterion) {
    let doc = document(4, 250);
    c.bench_function("replica_load_4x250", |b| {
        b.iter(|| {
            let replica = ReplicatedDocument::with_client_id(1);
            replica.load(black_box(&doc), INIT_ORIGIN);
            black_box(replica);
        })
    });
}

fn bench_apply_and_generate(c: &mut Criterion) {
    let doc = document(4, 250);
    let patch = edit();

    c.bench_function("replica_apply_generate_4x250", |b| {
        b.iter(|| {
            let replica = ReplicatedDocument::with_client_id(1);
            replica.load(&doc, INIT_ORIGIN);
            let collector = EventCollector::attach(&replica);
            let mut snapshot = Snapshot::new();
            generate_patch(&replica, &mut snapshot, &[]).unwrap();

            replica.apply_patch(black_box(&patch), LOCAL_ORIGIN).unwrap();
            let events = collector.drain().map(|batch| batch.events).unwrap_or_default();
            black_box(generate_patch(&replica, &mut snapshot, &events).unwrap());
        })
    });
}

criterion_group!(benches, bench_load, bench_apply_and_generate);
criterion_main!(benches);
