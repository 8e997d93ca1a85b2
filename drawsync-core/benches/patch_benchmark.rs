use criterion::{criterion_group, criterion_main, Criterion};
use drawsync_core::{apply_to_pages, decode, diff_pages, encode, FileDocument, Page, Shape};
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
                            .with("style", "rounded=1;")
                            .with("vertex", "1")
                            .with(
                                "mxGeometry",
                                format!(r#"<mxGeometry x="{c}" y="{c}" width="80" height="40" as="geometry"/>"#),
                            ),
                    );
                }
                page
            })
            .collect(),
    )
}

fn bench_decode(c: &mut Criterion) {
    let text = encode(&document(4, 250)).unwrap();

    c.bench_function("decode_4x250", |b| {
        b.iter(|| black_box(decode(black_box(&text)).unwrap()));
    });
}

fn bench_diff_pages(c: &mut Criterion) {
    let before = document(4, 250).pages;
    let mut after = before.clone();
    after[1].shapes.reverse();
    after[2].shapes.truncate(200);
    after[3].name = "Renamed".into();

    c.bench_function("diff_pages_4x250", |b| {
        b.iter(|| black_box(diff_pages(black_box(&before), black_box(&after)).unwrap()));
    });
}

fn bench_apply(c: &mut Criterion) {
    let before = document(4, 250).pages;
    let mut after = before.clone();
    after[0].shapes.rotate_left(100);
    after[1].shapes.push(Shape::new("new").with("vertex", "1"));
    let patch = diff_pages(&before, &after).unwrap();

    c.bench_function("apply_patch_4x250", |b| {
        b.iter(|| {
            let mut pages = before.clone();
            apply_to_pages(&mut pages, black_box(&patch)).unwrap();
            black_box(pages);
        })
    });
}

criterion_group!(benches, bench_decode, bench_diff_pages, bench_apply);
criterion_main!(benches);
