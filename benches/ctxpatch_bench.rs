use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ctxpatch::{apply_patch, parse_patch, ApplyOptions};
use indoc::indoc;

// --- Parsing Benchmarks ---

fn parsing_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");

    // Simple, single-hunk payload
    let simple_patch = indoc! {r#"
        @@ ... @@
         fn main() {
        -    println!("Hello, world!");
        +    println!("Hello, ctxpatch!");
         }
    "#};
    group.bench_function("simple_patch", |b| {
        b.iter(|| parse_patch(black_box(simple_patch)))
    });

    // Payload with many hunks
    let mut large_patch = String::new();
    for i in 0..100 {
        large_patch.push_str(&format!(
            "@@ ... @@\n context line {}\n-old line {}\n+new line {}\n",
            i, i, i
        ));
    }
    group.bench_function("large_patch_100_hunks", |b| {
        b.iter(|| parse_patch(black_box(&large_patch)))
    });

    group.finish();
}

// --- Applying Benchmarks ---

/// Builds a synthetic stylesheet-like document of `blocks` rule blocks.
fn synthetic_document(blocks: usize) -> String {
    let mut doc = String::new();
    for i in 0..blocks {
        doc.push_str(&format!(
            ".rule-{} {{\n    margin: {}px;\n    padding: {}px;\n}}\n\n",
            i,
            i % 7,
            i % 5
        ));
    }
    doc
}

fn applying_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Applying");
    let options = ApplyOptions::default();
    let doc = synthetic_document(200);

    // Exact hit deep in the document: the scan short-circuits on the
    // perfect window.
    let exact_patch = indoc! {"
        @@ ... @@
         .rule-150 {
        -    margin: 3px;
        +    margin: 30px;
             padding: 0px;
         }
    "};
    group.bench_function("exact_match_1000_lines", |b| {
        b.iter(|| apply_patch(black_box(&doc), black_box(exact_patch), &options))
    });

    // Content drift on one anchor line: no perfect window anywhere, so the
    // full scoring scan runs before the best candidate is accepted.
    let fuzzy_patch = indoc! {"
        @@ ... @@
         .rule-150 {
        -    margin: 99px;
        +    margin: 30px;
             padding: 0px;
         }
    "};
    group.bench_function("fuzzy_match_1000_lines", |b| {
        b.iter(|| apply_patch(black_box(&doc), black_box(fuzzy_patch), &options))
    });

    // Worst case: an anchor that exists nowhere forces a full scan that
    // ends in a diagnostic.
    let miss_patch = indoc! {"
        @@ ... @@
         .no-such-rule {
        -    margin: 1px;
        +    margin: 2px;
         }
    "};
    group.bench_function("unresolved_hunk_1000_lines", |b| {
        b.iter(|| apply_patch(black_box(&doc), black_box(miss_patch), &options))
    });

    group.finish();
}

criterion_group!(benches, parsing_benches, applying_benches);
criterion_main!(benches);
