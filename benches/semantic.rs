//! Semantic Layer and Prompt Benchmarks
//!
//! Covers the per-question work done after introspection: wrapping the raw
//! schema, naming-convention relationship inference, and prompt assembly.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use maetrik::driver::{SchemaColumn, SchemaDefinition, SchemaTable};
use maetrik::query::prompts::{build_schema_context, build_translation_prompt};
use maetrik::semantic::SemanticLayer;

/// `tables` tables where every table after the first references its predecessor
fn generated_schema(tables: usize) -> SchemaDefinition {
    let tables = (0..tables)
        .map(|i| {
            let mut columns = vec![
                SchemaColumn::new("id", "INTEGER", false, true),
                SchemaColumn::new("name", "TEXT", false, false),
                SchemaColumn::new("amount", "REAL", true, false),
            ];
            if i > 0 {
                columns.push(SchemaColumn::new(format!("table_{}_id", i - 1), "INTEGER", true, false));
            }
            SchemaTable { name: format!("table_{i}"), schema: None, description: None, columns }
        })
        .collect();
    SchemaDefinition { tables }
}

fn bench_infer_relationships(c: &mut Criterion) {
    let mut group = c.benchmark_group("infer_relationships");
    for size in [10, 50, 200] {
        let schema = generated_schema(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &schema, |b, schema| {
            b.iter(|| {
                let mut layer = SemanticLayer::new(black_box(schema));
                layer.infer_relationships()
            });
        });
    }
    group.finish();
}

fn bench_to_schema_definition(c: &mut Criterion) {
    let mut layer = SemanticLayer::new(&generated_schema(50));
    layer.infer_relationships();

    c.bench_function("to_schema_definition_50_tables", |b| {
        b.iter(|| black_box(&layer).to_schema_definition());
    });
}

fn bench_prompt(c: &mut Criterion) {
    let schema = generated_schema(50);

    c.bench_function("build_translation_prompt_50_tables", |b| {
        b.iter(|| {
            let context = build_schema_context(black_box(&schema));
            build_translation_prompt("What is the total amount per name?", &context, "sqlite", 1000)
        });
    });
}

criterion_group!(benches, bench_infer_relationships, bench_to_schema_definition, bench_prompt);
criterion_main!(benches);
