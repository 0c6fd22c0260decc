//! Read-Only Validator Performance Benchmarks
//!
//! The validator runs on every generated statement, so it should stay cheap
//! for both short lookups and long analytical queries.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use maetrik::safety::is_select_only;

const SAMPLES: [(&str, &str); 5] = [
    ("simple_select", "SELECT id, name FROM users WHERE id = 1"),
    (
        "cte_join",
        "WITH recent AS (SELECT user_id, SUM(total) AS spent FROM orders WHERE created_at > '2024-01-01' GROUP BY user_id)
         SELECT u.name, r.spent FROM users u JOIN recent r ON r.user_id = u.id ORDER BY r.spent DESC LIMIT 100",
    ),
    ("commented", "-- top customers\n/* generated */ SELECT name FROM users LIMIT 10"),
    ("rejected_prefix", "DELETE FROM users WHERE id = 1"),
    ("rejected_keyword", "SELECT * FROM users; DROP TABLE users"),
];

fn bench_is_select_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_select_only");
    for (name, sql) in SAMPLES {
        group.bench_with_input(BenchmarkId::from_parameter(name), sql, |b, sql| {
            b.iter(|| is_select_only(black_box(sql)));
        });
    }
    group.finish();
}

fn bench_long_query(c: &mut Criterion) {
    let columns = (0..200).map(|i| format!("col_{i}")).collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT {columns} FROM wide_table WHERE col_0 IS NOT NULL LIMIT 1000");

    c.bench_function("is_select_only_200_columns", |b| {
        b.iter(|| is_select_only(black_box(&sql)));
    });
}

criterion_group!(benches, bench_is_select_only, bench_long_query);
criterion_main!(benches);
