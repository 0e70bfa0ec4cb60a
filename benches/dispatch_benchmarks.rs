//! Benchmarks for command registration and dispatch.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use conduit_core::{execute_command, CommandEntry, CommandRegistry, ExecuteCommandParams};
use serde_json::{json, Value};

/// Builds a registry holding `count` echo commands.
fn populated_registry(count: usize) -> (CommandRegistry, Vec<conduit_core::CommandRegistration>) {
    let registry = CommandRegistry::new();
    let handles = (0..count)
        .map(|i| {
            registry
                .register_command(CommandEntry::new(format!("bench.command{i}"), |args| async move {
                    Ok(Value::Array(args))
                }))
                .expect("ids are unique")
        })
        .collect();
    (registry, handles)
}

/// Benchmarks dispatch against snapshots of various sizes.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for size in [10, 100, 1000].iter() {
        let (registry, _handles) = populated_registry(*size);
        let snapshot = registry.commands_snapshot();
        let last = format!("bench.command{}", size - 1);

        group.bench_with_input(BenchmarkId::new("last_entry", size), &last, |b, id| {
            b.iter(|| {
                let params = ExecuteCommandParams::new(id.as_str()).with_arguments(vec![json!(1)]);
                let result = futures::executor::block_on(execute_command(&snapshot, params));
                black_box(result)
            })
        });
    }

    group.finish();
}

/// Benchmarks copy-on-write registration.
fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("register_into", size), size, |b, &size| {
            b.iter_with_setup(
                || populated_registry(size),
                |(registry, handles)| {
                    let handle = registry
                        .register_command(CommandEntry::new("bench.extra", |_| async {
                            Ok(Value::Null)
                        }))
                        .expect("id is unique");
                    black_box((registry, handles, handle))
                },
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_registration);
criterion_main!(benches);
