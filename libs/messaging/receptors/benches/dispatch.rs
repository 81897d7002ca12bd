//! Benchmarks for carrier dispatch
//!
//! Measures the cost of resolving and delivering carriers for growing
//! receiver counts, decomposition of composite payloads, and draining a
//! backed-up queue.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use receptor_config::ReceptorConfig;
use receptors::{FnReceptor, ReceptorId, Router};
use semantic_types::{FieldKind, Payload, ProtocolDef, SchemaRegistry, TypeRegistry};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn registry() -> Arc<dyn TypeRegistry> {
    let registry = SchemaRegistry::new();
    registry
        .declare_all([
            ProtocolDef::new("Tick").field("seq", FieldKind::Integer),
            ProtocolDef::new("Url").field("value", FieldKind::String),
            ProtocolDef::new("Title").field("value", FieldKind::String),
            ProtocolDef::new("FeedItem")
                .field("published", FieldKind::String)
                .element("Url")
                .element("Title"),
        ])
        .expect("bench schema is valid");
    Arc::new(registry)
}

fn router_with_receivers(protocol: &str, receivers: usize) -> (Router, ReceptorId, Arc<AtomicU64>) {
    let router = Router::new("bench", registry(), ReceptorConfig::default());
    let hits = Arc::new(AtomicU64::new(0));

    let sender = router
        .register_receptor(
            FnReceptor::emitter("Sender")
                .emitting(protocol)
                .emitting("Url")
                .emitting("Title")
                .into_arc(),
        )
        .expect("register sender");
    for i in 0..receivers {
        let hits = Arc::clone(&hits);
        router
            .register_receptor(
                FnReceptor::new(format!("Receiver{}", i), move |_, _| {
                    hits.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
                .receiving(protocol)
                .into_arc(),
            )
            .expect("register receiver");
    }
    router.load_receptors().expect("load receptors");
    (router, sender, hits)
}

fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for receivers in [1, 8, 64] {
        let (router, sender, hits) = router_with_receivers("Tick", receivers);
        group.throughput(Throughput::Elements(receivers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(receivers),
            &receivers,
            |b, _| {
                let mut seq = 0i64;
                b.iter(|| {
                    seq += 1;
                    router
                        .create_carrier(Some(sender), "Tick", Payload::from(json!({ "seq": seq })))
                        .expect("dispatch");
                })
            },
        );
        black_box(hits.load(Ordering::Relaxed));
    }

    group.finish();
}

fn benchmark_decomposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("decomposition");
    let (router, sender, _) = router_with_receivers("Url", 4);

    let mut item = Payload::from(json!({ "published": "2024-01-01" }));
    item.set_element("Url", Payload::from(json!({ "value": "https://example.org" })));
    item.set_element("Title", Payload::from(json!({ "value": "Example" })));

    group.throughput(Throughput::Elements(1));
    group.bench_function("feed_item", |b| {
        b.iter(|| {
            // Sender does not emit FeedItem, so only its elements are routed
            router
                .create_carrier(Some(sender), "FeedItem", black_box(item.clone()))
                .expect("dispatch");
        })
    });

    group.finish();
}

fn benchmark_queue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_drain");

    for depth in [16usize, 256] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_with_setup(
                || {
                    let (router, sender, _) = router_with_receivers("Tick", 0);
                    for seq in 0..depth {
                        router
                            .create_carrier(
                                Some(sender),
                                "Tick",
                                Payload::from(json!({ "seq": seq })),
                            )
                            .expect("queue");
                    }
                    router
                        .register_receptor(
                            FnReceptor::new("Late", |_, _| Ok(()))
                                .receiving("Tick")
                                .into_arc(),
                        )
                        .expect("register late receiver");
                    router
                },
                |router| {
                    router.load_receptors().expect("drain");
                    black_box(router.stats().deliveries);
                },
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fan_out,
    benchmark_decomposition,
    benchmark_queue_drain
);
criterion_main!(benches);
