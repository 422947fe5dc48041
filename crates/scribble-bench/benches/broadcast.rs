//! Room fan-out benchmarks.
//!
//! Each sample gets a freshly seated room so connection queues never fill
//! up and turn sends into drops.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use scribble_bench::SeatedRoom;
use scribble_core::{Envelope, EventType};

fn stroke_event() -> Envelope {
    let points: Vec<[u32; 2]> = (0..32).map(|i| [i, i * 2]).collect();
    Envelope::new(
        EventType::CanvasUpdate,
        serde_json::json!({"data": {"type": "draw", "points": points, "color": "#222222", "width": 3}}),
    )
}

fn bench_registry_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_fanout");
    let payload = Bytes::from(vec![b'x'; 512]);

    for players in [2usize, 8, 12] {
        group.throughput(Throughput::Elements(players as u64));
        group.bench_with_input(BenchmarkId::new("broadcast", players), &players, |b, &n| {
            b.iter_batched(
                || SeatedRoom::new(n, 4),
                |seats| {
                    let delivered = seats.registry.broadcast(seats.room, black_box(payload.clone()));
                    (seats, delivered)
                },
                BatchSize::SmallInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("broadcast_except", players), &players, |b, &n| {
            b.iter_batched(
                || SeatedRoom::new(n, 4),
                |seats| {
                    let drawer = seats.users[0];
                    let delivered = seats
                        .registry
                        .broadcast_except(seats.room, drawer, black_box(payload.clone()));
                    (seats, delivered)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_outbox_encode_and_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox");
    let event = stroke_event();

    for players in [2usize, 8] {
        group.throughput(Throughput::Elements(players as u64));
        group.bench_with_input(BenchmarkId::new("stroke", players), &players, |b, &n| {
            b.iter_batched(
                || SeatedRoom::new(n, 4),
                |seats| {
                    let delivered = seats.outbox.broadcast(seats.room, black_box(&event));
                    (seats, delivered)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_registry_fanout, bench_outbox_encode_and_fanout);
criterion_main!(benches);
