//! Occupancy fold benchmarks for murmur-core.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use murmur_core::{apply_event, online_view, OccupancyMap};
use murmur_protocol::{HereNow, PresenceEvent};

fn populated(channels: usize, members: usize) -> OccupancyMap {
    let snapshot = (0..channels).fold(HereNow::new(), |snapshot, c| {
        let ids = (0..members).map(|m| format!("user-{c}-{m}")).collect();
        snapshot.with_channel(format!("room-{c}"), ids)
    });
    OccupancyMap::from_here_now(&snapshot)
}

fn bench_join_leave(c: &mut Criterion) {
    let map = populated(16, 64);
    let join = PresenceEvent::join("room-3", "newcomer", 65);
    let leave = PresenceEvent::leave("room-3", "user-3-10", 63);

    let mut group = c.benchmark_group("apply_event");
    group.throughput(Throughput::Elements(1));
    group.bench_function("join_16x64", |b| {
        b.iter(|| apply_event(black_box(&map), black_box(&join)))
    });
    group.bench_function("leave_16x64", |b| {
        b.iter(|| apply_event(black_box(&map), black_box(&leave)))
    });
    group.finish();
}

fn bench_interval(c: &mut Criterion) {
    let map = populated(4, 256);
    let join = (0..32).map(|i| format!("joiner-{i}")).collect();
    let leave = (0..32).map(|i| format!("user-1-{i}")).collect();
    let event = PresenceEvent::interval("room-1", join, leave, vec![], 256);

    c.bench_function("interval_32_in_32_out", |b| {
        b.iter(|| apply_event(black_box(&map), black_box(&event)))
    });
}

fn bench_online_view(c: &mut Criterion) {
    let map = populated(16, 64);

    c.bench_function("online_view_16x64", |b| {
        b.iter(|| online_view(black_box(&map), "me"))
    });
}

criterion_group!(benches, bench_join_leave, bench_interval, bench_online_view);
criterion_main!(benches);
