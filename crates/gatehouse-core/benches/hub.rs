//! Hub fan-out benchmarks for gatehouse-core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gatehouse_core::{Admission, Hub, HubConfig, HubHandle, Registration};
use gatehouse_protocol::Envelope;
use gatehouse_transport::ConnectionId;
use tokio::runtime::Runtime;

/// Room "bench" with an owner and `members` approved members, all drained.
async fn populated_room(members: usize) -> (HubHandle, ConnectionId) {
    let (hub, _task) = Hub::spawn(HubConfig::default());

    let owner = Registration::owner("bench", "owner");
    let owner_id = owner.connection_id.clone();
    let (admission, mut rx) = Admission::channel(owner, 1024);
    hub.register(admission).await.unwrap();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    for i in 0..members {
        let username = format!("member-{i:05}");
        let (admission, mut rx) =
            Admission::channel(Registration::joiner("bench", username.clone()), 1024);
        hub.register(admission).await.unwrap();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        hub.broadcast(owner_id.clone(), Envelope::approve("bench", username))
            .await
            .unwrap();
    }

    (hub, owner_id)
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out");

    for members in [1usize, 16, 128] {
        let (hub, owner_id) = rt.block_on(populated_room(members));
        let envelope = Envelope::join_pending("bench", "owner");

        group.throughput(Throughput::Elements(members as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    hub.broadcast(owner_id.clone(), black_box(envelope.clone()))
                        .await
                        .unwrap();
                    // Round trip so the broadcast is fully processed
                    hub.stats().await.unwrap()
                })
            })
        });
    }

    group.finish();
}

fn bench_room_exists(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (hub, _owner_id) = rt.block_on(populated_room(0));

    c.bench_function("room_exists", |b| {
        b.iter(|| rt.block_on(hub.room_exists(black_box("bench"))).unwrap())
    });
}

criterion_group!(benches, bench_fan_out, bench_room_exists);
criterion_main!(benches);
