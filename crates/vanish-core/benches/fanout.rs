//! Broker send path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;
use vanish_core::{Broker, BrokerConfig, Handle};
use vanish_protocol::{CreateRoomRequest, JoinRoomRequest, SendMessageRequest};

fn room(broker: &Broker, code: &str) {
    broker
        .create_room(CreateRoomRequest {
            room_code: Some(code.into()),
            creator_id: Some("1".into()),
        })
        .unwrap();
    broker
        .join_room(JoinRoomRequest {
            room_code: Some(code.into()),
            user_id: Some("2".into()),
            ..Default::default()
        })
        .unwrap();
}

fn message(code: &str, id: u64) -> SendMessageRequest {
    SendMessageRequest {
        id: Some(id.into()),
        text: Some("hello there".into()),
        sender_id: Some("1".into()),
        room_code: Some(code.into()),
        timestamp: Some(1_700_000_000_000),
    }
}

fn bench_send(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let mut group = c.benchmark_group("send_message");

    group.bench_function("no_connections", |b| {
        let broker = Broker::new(BrokerConfig::default());
        room(&broker, "BENCH-1");
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            broker.send_message(black_box(message("BENCH-1", id)))
        });
    });

    group.bench_function("connected_peer", |b| {
        b.iter_custom(|iters| {
            let broker = Broker::new(BrokerConfig::default());
            room(&broker, "BENCH-2");
            let (handle, mut rx) = Handle::channel(64);
            broker.attach("BENCH-2", &"2".into(), None, &handle).unwrap();
            let _ = rx.try_recv();

            let start = Instant::now();
            for id in 0..iters {
                broker.send_message(message("BENCH-2", id)).unwrap();
                let _ = rx.try_recv();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_poll(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let broker = Broker::new(BrokerConfig::default());
    room(&broker, "BENCH-3");
    for id in 0..50u64 {
        broker.send_message(message("BENCH-3", id)).unwrap();
    }

    c.bench_function("poll_50_messages", |b| {
        b.iter(|| {
            broker.poll(
                black_box("BENCH-3"),
                vanish_protocol::PollQuery {
                    user_id: Some("2".into()),
                },
            )
        })
    });
}

criterion_group!(benches, bench_send, bench_poll);
criterion_main!(benches);
