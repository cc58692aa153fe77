//! Throughput of the gossip/bulk-sync hot path: how fast local writes can
//! be minted and packed into outbound frames. Modeled on the teacher pack's
//! `criterion` + dedicated `tokio::runtime::Runtime` benchmark shape
//! (`benches/put.rs` in the `maidsafe-temp_safe_network` example), adapted
//! from a real network round trip to an in-process measurement since this
//! workspace's gossip path has no "already running network" to bench
//! against.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use networkdb_keyring::{GossipKey, KeyRing};
use networkdb_membership::MembershipTable;
use networkdb_protocol::NodeId;
use networkdb_replication::{ReplicationConfig, ReplicationEngine};
use networkdb_store::Store;
use networkdb_transport::GossipTransport;
use tokio::runtime::Runtime;

fn build_engine(runtime: &Runtime) -> ReplicationEngine {
    runtime.block_on(async {
        let transport = GossipTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(KeyRing::with_primary(GossipKey::new([9u8; 32], 1))),
            4,
        )
        .await
        .unwrap();
        ReplicationEngine::new(
            NodeId::random(),
            "bench-node".to_string(),
            Arc::new(Store::new()),
            Arc::new(MembershipTable::new()),
            Arc::new(transport),
            ReplicationConfig::default(),
        )
    })
}

fn bench_create_entry(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let engine = build_engine(&runtime);

    c.bench_function("create_entry 64B value", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            i += 1;
            engine.create_entry("t".into(), "n".into(), format!("k{i}").into(), vec![0u8; 64]);
        });
    });
}

fn bench_gossip_tick(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let engine = Arc::new(build_engine(&runtime));
    engine.join_network("n".into());
    for i in 0..200 {
        engine.create_entry("t".into(), "n".into(), format!("k{i}").into(), vec![0u8; 64]);
    }

    c.bench_function("gossip_tick over 200 queued entries", |b| {
        b.to_async(&runtime).iter_batched(
            || Arc::clone(&engine),
            |engine| async move { engine.gossip_tick().await },
            BatchSize::SmallInput,
        );
    });
}

fn bench_build_bulk_sync(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let engine = build_engine(&runtime);
    for i in 0..500 {
        engine.create_entry("t".into(), "n".into(), format!("k{i}").into(), vec![0u8; 64]);
    }

    c.bench_function("build_bulk_sync over 500 entries", |b| {
        b.iter(|| engine.build_bulk_sync(vec!["n".into()], false));
    });
}

criterion_group!(benches, bench_create_entry, bench_gossip_tick, bench_build_bulk_sync);
criterion_main!(benches);
