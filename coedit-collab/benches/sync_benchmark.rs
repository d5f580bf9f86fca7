use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use uuid::Uuid;

use coedit_collab::protocol::OperationAck;
use coedit_collab::storage::{MemoryStore, SequenceStore};
use coedit_collab::{CoordinatorConfig, VersionCoordinator};
use coedit_core::{epoch_seconds, Operation, OperationInput, OperationKind};

fn sample_ops(count: usize) -> Vec<Operation> {
    let document_id = Uuid::new_v4();
    (0..count)
        .map(|i| Operation {
            id: Uuid::new_v4(),
            document_id,
            kind: OperationKind::Insert,
            counter: (i + 1) as u64,
            site: 1,
            left_anchor: None,
            right_anchor: None,
            value: "x".to_string(),
            color: None,
            version: (i + 1) as u64,
            author_id: Uuid::nil(),
            created_at: epoch_seconds(),
        })
        .collect()
}

fn bench_ack_encode(c: &mut Criterion) {
    let ack = OperationAck {
        applied_version: 16,
        operations: sample_ops(16),
    };

    c.bench_function("ack_encode_16_ops", |b| {
        b.iter(|| {
            black_box(black_box(&ack).encode().unwrap());
        })
    });
}

fn bench_ack_decode(c: &mut Criterion) {
    let ack = OperationAck {
        applied_version: 16,
        operations: sample_ops(16),
    };
    let encoded = ack.encode().unwrap();

    c.bench_function("ack_decode_16_ops", |b| {
        b.iter(|| {
            black_box(OperationAck::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_append_single_char_batches(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("append_100_single_char_batches", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coord = VersionCoordinator::new(
                    Arc::new(MemoryStore::new()),
                    CoordinatorConfig::default(),
                );
                let doc = Uuid::new_v4();
                let author = Uuid::new_v4();
                coord.create_document(doc).await.unwrap();

                let mut base = 0;
                let mut left = None;
                for i in 0..100u64 {
                    let input = OperationInput {
                        kind: OperationKind::Insert,
                        counter: i + 1,
                        site: 1,
                        left_anchor: left,
                        right_anchor: None,
                        value: "x".to_string(),
                        color: None,
                    };
                    let ack = coord
                        .append_operations(doc, author, base, vec![input])
                        .await
                        .unwrap();
                    base = ack.applied_version;
                    left = Some(ack.operations[0].id);
                }
                black_box(base);
            })
        })
    });
}

fn bench_hydration_1k_ops(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    // One warm document with a 1k-operation log, replayed per iteration.
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    rt.block_on(async {
        let coord = VersionCoordinator::new(store.clone(), CoordinatorConfig::default());
        let author = Uuid::new_v4();
        coord.create_document(doc).await.unwrap();

        let mut base = 0;
        let mut left = None;
        for i in 0..1_000u64 {
            let input = OperationInput {
                kind: OperationKind::Insert,
                counter: i + 1,
                site: 1,
                left_anchor: left,
                right_anchor: None,
                value: "x".to_string(),
                color: None,
            };
            let ack = coord
                .append_operations(doc, author, base, vec![input])
                .await
                .unwrap();
            base = ack.applied_version;
            left = Some(ack.operations[0].id);
        }
    });

    let record = store.read_document(doc).unwrap();
    c.bench_function("hydrate_document_1k_ops", |b| {
        b.iter(|| {
            let engine =
                coedit_collab::cache::hydrate_engine(store.as_ref(), black_box(&record))
                    .unwrap();
            black_box(engine.live_len());
        })
    });
}

criterion_group!(
    benches,
    bench_ack_encode,
    bench_ack_decode,
    bench_append_single_char_batches,
    bench_hydration_1k_ops
);
criterion_main!(benches);
