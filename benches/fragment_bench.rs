//! Benchmarks for the fragmentation hot path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lorad::crypto::NodeIdentity;
use lorad::mesh::fragment::{Fragment, Fragmenter, FragmenterConfig, FragmentProgress};
use lorad::network_type::NetworkType;
use lorad::types::PayloadKind;
use std::sync::Arc;

fn bench_split(c: &mut Criterion) {
    let identity = Arc::new(NodeIdentity::generate(NetworkType::Testnet));
    let payload = vec![0xA7u8; 2_048];

    c.bench_function("fragment_2k_payload", |b| {
        let mut fragmenter = Fragmenter::new(identity.clone(), FragmenterConfig::default());
        b.iter(|| {
            fragmenter
                .fragment(PayloadKind::UtxoTransaction, black_box(&payload))
                .unwrap()
        })
    });
}

fn bench_reassemble(c: &mut Criterion) {
    let identity = Arc::new(NodeIdentity::generate(NetworkType::Testnet));
    let mut sender = Fragmenter::new(identity, FragmenterConfig::default());
    let payload = vec![0xA7u8; 2_048];
    let fragments = sender
        .fragment(PayloadKind::UtxoTransaction, &payload)
        .unwrap();

    c.bench_function("reassemble_2k_payload", |b| {
        b.iter(|| {
            let mut receiver = Fragmenter::new(
                Arc::new(NodeIdentity::generate(NetworkType::Testnet)),
                FragmenterConfig::default(),
            );
            let mut out = None;
            for fragment in fragments.clone() {
                if let FragmentProgress::Complete { payload } =
                    receiver.accept(black_box(fragment)).unwrap()
                {
                    out = Some(payload);
                }
            }
            out.unwrap()
        })
    });
}

fn bench_wire_codec(c: &mut Criterion) {
    let identity = Arc::new(NodeIdentity::generate(NetworkType::Testnet));
    let mut sender = Fragmenter::new(identity, FragmenterConfig::default());
    let fragments = sender
        .fragment(PayloadKind::Block, &vec![0x1Fu8; 197])
        .unwrap();
    let wire = fragments[0].to_wire();

    c.bench_function("fragment_wire_decode", |b| {
        b.iter(|| Fragment::from_wire(black_box(&wire)).unwrap())
    });
}

criterion_group!(benches, bench_split, bench_reassemble, bench_wire_codec);
criterion_main!(benches);
