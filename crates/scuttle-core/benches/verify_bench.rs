//! Benchmarks for Scuttle feed replication hot paths
//!
//! Run with: cargo bench -p scuttle-core
//!
//! Baselines for:
//! - Signing and verifying messages
//! - Building the social graph
//! - Encoding EBT notes

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use scuttle_core::feed::UnsignedMessage;
use scuttle_core::replication::{Note, Notes};
use scuttle_core::{
    Hops, MessageHmac, PrivateIdentity, RawMessageIdentifier, Scuttlebutt, Sequence,
    SocialGraphBuilder, Storage,
};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Message Benchmarks
// ============================================================================

fn bench_sign(c: &mut Criterion) {
    let author = PrivateIdentity::from_seed(&[1; 32]);
    let format = Scuttlebutt::new(MessageHmac::default());
    let unsigned = UnsignedMessage::new(
        None,
        Sequence::first(),
        Utc::now(),
        json!({"type": "post", "text": "benchmark"}),
    )
    .unwrap();

    c.bench_function("sign_message", |b| {
        b.iter(|| black_box(format.sign(&unsigned, &author).unwrap()))
    });
}

fn bench_verify(c: &mut Criterion) {
    let author = PrivateIdentity::from_seed(&[1; 32]);
    let mut group = c.benchmark_group("verify_raw_message");

    for size in [16usize, 1024, 8192] {
        let format = Scuttlebutt::new(MessageHmac::default());
        let unsigned = UnsignedMessage::new(
            None,
            Sequence::first(),
            Utc::now(),
            json!({"type": "post", "text": "x".repeat(size)}),
        )
        .unwrap();
        let raw = format.sign(&unsigned, &author).unwrap().raw().to_raw();
        let identifier = RawMessageIdentifier::scuttlebutt(MessageHmac::default());

        group.throughput(Throughput::Bytes(raw.as_bytes().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| black_box(identifier.verify_raw_message(raw).unwrap()))
        });
    }

    // HMAC networks pay for one extra hash
    let hmac = MessageHmac::new(&[7; 32]).unwrap();
    let format = Scuttlebutt::new(hmac);
    let unsigned =
        UnsignedMessage::new(None, Sequence::first(), Utc::now(), json!({"type": "post"})).unwrap();
    let raw = format.sign(&unsigned, &author).unwrap().raw().to_raw();
    let identifier = RawMessageIdentifier::scuttlebutt(hmac);
    group.bench_function("with_hmac", |b| {
        b.iter(|| black_box(identifier.verify_raw_message(&raw).unwrap()))
    });

    group.finish();
}

// ============================================================================
// Social Graph Benchmarks
// ============================================================================

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for fan_out in [5usize, 20] {
        let storage = Arc::new(
            Storage::in_memory(RawMessageIdentifier::scuttlebutt(MessageHmac::default())).unwrap(),
        );
        let local = PrivateIdentity::from_seed(&[0; 32]).identity();

        // three levels, each node following `fan_out` new identities
        let mut level = vec![local];
        let mut seed = 1u32;
        for _ in 0..3 {
            let mut next = Vec::new();
            for who in &level {
                for _ in 0..fan_out {
                    let mut bytes = [0u8; 32];
                    bytes[..4].copy_from_slice(&seed.to_le_bytes());
                    seed += 1;
                    let target = PrivateIdentity::from_seed(&bytes).identity();
                    storage.follow(who, &target).unwrap();
                    next.push(target);
                }
            }
            level = next;
        }

        let builder =
            SocialGraphBuilder::new(storage.clone(), storage.clone(), Hops::from(3), local);
        group.bench_with_input(BenchmarkId::from_parameter(fan_out), &builder, |b, builder| {
            b.iter(|| black_box(builder.build().unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Note Benchmarks
// ============================================================================

fn bench_notes_json(c: &mut Criterion) {
    let notes: Notes = (0..1000u32)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[..4].copy_from_slice(&i.to_le_bytes());
            let feed = PrivateIdentity::from_seed(&bytes).identity().main_feed();
            (feed, Note::wanting(Sequence::new(u64::from(i) + 1).ok()))
        })
        .collect();
    let encoded = notes.to_json().unwrap();

    c.bench_function("notes_to_json_1000", |b| {
        b.iter(|| black_box(notes.to_json().unwrap()))
    });
    c.bench_function("notes_from_json_1000", |b| {
        b.iter(|| black_box(Notes::from_json(&encoded).unwrap()))
    });
}

criterion_group!(benches, bench_sign, bench_verify, bench_graph_build, bench_notes_json);
criterion_main!(benches);
