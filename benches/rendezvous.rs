use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rendezvous::protocol::datagram::{TopicKey, open, seal};
use rendezvous::{Deduplicator, Envelope, EnvelopeKind, Topic};
use std::hint::black_box;

const SENDER_ID: u64 = 0x1234567890abcdef;

fn topic_key() -> TopicKey {
    TopicKey::derive(&Topic::from_context("https://call.example/#bench-room").unwrap())
}

// LAN datagram sealing (encryption + checksum)
fn bench_datagram_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram_seal");
    let key = topic_key();

    for size in [64, 512, 2048, 8192].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let payload = vec![b'x'; size];

            b.iter(|| {
                let sealed = seal(black_box(&key), black_box(SENDER_ID), black_box(&payload)).unwrap();
                black_box(sealed);
            });
        });
    }
    group.finish();
}

// LAN datagram opening (decryption + checksum verification)
fn bench_datagram_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram_open");
    let key = topic_key();

    for size in [64, 512, 2048, 8192].iter() {
        let sealed = seal(&key, SENDER_ID, &vec![b'x'; *size]).unwrap();

        group.throughput(Throughput::Bytes(sealed.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &sealed, |b, sealed| {
            b.iter(|| {
                let datagram = open(black_box(&key), black_box(sealed)).unwrap();
                black_box(datagram);
            });
        });
    }
    group.finish();
}

// Envelope framing of a typical SDP-sized payload
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for size in [256, 4096].iter() {
        let payload = Bytes::from(vec![b'v'; *size]);
        let encoded = Envelope::new(EnvelopeKind::Signal, SENDER_ID, 1, payload.clone()).encode();

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            b.iter(|| {
                let envelope = Envelope::new(EnvelopeKind::Signal, SENDER_ID, 1, payload.clone());
                black_box(envelope.encode());
            });
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| {
                let envelope = Envelope::decode(black_box(encoded)).unwrap();
                black_box(envelope);
            });
        });
    }
    group.finish();
}

// Duplicate filtering across interleaved senders
fn bench_dedup(c: &mut Criterion) {
    let envelopes: Vec<Envelope> = (0..1024u64)
        .map(|i| Envelope::new(EnvelopeKind::Signal, i % 4, i / 4, Bytes::new()))
        .collect();

    c.bench_function("dedup_accept_1024", |b| {
        b.iter(|| {
            let mut dedup = Deduplicator::new(SENDER_ID);
            let accepted = envelopes.iter().filter(|e| dedup.accept(e)).count();
            black_box(accepted);
        });
    });
}

criterion_group!(
    benches,
    bench_datagram_seal,
    bench_datagram_open,
    bench_envelope,
    bench_dedup
);

criterion_main!(benches);
