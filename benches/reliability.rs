// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hot-path benchmarks for the submessage codec and the writer/reader
//! reliability state machines.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box as bb;

use rtps_reliable::core::reader::{BestEffortReaderRegistry, ReaderProxyRegistry};
use rtps_reliable::core::writer::MatchedReadersRegistry;
use rtps_reliable::engine::{ActiveProxyQueue, Dispatcher};
use rtps_reliable::protocol::constants::{
    RTPS_RELIABLE_VENDOR_ID, RTPS_HEADER_SIZE, RTPS_MAGIC, RTPS_SUBMSG_ACKNACK, RTPS_SUBMSG_DATA,
    RTPS_SUBMSG_HEARTBEAT, RTPS_VERSION_MAJOR, RTPS_VERSION_MINOR,
};
use rtps_reliable::protocol::submessage::decode_submessages;
use std::sync::Arc;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
}

fn datagram_header(prefix: [u8; 12]) -> Vec<u8> {
    let mut buf = vec![0u8; RTPS_HEADER_SIZE];
    buf[0..4].copy_from_slice(RTPS_MAGIC.as_slice());
    buf[4] = RTPS_VERSION_MAJOR;
    buf[5] = RTPS_VERSION_MINOR;
    buf[6..8].copy_from_slice(&RTPS_RELIABLE_VENDOR_ID);
    buf[8..20].copy_from_slice(&prefix);
    buf
}

fn push_submsg(datagram: &mut Vec<u8>, id: u8, flags: u8, body: &[u8]) {
    datagram.push(id);
    datagram.push(flags);
    datagram.extend_from_slice(&(body.len() as u16).to_le_bytes());
    datagram.extend_from_slice(body);
}

fn heartbeat_datagram(prefix: [u8; 12], reader_id: [u8; 4], writer_id: [u8; 4], last: u64, count: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&reader_id);
    body.extend_from_slice(&writer_id);
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes());
    body.extend_from_slice(&((last >> 32) as i32).to_le_bytes());
    body.extend_from_slice(&(last as u32).to_le_bytes());
    body.extend_from_slice(&count.to_le_bytes());

    let mut datagram = datagram_header(prefix);
    push_submsg(&mut datagram, RTPS_SUBMSG_HEARTBEAT, 0x01, &body);
    datagram
}

fn acknack_datagram(prefix: [u8; 12], reader_id: [u8; 4], writer_id: [u8; 4], base: i64, count: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&reader_id);
    body.extend_from_slice(&writer_id);
    body.extend_from_slice(&base.to_le_bytes());
    body.extend_from_slice(&32u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&count.to_le_bytes());

    let mut datagram = datagram_header(prefix);
    push_submsg(&mut datagram, RTPS_SUBMSG_ACKNACK, 0x01, &body);
    datagram
}

fn bench_decode_submessages(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_submessages");

    let hb = heartbeat_datagram([1u8; 12], [0, 0, 1, 0x03], [0, 0, 1, 0x02], 1000, 1);
    group.bench_function("heartbeat", |b| {
        b.iter(|| bb(decode_submessages(bb(&hb))));
    });

    let ack = acknack_datagram([2u8; 12], [0, 0, 1, 0x03], [0, 0, 1, 0x02], 512, 1);
    group.bench_function("acknack", |b| {
        b.iter(|| bb(decode_submessages(bb(&ack))));
    });

    group.finish();
}

fn bench_dispatcher_heartbeat(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_on_datagram");

    for reader_count in [1usize, 8, 64] {
        group.bench_with_input(
            BenchmarkId::new("heartbeat_fanout", reader_count),
            &reader_count,
            |b, &reader_count| {
                let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
                for i in 0..reader_count {
                    let registry = Arc::new(ReaderProxyRegistry::new());
                    dispatcher.register_reader([0, 0, i as u8, 0x03], registry);
                }
                let datagram =
                    heartbeat_datagram([3u8; 12], [0, 0, 0, 0x03], [0, 0, 1, 0x02], 1000, 1);

                let mut count = 0u32;
                b.iter(|| {
                    count += 1;
                    // Vary count so the dedup path never short-circuits the benchmark.
                    let mut d = datagram.clone();
                    let count_off = d.len() - 4;
                    d[count_off..].copy_from_slice(&count.to_le_bytes());
                    bb(dispatcher.on_datagram(bb(&d)));
                });
            },
        );
    }

    group.finish();
}

fn data_datagram(prefix: [u8; 12], reader_id: [u8; 4], writer_id: [u8; 4], seq: u64) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&16u16.to_le_bytes());
    body.extend_from_slice(&reader_id);
    body.extend_from_slice(&writer_id);
    body.extend_from_slice(&((seq >> 32) as i32).to_le_bytes());
    body.extend_from_slice(&(seq as u32).to_le_bytes());

    let mut datagram = datagram_header(prefix);
    push_submsg(&mut datagram, RTPS_SUBMSG_DATA, 0x01, &body);
    datagram
}

fn bench_best_effort_reader_data(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_effort_reader_on_data");

    let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
    let registry = Arc::new(BestEffortReaderRegistry::new());
    dispatcher.register_best_effort_reader([0, 0, 1, 0x03], registry);

    let mut seq = 0u64;
    group.bench_function("in_order_no_loss", |b| {
        b.iter(|| {
            seq += 1;
            let datagram = data_datagram([4u8; 12], [0, 0, 1, 0x03], [0, 0, 1, 0x02], seq);
            bb(dispatcher.on_datagram(bb(&datagram)));
        });
    });

    group.finish();
}

fn bench_writer_acknack(c: &mut Criterion) {
    let mut group = c.benchmark_group("matched_readers_on_acknack");

    let registry = MatchedReadersRegistry::new();
    let reader_guid = [9u8; 16];
    registry.add_reader(reader_guid, addr(7400), Duration::from_secs(30));
    for seq in 1..=256u64 {
        registry.new_change(seq);
        registry.mark_sent(&reader_guid, seq);
    }

    let sn_state = rtps_reliable::reliability::SequenceNumberSet::empty(200);
    group.bench_function("256_unacked_changes", |b| {
        b.iter(|| bb(registry.on_acknack(bb(&reader_guid), bb(&sn_state))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_submessages,
    bench_dispatcher_heartbeat,
    bench_best_effort_reader_data,
    bench_writer_acknack
);
criterion_main!(benches);
