// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound datagram dispatcher: locates the destination endpoint(s) for a
//! raw RTPS datagram and runs the matching state-machine hook.
//!
//! `Dispatcher::on_datagram` is a plain function over a byte slice -- it
//! owns no thread and no socket. The host's receive loop decodes a
//! datagram off the wire and calls this once per datagram; the dispatcher
//! walks the submessages, maintains the per-datagram receiver context
//! (`INFO_TS`/`INFO_SRC`/`INFO_DST`), and routes payload-carrying
//! submessages to the registered writer/reader proxy registries by
//! {source participant GUID, remote entity id, local entity id}.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::reader::{
    AcknackDecision, BestEffortDataOutcome, BestEffortReaderRegistry, FragAckDecision, ReaderProxyRegistry,
};
use crate::core::writer::{AckNackOutcome, MatchedReadersRegistry};
use crate::error::Error;
use crate::protocol::constants::{
    RTPS_SUBMSG_ACKNACK, RTPS_SUBMSG_GAP, RTPS_SUBMSG_HEARTBEAT, RTPS_SUBMSG_NACK_FRAG,
};
use crate::protocol::submessage::{decode_submessages, RtpsHeader, Submessage};
use crate::reliability::GuidPrefix;

use super::active_queue::{ActiveProxyQueue, ProxyId};

/// RTPS `ENTITYID_UNKNOWN`: a submessage addressed to it fans out to every
/// attached local endpoint of the matching direction.
pub const ENTITYID_UNKNOWN: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// State accumulated while walking one datagram's submessages.
#[derive(Debug, Clone, Default)]
pub struct ReceiverContext {
    pub src_guid_prefix: GuidPrefix,
    pub dst_guid_prefix: Option<GuidPrefix>,
    pub timestamp_nanos: Option<u64>,
}

fn guid(prefix: GuidPrefix, entity_id: [u8; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..12].copy_from_slice(&prefix);
    out[12..].copy_from_slice(&entity_id);
    out
}

/// One unit of work the dispatcher performed while processing a datagram.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    AckNack {
        local_writer_entity_id: [u8; 4],
        remote_reader_guid: [u8; 16],
        outcome: AckNackOutcome,
    },
    Heartbeat {
        local_reader_entity_id: [u8; 4],
        remote_writer_guid: [u8; 16],
        decision: AcknackDecision,
    },
    Data {
        local_reader_entity_id: [u8; 4],
        remote_writer_guid: [u8; 16],
        seq: u64,
    },
    /// A DATA_FRAG fragment arrived but the sample is not yet fully
    /// reassembled.
    FragmentReceived {
        local_reader_entity_id: [u8; 4],
        remote_writer_guid: [u8; 16],
        seq: u64,
    },
    /// Outcome of a HEARTBEAT_FRAG: either the sample's fragments are all
    /// in, or `missing` names the fragment numbers the reader must NACK.
    FragAck {
        local_reader_entity_id: [u8; 4],
        remote_writer_guid: [u8; 16],
        seq: u64,
        decision: FragAckDecision,
    },
    /// A NACK_FRAG named fragments of `seq` the writer must retransmit.
    NackFrag {
        local_writer_entity_id: [u8; 4],
        remote_reader_guid: [u8; 16],
        seq: u64,
        missing_fragments: Vec<u32>,
    },
    /// A best-effort reader (spec Sec.4.6) saw a gap before this DATA;
    /// `skipped` sequence numbers were permanently lost and are forwarded to
    /// DCPS as `sample_lost` rather than repaired.
    SampleLost {
        local_reader_entity_id: [u8; 4],
        remote_writer_guid: [u8; 16],
        seq: u64,
        skipped: u64,
    },
    /// Recorded but not yet wired into fragment/gap accounting -- see
    /// `DESIGN.md` for the scope note on `GAP` handling depth.
    Informational {
        submsg_id: u8,
        remote_guid: [u8; 16],
    },
    Dropped {
        submsg_id: u8,
        error: Error,
    },
    DuplicateIgnored {
        submsg_id: u8,
    },
}

/// Outcome of dispatching one datagram.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub events: Vec<DispatchEvent>,
}

impl DispatchReport {
    pub fn error_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, DispatchEvent::Dropped { .. }))
            .count()
    }
}

#[derive(Debug, Default)]
struct DispatchCounters {
    submsg_too_short: AtomicU64,
    unknown_dest: AtomicU64,
    duplicate_ignored: AtomicU64,
}

/// Registry of local writer/reader endpoints, keyed by local entity id, that
/// routes inbound datagrams to the matching reliability state machine.
pub struct Dispatcher {
    writers: DashMap<[u8; 4], Arc<MatchedReadersRegistry>>,
    readers: DashMap<[u8; 4], Arc<ReaderProxyRegistry>>,
    /// Best-effort readers are registered under a disjoint key space from
    /// `readers`: a local reader entity id is either reliable or
    /// best-effort, never both, per its matched QoS.
    best_effort_readers: DashMap<[u8; 4], Arc<BestEffortReaderRegistry>>,
    active_queue: Arc<ActiveProxyQueue>,
    /// Last-seen `count` per (submessage kind, local entity id, remote GUID),
    /// for the "duplicate submessages MUST be ignored" rule.
    dedup: DashMap<(u8, [u8; 4], [u8; 16]), u32>,
    counters: DispatchCounters,
    last_error: Mutex<Option<Error>>,
}

impl Dispatcher {
    pub fn new(active_queue: Arc<ActiveProxyQueue>) -> Self {
        Self {
            writers: DashMap::new(),
            readers: DashMap::new(),
            best_effort_readers: DashMap::new(),
            active_queue,
            dedup: DashMap::new(),
            counters: DispatchCounters::default(),
            last_error: Mutex::new(None),
        }
    }

    /// Attach a local writer's matched-readers registry under its entity id.
    pub fn register_writer(&self, entity_id: [u8; 4], registry: Arc<MatchedReadersRegistry>) {
        self.writers.insert(entity_id, registry);
    }

    /// Attach a local reliable reader's writer-proxy registry under its
    /// entity id.
    pub fn register_reader(&self, entity_id: [u8; 4], registry: Arc<ReaderProxyRegistry>) {
        self.readers.insert(entity_id, registry);
    }

    /// Attach a local best-effort reader's writer-proxy registry (spec
    /// Sec.4.6) under its entity id.
    pub fn register_best_effort_reader(&self, entity_id: [u8; 4], registry: Arc<BestEffortReaderRegistry>) {
        self.best_effort_readers.insert(entity_id, registry);
    }

    pub fn unregister_writer(&self, entity_id: &[u8; 4]) {
        self.writers.remove(entity_id);
    }

    pub fn unregister_reader(&self, entity_id: &[u8; 4]) {
        self.readers.remove(entity_id);
        self.best_effort_readers.remove(entity_id);
    }

    pub fn active_queue(&self) -> &Arc<ActiveProxyQueue> {
        &self.active_queue
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }

    pub fn submsg_too_short_count(&self) -> u64 {
        self.counters.submsg_too_short.load(Ordering::Relaxed)
    }

    pub fn unknown_dest_count(&self) -> u64 {
        self.counters.unknown_dest.load(Ordering::Relaxed)
    }

    pub fn duplicate_ignored_count(&self) -> u64 {
        self.counters.duplicate_ignored.load(Ordering::Relaxed)
    }

    fn record_error(&self, err: Error) {
        if matches!(err, Error::TooShort { .. }) {
            self.counters
                .submsg_too_short
                .fetch_add(1, Ordering::Relaxed);
        } else if matches!(err, Error::UnknownDest { .. }) {
            self.counters.unknown_dest.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_error.lock() = Some(err);
    }

    /// `true` if `count` has already been seen (or surpassed) for this key,
    /// i.e. the submessage is a duplicate that must be ignored.
    fn is_duplicate(&self, kind: u8, local_entity_id: [u8; 4], remote_guid: [u8; 16], count: u32) -> bool {
        let key = (kind, local_entity_id, remote_guid);
        match self.dedup.get_mut(&key) {
            Some(mut last) if *last >= count => true,
            Some(mut last) => {
                *last = count;
                false
            }
            None => {
                self.dedup.insert(key, count);
                false
            }
        }
    }

    /// Process one raw RTPS datagram: parse the header, walk every
    /// submessage, and dispatch payload-carrying ones to the registered
    /// endpoints. Never panics on malformed input -- each submessage either
    /// decodes or is dropped and recorded.
    pub fn on_datagram(&self, datagram: &[u8]) -> DispatchReport {
        let mut report = DispatchReport::default();

        let header = match RtpsHeader::parse(datagram) {
            Ok(h) => h,
            Err(err) => {
                self.record_error(err.clone());
                report.events.push(DispatchEvent::Dropped {
                    submsg_id: 0,
                    error: err,
                });
                return report;
            }
        };

        let mut ctx = ReceiverContext {
            src_guid_prefix: header.guid_prefix,
            dst_guid_prefix: None,
            timestamp_nanos: None,
        };

        for decoded in decode_submessages(datagram) {
            let submsg = match decoded.result {
                Ok(s) => s,
                Err(err) => {
                    self.record_error(err.clone());
                    report.events.push(DispatchEvent::Dropped {
                        submsg_id: decoded.id,
                        error: err,
                    });
                    continue;
                }
            };

            self.dispatch_one(&mut ctx, submsg, &mut report);
        }

        report
    }

    fn dispatch_one(&self, ctx: &mut ReceiverContext, submsg: Submessage, report: &mut DispatchReport) {
        match submsg {
            Submessage::Pad | Submessage::Unknown { .. } => {}

            Submessage::InfoTs(ts) => ctx.timestamp_nanos = Some(ts.as_nanos()),
            Submessage::InfoDst(dst) => ctx.dst_guid_prefix = Some(*dst.guid_prefix()),
            Submessage::InfoSrc { guid_prefix, .. } => ctx.src_guid_prefix = guid_prefix,
            Submessage::InfoReply { .. } => {}

            Submessage::AckNack {
                reader_id,
                writer_id,
                reader_sn_state,
                count,
                ..
            } => {
                let remote_reader_guid = guid(ctx.src_guid_prefix, reader_id);
                self.for_each_writer(writer_id, |local_entity_id, registry| {
                    if self.is_duplicate(RTPS_SUBMSG_ACKNACK, local_entity_id, remote_reader_guid, count) {
                        report.events.push(DispatchEvent::DuplicateIgnored {
                            submsg_id: RTPS_SUBMSG_ACKNACK,
                        });
                        self.counters.duplicate_ignored.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    if let Some(outcome) = registry.on_acknack(&remote_reader_guid, &reader_sn_state) {
                        if !outcome.to_retransmit.is_empty() || !outcome.gap_ranges.is_empty() {
                            registry.begin_repair(&remote_reader_guid);
                            self.active_queue
                                .activate(ProxyId::writer(local_entity_id, remote_reader_guid));
                        } else if outcome.requires_heartbeat {
                            // Initial ACKNACK: nothing to repair, but the
                            // reader is waiting on a HEARTBEAT to learn what
                            // the writer has.
                            self.active_queue
                                .activate(ProxyId::writer(local_entity_id, remote_reader_guid));
                        }
                        report.events.push(DispatchEvent::AckNack {
                            local_writer_entity_id: local_entity_id,
                            remote_reader_guid,
                            outcome,
                        });
                    }
                });
            }

            Submessage::Heartbeat {
                reader_id,
                writer_id,
                first_sn,
                last_sn,
                count,
                final_flag,
                ..
            } => {
                let remote_writer_guid = guid(ctx.src_guid_prefix, writer_id);
                self.for_each_reader(reader_id, |local_entity_id, registry| {
                    if self.is_duplicate(RTPS_SUBMSG_HEARTBEAT, local_entity_id, remote_writer_guid, count) {
                        report.events.push(DispatchEvent::DuplicateIgnored {
                            submsg_id: RTPS_SUBMSG_HEARTBEAT,
                        });
                        self.counters.duplicate_ignored.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    let decision = registry.on_heartbeat(
                        remote_writer_guid,
                        first_sn as i64,
                        last_sn as i64,
                        count,
                        final_flag,
                    );
                    if matches!(
                        decision,
                        AcknackDecision::NeedData { .. } | AcknackDecision::Synchronized { .. }
                    ) {
                        self.active_queue
                            .activate(ProxyId::reader(local_entity_id, remote_writer_guid));
                    }
                    report.events.push(DispatchEvent::Heartbeat {
                        local_reader_entity_id: local_entity_id,
                        remote_writer_guid,
                        decision,
                    });
                });
            }

            Submessage::Data {
                reader_id,
                writer_id,
                writer_sn,
                ..
            } => {
                let remote_writer_guid = guid(ctx.src_guid_prefix, writer_id);
                self.for_each_reader_any(
                    reader_id,
                    |local_entity_id, registry| {
                        registry.on_data(remote_writer_guid, writer_sn);
                        report.events.push(DispatchEvent::Data {
                            local_reader_entity_id: local_entity_id,
                            remote_writer_guid,
                            seq: writer_sn,
                        });
                    },
                    |local_entity_id, registry| {
                        match registry.on_data(remote_writer_guid, writer_sn) {
                            BestEffortDataOutcome::Delivered => {
                                report.events.push(DispatchEvent::Data {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                            BestEffortDataOutcome::DeliveredWithLoss { skipped } => {
                                report.events.push(DispatchEvent::SampleLost {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                    skipped,
                                });
                                report.events.push(DispatchEvent::Data {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                            BestEffortDataOutcome::Dropped => {}
                        }
                    },
                );
            }

            Submessage::Gap(gap) => {
                let remote_writer_guid = guid(ctx.src_guid_prefix, gap.writer_id());
                let ranges = gap.lost_ranges();
                self.for_each_reader(gap.reader_id(), |_local_entity_id, registry| {
                    for range in &ranges {
                        registry.on_gap(remote_writer_guid, range.clone());
                    }
                });
                report.events.push(DispatchEvent::Informational {
                    submsg_id: RTPS_SUBMSG_GAP,
                    remote_guid: remote_writer_guid,
                });
            }

            Submessage::DataFrag {
                reader_id,
                writer_id,
                writer_sn,
                fragment_starting_num,
                fragments_in_submessage,
                fragment_size,
                sample_size,
                body,
            } => {
                let remote_writer_guid = guid(ctx.src_guid_prefix, writer_id);
                self.for_each_reader_any(
                    reader_id,
                    |local_entity_id, registry| {
                        match registry.on_data_frag(
                            remote_writer_guid,
                            writer_sn,
                            fragment_starting_num,
                            fragments_in_submessage,
                            fragment_size,
                            sample_size,
                            &body,
                        ) {
                            Some(_payload) => {
                                report.events.push(DispatchEvent::Data {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                            None => {
                                report.events.push(DispatchEvent::FragmentReceived {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                        }
                    },
                    |local_entity_id, registry| {
                        match registry.on_data_frag(
                            remote_writer_guid,
                            writer_sn,
                            fragment_starting_num,
                            fragments_in_submessage,
                            fragment_size,
                            sample_size,
                            &body,
                        ) {
                            Some((_payload, BestEffortDataOutcome::DeliveredWithLoss { skipped })) => {
                                report.events.push(DispatchEvent::SampleLost {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                    skipped,
                                });
                                report.events.push(DispatchEvent::Data {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                            Some((_payload, _)) => {
                                report.events.push(DispatchEvent::Data {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                            None => {
                                report.events.push(DispatchEvent::FragmentReceived {
                                    local_reader_entity_id: local_entity_id,
                                    remote_writer_guid,
                                    seq: writer_sn,
                                });
                            }
                        }
                    },
                );
            }

            Submessage::HeartbeatFrag {
                reader_id,
                writer_id,
                writer_sn,
                count,
                ..
            } => {
                let remote_writer_guid = guid(ctx.src_guid_prefix, writer_id);
                self.for_each_reader(reader_id, |local_entity_id, registry| {
                    let decision = registry.on_heartbeat_frag(remote_writer_guid, writer_sn, count);
                    if matches!(decision, FragAckDecision::NackFrag { .. }) {
                        self.active_queue
                            .activate(ProxyId::reader(local_entity_id, remote_writer_guid));
                    }
                    report.events.push(DispatchEvent::FragAck {
                        local_reader_entity_id: local_entity_id,
                        remote_writer_guid,
                        seq: writer_sn,
                        decision,
                    });
                });
            }

            Submessage::NackFrag {
                reader_id,
                writer_id,
                writer_sn,
                frag_base,
                frag_num_bits,
                frag_bitmap,
                count,
            } => {
                let remote_reader_guid = guid(ctx.src_guid_prefix, reader_id);
                self.for_each_writer(writer_id, |local_entity_id, registry| {
                    if self.is_duplicate(RTPS_SUBMSG_NACK_FRAG, local_entity_id, remote_reader_guid, count) {
                        report.events.push(DispatchEvent::DuplicateIgnored {
                            submsg_id: RTPS_SUBMSG_NACK_FRAG,
                        });
                        self.counters.duplicate_ignored.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    let missing_fragments =
                        registry.on_nack_frag(&remote_reader_guid, writer_sn, frag_base, frag_num_bits, &frag_bitmap);
                    if !missing_fragments.is_empty() {
                        self.active_queue
                            .activate(ProxyId::writer(local_entity_id, remote_reader_guid));
                    }
                    report.events.push(DispatchEvent::NackFrag {
                        local_writer_entity_id: local_entity_id,
                        remote_reader_guid,
                        seq: writer_sn,
                        missing_fragments,
                    });
                });
            }
        }
    }

    fn for_each_writer(&self, writer_id: [u8; 4], mut f: impl FnMut([u8; 4], &Arc<MatchedReadersRegistry>)) {
        if writer_id == ENTITYID_UNKNOWN {
            let all: Vec<_> = self
                .writers
                .iter()
                .map(|e| (*e.key(), Arc::clone(e.value())))
                .collect();
            for (id, registry) in &all {
                f(*id, registry);
            }
            return;
        }
        match self.writers.get(&writer_id) {
            Some(registry) => f(writer_id, &registry),
            None => self.record_error(Error::UnknownDest { entity_id: writer_id }),
        }
    }

    fn for_each_reader(&self, reader_id: [u8; 4], mut f: impl FnMut([u8; 4], &Arc<ReaderProxyRegistry>)) {
        if reader_id == ENTITYID_UNKNOWN {
            let all: Vec<_> = self
                .readers
                .iter()
                .map(|e| (*e.key(), Arc::clone(e.value())))
                .collect();
            for (id, registry) in &all {
                f(*id, registry);
            }
            return;
        }
        match self.readers.get(&reader_id) {
            Some(registry) => f(reader_id, &registry),
            None => self.record_error(Error::UnknownDest { entity_id: reader_id }),
        }
    }

    /// Routes to whichever table the local reader entity id is registered
    /// under -- a reader is reliable or best-effort, never both. `UNKNOWN`
    /// fans out across every endpoint in both tables.
    fn for_each_reader_any(
        &self,
        reader_id: [u8; 4],
        mut reliable: impl FnMut([u8; 4], &Arc<ReaderProxyRegistry>),
        mut best_effort: impl FnMut([u8; 4], &Arc<BestEffortReaderRegistry>),
    ) {
        if reader_id == ENTITYID_UNKNOWN {
            let rel: Vec<_> = self
                .readers
                .iter()
                .map(|e| (*e.key(), Arc::clone(e.value())))
                .collect();
            for (id, registry) in &rel {
                reliable(*id, registry);
            }
            let be: Vec<_> = self
                .best_effort_readers
                .iter()
                .map(|e| (*e.key(), Arc::clone(e.value())))
                .collect();
            for (id, registry) in &be {
                best_effort(*id, registry);
            }
            return;
        }
        if let Some(registry) = self.readers.get(&reader_id) {
            reliable(reader_id, &registry);
            return;
        }
        if let Some(registry) = self.best_effort_readers.get(&reader_id) {
            best_effort(reader_id, &registry);
            return;
        }
        self.record_error(Error::UnknownDest { entity_id: reader_id });
    }
}

// Silence an unused-import warning on platforms where HashMap is not
// otherwise referenced; kept for the dedup-key type alias documentation.
#[allow(dead_code)]
type _DedupKey = HashMap<(u8, [u8; 4], [u8; 16]), u32>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use crate::protocol::constants::{
        RTPS_RELIABLE_VENDOR_ID, RTPS_HEADER_SIZE, RTPS_MAGIC, RTPS_SUBMSG_ACKNACK, RTPS_SUBMSG_DATA_FRAG,
        RTPS_SUBMSG_HEARTBEAT, RTPS_SUBMSG_HEARTBEAT_FRAG, RTPS_SUBMSG_NACK_FRAG,
        RTPS_VERSION_MAJOR, RTPS_VERSION_MINOR,
    };

    const LOCAL_WRITER: [u8; 4] = [0, 0, 1, 0x02];
    const LOCAL_READER: [u8; 4] = [0, 0, 1, 0x03];

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

    fn heartbeat_body(reader_id: [u8; 4], writer_id: [u8; 4], first: u64, last: u64, count: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&reader_id);
        body.extend_from_slice(&writer_id);
        body.extend_from_slice(&((first >> 32) as i32).to_le_bytes());
        body.extend_from_slice(&(first as u32).to_le_bytes());
        body.extend_from_slice(&((last >> 32) as i32).to_le_bytes());
        body.extend_from_slice(&(last as u32).to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        body
    }

    fn acknack_body(reader_id: [u8; 4], writer_id: [u8; 4], base: i64, num_bits: u32, count: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&reader_id);
        body.extend_from_slice(&writer_id);
        body.extend_from_slice(&base.to_le_bytes());
        body.extend_from_slice(&num_bits.to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        body
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn heartbeat_creates_proxy_and_activates_reader() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let readers = Arc::new(ReaderProxyRegistry::new());
        dispatcher.register_reader(LOCAL_READER, Arc::clone(&readers));

        let prefix = [9u8; 12];
        let mut datagram = datagram_header(prefix);
        push_submsg(
            &mut datagram,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body(LOCAL_READER, [0, 0, 1, 0x02], 1, 3, 1),
        );

        let report = dispatcher.on_datagram(&datagram);
        assert_eq!(report.error_count(), 0);
        assert!(matches!(
            report.events[0],
            DispatchEvent::Heartbeat {
                decision: AcknackDecision::NeedData { base: 1, .. },
                ..
            }
        ));

        let remote_writer_guid = guid(prefix, [0, 0, 1, 0x02]);
        assert!(dispatcher
            .active_queue()
            .is_active(&ProxyId::reader(LOCAL_READER, remote_writer_guid)));
    }

    #[test]
    fn acknack_with_gap_activates_writer_for_retransmit() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let writers = Arc::new(MatchedReadersRegistry::new());
        dispatcher.register_writer(LOCAL_WRITER, Arc::clone(&writers));

        let prefix = [3u8; 12];
        let reader_guid = guid(prefix, [0, 0, 2, 0x07]);
        writers.add_reader(reader_guid, addr(7400), Duration::from_secs(10));
        for seq in 1..=3u64 {
            writers.new_change(seq);
            writers.mark_sent(&reader_guid, seq);
        }

        let mut datagram = datagram_header(prefix);
        push_submsg(
            &mut datagram,
            RTPS_SUBMSG_ACKNACK,
            0x01,
            &acknack_body([0, 0, 2, 0x07], LOCAL_WRITER, 1, 32, 1),
        );

        let report = dispatcher.on_datagram(&datagram);
        assert_eq!(report.error_count(), 0);
        assert!(dispatcher
            .active_queue()
            .is_active(&ProxyId::writer(LOCAL_WRITER, reader_guid)));
    }

    #[test]
    fn duplicate_heartbeat_count_is_ignored() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let readers = Arc::new(ReaderProxyRegistry::new());
        dispatcher.register_reader(LOCAL_READER, Arc::clone(&readers));

        let prefix = [1u8; 12];
        let mut first = datagram_header(prefix);
        push_submsg(
            &mut first,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body(LOCAL_READER, [0, 0, 1, 0x02], 1, 1, 5),
        );
        let report1 = dispatcher.on_datagram(&first);
        assert_eq!(report1.events.len(), 1);

        let mut dup = datagram_header(prefix);
        push_submsg(
            &mut dup,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body(LOCAL_READER, [0, 0, 1, 0x02], 1, 1, 5),
        );
        let report2 = dispatcher.on_datagram(&dup);
        assert_eq!(dispatcher.duplicate_ignored_count(), 1);
        assert!(matches!(
            report2.events[0],
            DispatchEvent::DuplicateIgnored { submsg_id } if submsg_id == RTPS_SUBMSG_HEARTBEAT
        ));
    }

    #[test]
    fn unknown_local_entity_is_recorded_as_unknown_dest() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));

        let prefix = [2u8; 12];
        let mut datagram = datagram_header(prefix);
        push_submsg(
            &mut datagram,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body([0, 0, 9, 0x07], [0, 0, 1, 0x02], 1, 1, 1),
        );

        let report = dispatcher.on_datagram(&datagram);
        assert!(report.events.is_empty());
        assert_eq!(dispatcher.unknown_dest_count(), 1);
        assert!(matches!(dispatcher.last_error(), Some(Error::UnknownDest { .. })));
    }

    #[test]
    fn unknown_reader_entity_id_fans_out() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let r1 = Arc::new(ReaderProxyRegistry::new());
        let r2 = Arc::new(ReaderProxyRegistry::new());
        dispatcher.register_reader([0, 0, 1, 0x03], Arc::clone(&r1));
        dispatcher.register_reader([0, 0, 2, 0x03], Arc::clone(&r2));

        let prefix = [4u8; 12];
        let mut datagram = datagram_header(prefix);
        push_submsg(
            &mut datagram,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body(ENTITYID_UNKNOWN, [0, 0, 1, 0x02], 1, 1, 1),
        );

        let report = dispatcher.on_datagram(&datagram);
        assert_eq!(report.events.len(), 2);
        assert_eq!(r1.len(), 1);
        assert_eq!(r2.len(), 1);
    }

    /// A deleted endpoint (spec Sec.8 Scenario F) must be fully unlinked:
    /// once unregistered, a remote peer's in-flight datagram addressed to
    /// it is neither delivered nor repaired, only recorded as unreachable.
    #[test]
    fn unregistered_reader_receives_no_further_datagrams() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let readers = Arc::new(ReaderProxyRegistry::new());
        dispatcher.register_reader(LOCAL_READER, Arc::clone(&readers));

        let prefix = [8u8; 12];
        let mut before = datagram_header(prefix);
        push_submsg(
            &mut before,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body(LOCAL_READER, [0, 0, 1, 0x02], 1, 1, 1),
        );
        let report = dispatcher.on_datagram(&before);
        assert!(!report.events.is_empty());
        assert_eq!(readers.len(), 1);

        dispatcher.unregister_reader(&LOCAL_READER);

        let mut after = datagram_header(prefix);
        push_submsg(
            &mut after,
            RTPS_SUBMSG_HEARTBEAT,
            0x01,
            &heartbeat_body(LOCAL_READER, [0, 0, 1, 0x02], 1, 2, 2),
        );
        let report = dispatcher.on_datagram(&after);
        assert!(report.events.is_empty());
        assert!(matches!(dispatcher.last_error(), Some(Error::UnknownDest { .. })));
    }

    fn data_body(reader_id: [u8; 4], writer_id: [u8; 4], writer_sn: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0u8, 0u8]); // extraFlags
        body.extend_from_slice(&16u16.to_le_bytes()); // octetsToInlineQos
        body.extend_from_slice(&reader_id);
        body.extend_from_slice(&writer_id);
        body.extend_from_slice(&((writer_sn >> 32) as i32).to_le_bytes());
        body.extend_from_slice(&(writer_sn as u32).to_le_bytes());
        body
    }

    #[test]
    fn best_effort_reader_reports_sample_lost_on_gap() {
        use crate::protocol::constants::RTPS_SUBMSG_DATA;

        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let readers = Arc::new(BestEffortReaderRegistry::new());
        dispatcher.register_best_effort_reader(LOCAL_READER, Arc::clone(&readers));

        let prefix = [5u8; 12];
        let remote_writer = [0, 0, 1, 0x02];

        let mut first = datagram_header(prefix);
        push_submsg(&mut first, RTPS_SUBMSG_DATA, 0x01, &data_body(LOCAL_READER, remote_writer, 1));
        let report1 = dispatcher.on_datagram(&first);
        assert!(matches!(report1.events[0], DispatchEvent::Data { seq: 1, .. }));

        // Sequence 2 and 3 never arrive; 4 shows up next -- best-effort never
        // repairs, it just reports the loss.
        let mut second = datagram_header(prefix);
        push_submsg(&mut second, RTPS_SUBMSG_DATA, 0x01, &data_body(LOCAL_READER, remote_writer, 4));
        let report2 = dispatcher.on_datagram(&second);
        assert!(matches!(
            report2.events[0],
            DispatchEvent::SampleLost { seq: 4, skipped: 2, .. }
        ));
        assert!(matches!(report2.events[1], DispatchEvent::Data { seq: 4, .. }));
    }

    #[test]
    fn truncated_datagram_is_dropped_without_panicking() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let report = dispatcher.on_datagram(&[0u8; 4]);
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            report.events[0],
            DispatchEvent::Dropped {
                error: Error::TooShort { .. },
                ..
            }
        ));
    }

    fn data_frag_body(
        reader_id: [u8; 4],
        writer_id: [u8; 4],
        writer_sn: u64,
        fragment_starting_num: u32,
        fragments_in_submessage: u16,
        fragment_size: u16,
        sample_size: u32,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0u8, 0u8]); // extraFlags
        body.extend_from_slice(&28u16.to_le_bytes()); // octetsToInlineQos: body starts right after header
        body.extend_from_slice(&reader_id);
        body.extend_from_slice(&writer_id);
        body.extend_from_slice(&((writer_sn >> 32) as i32).to_le_bytes());
        body.extend_from_slice(&(writer_sn as u32).to_le_bytes());
        body.extend_from_slice(&fragment_starting_num.to_le_bytes());
        body.extend_from_slice(&fragments_in_submessage.to_le_bytes());
        body.extend_from_slice(&fragment_size.to_le_bytes());
        body.extend_from_slice(&sample_size.to_le_bytes());
        body.extend_from_slice(payload);
        body
    }

    fn heartbeat_frag_body(reader_id: [u8; 4], writer_id: [u8; 4], writer_sn: u64, last_fragment_num: u32, count: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&reader_id);
        body.extend_from_slice(&writer_id);
        body.extend_from_slice(&((writer_sn >> 32) as i32).to_le_bytes());
        body.extend_from_slice(&(writer_sn as u32).to_le_bytes());
        body.extend_from_slice(&last_fragment_num.to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        body
    }

    fn nack_frag_body(
        reader_id: [u8; 4],
        writer_id: [u8; 4],
        writer_sn: u64,
        frag_base: u32,
        frag_num_bits: u32,
        bitmap_words: &[u32],
        count: u32,
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&reader_id);
        body.extend_from_slice(&writer_id);
        body.extend_from_slice(&((writer_sn >> 32) as i32).to_le_bytes());
        body.extend_from_slice(&(writer_sn as u32).to_le_bytes());
        body.extend_from_slice(&frag_base.to_le_bytes());
        body.extend_from_slice(&frag_num_bits.to_le_bytes());
        for word in bitmap_words {
            body.extend_from_slice(&word.to_le_bytes());
        }
        body.extend_from_slice(&count.to_le_bytes());
        body
    }

    /// Loss-of-one-fragment-of-three, reduced to two fragments: a DATA_FRAG
    /// carrying the full sample split in two is reassembled fragment-by-
    /// fragment into a single `Data` delivery event.
    #[test]
    fn data_frag_reassembles_and_reports_data_once_complete() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let readers = Arc::new(ReaderProxyRegistry::new());
        dispatcher.register_reader(LOCAL_READER, Arc::clone(&readers));
        let remote_writer = [0, 0, 1, 0x02];
        let prefix = [7u8; 12];

        let mut first = datagram_header(prefix);
        push_submsg(
            &mut first,
            RTPS_SUBMSG_DATA_FRAG,
            0x01,
            &data_frag_body(LOCAL_READER, remote_writer, 1, 1, 1, 10, 20, &[1u8; 10]),
        );
        let report1 = dispatcher.on_datagram(&first);
        assert!(matches!(
            report1.events[0],
            DispatchEvent::FragmentReceived { seq: 1, .. }
        ));

        let mut second = datagram_header(prefix);
        push_submsg(
            &mut second,
            RTPS_SUBMSG_DATA_FRAG,
            0x01,
            &data_frag_body(LOCAL_READER, remote_writer, 1, 2, 1, 10, 20, &[2u8; 10]),
        );
        let report2 = dispatcher.on_datagram(&second);
        assert!(matches!(report2.events[0], DispatchEvent::Data { seq: 1, .. }));
    }

    #[test]
    fn heartbeat_frag_reports_missing_fragment_and_activates_reader() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let readers = Arc::new(ReaderProxyRegistry::new());
        dispatcher.register_reader(LOCAL_READER, Arc::clone(&readers));
        let remote_writer = [0, 0, 1, 0x02];
        let prefix = [8u8; 12];

        // Only fragment 0 of 2 has arrived.
        let mut datagram = datagram_header(prefix);
        push_submsg(
            &mut datagram,
            RTPS_SUBMSG_DATA_FRAG,
            0x01,
            &data_frag_body(LOCAL_READER, remote_writer, 5, 1, 1, 10, 20, &[1u8; 10]),
        );
        dispatcher.on_datagram(&datagram);

        let mut hb = datagram_header(prefix);
        push_submsg(
            &mut hb,
            RTPS_SUBMSG_HEARTBEAT_FRAG,
            0x01,
            &heartbeat_frag_body(LOCAL_READER, remote_writer, 5, 2, 1),
        );
        let report = dispatcher.on_datagram(&hb);
        assert!(matches!(
            report.events[0],
            DispatchEvent::FragAck {
                decision: FragAckDecision::NackFrag { base: 1, .. },
                ..
            }
        ));
        let remote_writer_guid = guid(prefix, remote_writer);
        assert!(dispatcher
            .active_queue()
            .is_active(&ProxyId::reader(LOCAL_READER, remote_writer_guid)));
    }

    #[test]
    fn nack_frag_activates_writer_proxy_for_retransmission() {
        let dispatcher = Dispatcher::new(Arc::new(ActiveProxyQueue::new()));
        let writers = Arc::new(MatchedReadersRegistry::new());
        dispatcher.register_writer(LOCAL_WRITER, Arc::clone(&writers));

        let prefix = [11u8; 12];
        let reader_guid = guid(prefix, [0, 0, 2, 0x07]);
        writers.add_reader(reader_guid, addr(7400), Duration::from_secs(10));
        writers.new_change(1);
        writers.mark_sent(&reader_guid, 1);

        let mut datagram = datagram_header(prefix);
        push_submsg(
            &mut datagram,
            RTPS_SUBMSG_NACK_FRAG,
            0x01,
            &nack_frag_body([0, 0, 2, 0x07], LOCAL_WRITER, 1, 2, 1, &[0x8000_0000], 1),
        );

        let report = dispatcher.on_datagram(&datagram);
        assert!(matches!(
            report.events[0],
            DispatchEvent::NackFrag { ref missing_fragments, .. } if missing_fragments == &vec![1]
        ));
        assert!(dispatcher
            .active_queue()
            .is_active(&ProxyId::writer(LOCAL_WRITER, reader_guid)));
    }
}
