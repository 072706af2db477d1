// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `SfRelWriterProxy` - per-reader state for a stateful-reliable (SF-Rel) Writer.
//!
//! Implements RTPS Sec.8.4.7 StatefulWriter/ReaderProxy behavior:
//! - Owns a [`CcList`] tracking every change ever offered to this reader,
//!   in writer-side entry states (`NEW/UNSENT/UNDERWAY/UNACKED/ACKED`, plus
//!   `REQUESTED` once NACKed).
//! - Turns an incoming ACKNACK bitmap into exactly the retransmit/GAP work
//!   this proxy requires.
//! - Tracks an Ack sub-state (`WAITING`/`MUST_REPAIR`/`REPAIRING`) and a
//!   heartbeat-backoff counter, both reset by reader contact.
//! - Manages proxy lifecycle (expiry based on `lease_duration`).

use std::net::SocketAddr;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::reliability::{CcList, SequenceNumberSet, WriterEntryState};

/// Writer-side Ack sub-state for one matched reader (RTPS Sec.8.4.7.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// All offered changes are acknowledged (or none have been offered yet).
    Waiting,
    /// The last ACKNACK carried at least one requested sequence number.
    MustRepair,
    /// Retransmission for the requested sequences is in flight.
    Repairing,
}

/// Outcome of feeding an ACKNACK bitmap to [`SfRelWriterProxy::on_acknack`].
#[derive(Debug, Clone, Default)]
pub struct AckNackOutcome {
    /// Sequence numbers this proxy still holds and must retransmit.
    pub to_retransmit: Vec<u64>,
    /// Ranges the reader asked for that this proxy no longer has (they fell
    /// into a gap before this reader ever saw them); a GAP submessage for
    /// these ranges tells the reader to stop waiting.
    pub gap_ranges: Vec<Range<u64>>,
    /// Whether the nack-response timer should be (re)started.
    ///
    /// Per the engine's coalescing policy, the timer restarts only if the
    /// proxy was *not* already in `MustRepair` before this ACKNACK: a
    /// second ACKNACK arriving mid-repair must not push the response
    /// further into the future, or the writer could repair forever under
    /// a steady trickle of NACKs.
    pub restart_nack_response_timer: bool,
    /// Set for the "initial" ACKNACK (`base==0 && numbits==0`) a brand-new
    /// reliable reader sends before it has ever seen a HEARTBEAT: this
    /// elicits a HEARTBEAT in response but must not otherwise touch ack
    /// state (spec Sec.4.1, Sec.4.4 step 2, Scenario C).
    pub requires_heartbeat: bool,
}

/// RTPS Writer state per matched remote reader (RTPS Sec.8.4.7 ReaderProxy).
pub struct SfRelWriterProxy {
    reader_guid: [u8; 16],
    unicast_addr: Mutex<SocketAddr>,
    changes: Mutex<CcList<WriterEntryState>>,
    ack_state: Mutex<AckState>,
    last_acked_seq: AtomicI64,
    is_synchronized: AtomicBool,
    heartbeat_backoff: AtomicU32,
    last_heartbeat_time: Mutex<Instant>,
    lease_duration: Mutex<Duration>,
    last_seen: Mutex<Instant>,
}

impl SfRelWriterProxy {
    /// Create a new proxy for a matched remote reader. `base_seq` is the
    /// first sequence number this writer will ever offer (usually 1).
    pub fn new(reader_guid: [u8; 16], unicast_addr: SocketAddr, lease_duration: Duration) -> Self {
        let now = Instant::now();
        Self {
            reader_guid,
            unicast_addr: Mutex::new(unicast_addr),
            changes: Mutex::new(CcList::new(1)),
            ack_state: Mutex::new(AckState::Waiting),
            last_acked_seq: AtomicI64::new(0),
            is_synchronized: AtomicBool::new(true),
            heartbeat_backoff: AtomicU32::new(0),
            last_heartbeat_time: Mutex::new(now),
            lease_duration: Mutex::new(lease_duration),
            last_seen: Mutex::new(now),
        }
    }

    /// Announces a newly-written change to this proxy, in `UNSENT` state.
    /// An unacknowledged change now exists, so the proxy can no longer be
    /// considered synchronized until an ACKNACK acks it.
    pub fn new_change(&self, seq: u64) {
        let mut changes = self.changes.lock();
        if seq < changes.next_seq() {
            return;
        }
        if seq > changes.next_seq() {
            changes.push_gap(changes.next_seq()..seq, WriterEntryState::Acked);
        }
        changes.push_relevant(seq, WriterEntryState::Unsent);
        drop(changes);
        self.is_synchronized.store(false, Ordering::SeqCst);
    }

    /// Marks a change as transmitted (`UNSENT`/`REQUESTED` -> `UNACKED`).
    pub fn mark_sent(&self, seq: u64) {
        let mut changes = self.changes.lock();
        changes.set_state(seq, WriterEntryState::Unacked);
    }

    /// Processes an incoming ACKNACK bitmap from this reader.
    ///
    /// `reader_sn_state.base()` is the next sequence the reader hasn't
    /// acknowledged; every sequence strictly below it is implicitly ACKed.
    /// Bits set in the bitmap name sequences the reader is explicitly
    /// missing and wants retransmitted.
    pub fn on_acknack(&self, reader_sn_state: &SequenceNumberSet) -> AckNackOutcome {
        *self.last_seen.lock() = Instant::now();
        self.heartbeat_backoff.store(0, Ordering::Relaxed);

        // Initial ACKNACK: a brand-new reader announcing itself before it
        // has ever received a HEARTBEAT. It must elicit one in response but
        // must not be mistaken for a full ACK of everything held so far.
        if reader_sn_state.base() == 0 && reader_sn_state.num_bits() == 0 {
            return AckNackOutcome {
                requires_heartbeat: true,
                ..Default::default()
            };
        }

        let base = reader_sn_state.base().max(0) as u64;
        let requested: Vec<u64> = reader_sn_state.iter().collect();

        let mut changes = self.changes.lock();
        for (seq, state) in changes.iter_relevant().collect::<Vec<_>>() {
            if seq < base && state != WriterEntryState::Acked {
                changes.set_state(seq, WriterEntryState::Acked);
            }
        }

        let mut to_retransmit = Vec::with_capacity(requested.len());
        let mut gap_ranges: Vec<Range<u64>> = Vec::new();
        for seq in &requested {
            if changes.state_at(*seq).is_some() {
                changes.set_state(*seq, WriterEntryState::Requested);
                to_retransmit.push(*seq);
            } else if changes.is_gap(*seq) {
                match gap_ranges.last_mut() {
                    Some(r) if r.end == *seq => r.end = seq + 1,
                    _ => gap_ranges.push(*seq..(seq + 1)),
                }
            }
        }
        drop(changes);

        self.last_acked_seq
            .fetch_max(base.saturating_sub(1) as i64, Ordering::SeqCst);

        let mut ack_state = self.ack_state.lock();
        let was_must_repair = *ack_state == AckState::MustRepair;
        *ack_state = if requested.is_empty() {
            self.is_synchronized.store(true, Ordering::SeqCst);
            AckState::Waiting
        } else {
            self.is_synchronized.store(false, Ordering::SeqCst);
            AckState::MustRepair
        };
        let restart_nack_response_timer = !requested.is_empty() && !was_must_repair;

        AckNackOutcome {
            to_retransmit,
            gap_ranges,
            restart_nack_response_timer,
            requires_heartbeat: false,
        }
    }

    /// Called once retransmission for the current repair cycle has been
    /// queued to the transport, moving `MUST_REPAIR` -> `REPAIRING`.
    pub fn begin_repair(&self) {
        let mut state = self.ack_state.lock();
        if *state == AckState::MustRepair {
            *state = AckState::Repairing;
        }
    }

    /// Processes a NACK_FRAG naming fragments of `seq` still missing at the
    /// reader (spec Sec.4.5 `hbfrag`/NACK_FRAG). Unlike a whole-sample
    /// ACKNACK this never changes which *sample* is tracked -- `seq` is
    /// already `Unacked`/`Requested` in the change list, since a reader
    /// cannot be missing fragments of a sample it has fully ACKed -- it only
    /// flags the proxy for repair so the transmit side knows to resend the
    /// named fragment range of that one sample.
    ///
    /// Returns the list of missing fragment numbers (0-based) to retransmit.
    pub fn on_nack_frag(&self, seq: u64, frag_base: u32, frag_num_bits: u32, frag_bitmap: &[u32]) -> Vec<u32> {
        *self.last_seen.lock() = Instant::now();
        self.heartbeat_backoff.store(0, Ordering::Relaxed);

        let requested = SequenceNumberSet::from_raw(frag_base as i64, frag_num_bits, frag_bitmap)
            .map(|set| set.iter().map(|f| (f - 1) as u32).collect::<Vec<_>>())
            .unwrap_or_default();

        if requested.is_empty() {
            return requested;
        }

        // The sample itself must still be tracked (not yet fully ACKed) for
        // its fragments to be repairable; mark it REQUESTED same as a
        // whole-sample NACK would, if the list still holds it.
        let mut changes = self.changes.lock();
        if changes.state_at(seq).is_some() {
            changes.set_state(seq, WriterEntryState::Requested);
        }
        drop(changes);

        *self.ack_state.lock() = AckState::MustRepair;
        self.is_synchronized.store(false, Ordering::SeqCst);

        requested
    }

    /// Drops tracking for a change evicted from the writer's history cache.
    /// Functionally equivalent to acknowledgment: a change the writer no
    /// longer holds can never be resent, whether or not this reader saw it.
    pub fn rem_change(&self, seq: u64) {
        self.changes.lock().set_state(seq, WriterEntryState::Acked);
    }

    pub fn ack_state(&self) -> AckState {
        *self.ack_state.lock()
    }

    /// Current heartbeat period given exponential backoff: `base * 2^min(n,
    /// 7)`, jittered the way [`crate::reliability::HeartbeatTx`] does.
    pub fn heartbeat_period(&self, base: Duration) -> Duration {
        let backoff = self.heartbeat_backoff.load(Ordering::Relaxed).min(7);
        base.saturating_mul(1u32 << backoff)
    }

    /// Advances the backoff counter and, once it exceeds 4 missed cycles
    /// without reader contact, signals the caller to drop back to the
    /// reader's last-known multicast/default locator rather than keep
    /// hammering a unicast address that may no longer be reachable.
    pub fn heartbeat_sent(&self) -> bool {
        *self.last_heartbeat_time.lock() = Instant::now();
        let prev = self.heartbeat_backoff.fetch_add(1, Ordering::Relaxed);
        prev + 1 > 4
    }

    pub fn needs_heartbeat(&self, min_interval: Duration) -> bool {
        self.last_heartbeat_time.lock().elapsed() >= min_interval
    }

    pub fn is_expired(&self) -> bool {
        self.last_seen.lock().elapsed() > self.lease_duration.lock().mul_f32(1.5)
    }

    pub fn is_synchronized(&self) -> bool {
        self.is_synchronized.load(Ordering::SeqCst)
    }

    pub fn reader_guid(&self) -> &[u8; 16] {
        &self.reader_guid
    }

    pub fn unicast_addr(&self) -> SocketAddr {
        *self.unicast_addr.lock()
    }

    pub fn last_acked_seq(&self) -> i64 {
        self.last_acked_seq.load(Ordering::SeqCst)
    }

    pub fn lease_duration(&self) -> Duration {
        *self.lease_duration.lock()
    }

    pub fn set_unicast_addr(&self, addr: SocketAddr) {
        *self.unicast_addr.lock() = addr;
    }

    pub fn set_lease_duration(&self, duration: Duration) {
        *self.lease_duration.lock() = duration;
    }

    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }
}
