// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable Reader Proxy -- RTPS Sec.8.4.9 / spec Sec.4.5 (SF-Rel-R)
//!
//! Tracks, per matched remote writer, every sequence number this reader has
//! ever been told about (via DATA or HEARTBEAT) in a [`CcList`], so that an
//! ACKNACK reflects the reader's *actual* out-of-order reception state
//! rather than a single contiguous watermark. A reader that has received
//! 1,2,4,5,7,8,10 out of a writer's 1..10 must NACK exactly {3,6,9}; a
//! proxy that only remembered "highest received" could not express that.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::reliability::{CcList, FragInfo, ReaderEntryState};

/// Minimum interval between ACKNACK responses (RTPS `heartbeatResponseDelay`).
const ACKNACK_RATE_LIMIT_MS: u64 = 10;

/// Per-sample fragment reassembly state, keyed by sequence number within
/// one writer proxy (RTPS Sec.8.4.9 / spec Sec.4.5 `hbfrag`/fragment
/// receive).
struct FragEntry {
    info: FragInfo,
    last_hbfrag_count: Option<u32>,
}

/// Decision after processing a HEARTBEAT_FRAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragAckDecision {
    /// No in-flight reassembly for this sequence number, or duplicate count.
    Ignore,
    /// Every fragment up to `last_fragment_num` has arrived; nothing to nack.
    Complete,
    /// `missing` lists every absent fragment index (0-based) up to
    /// `last_fragment_num`; `base` is the first one.
    NackFrag { base: u32, missing: Vec<u32> },
}

/// Decision after processing a HEARTBEAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcknackDecision {
    /// Ignore duplicate HEARTBEAT (same or lower count).
    Ignore,
    /// Every sequence number the writer has announced has been received;
    /// ACKNACK should carry `FinalFlag=1` and an empty bitmap.
    Synchronized { base: u64 },
    /// At least one sequence number is still missing; `missing` lists every
    /// offset that must be set in the outgoing ACKNACK bitmap, in ascending
    /// order, each newly transitioned to `Requested`.
    NeedData { base: u64, missing: Vec<u64> },
    /// Rate-limited, don't send ACKNACK yet.
    RateLimited,
}

/// Per-writer state for a reliable Reader (RTPS Sec.8.4.9 WriterProxy).
#[derive(Debug, Clone)]
pub struct ReliableReaderProxy {
    writer_guid: [u8; 16],
    /// Every sequence number from 1 up to the highest ever announced,
    /// relevant throughout (missing/requested/received/lost are all states
    /// of a relevant entry -- nothing is ever genuinely irrelevant on the
    /// reader side short of an explicit GAP).
    list: CcList<ReaderEntryState>,
    last_hb_count: Option<u32>,
    last_acknack_time: Option<Instant>,
    rate_limit: Duration,
    /// In-flight DATA_FRAG reassembly contexts, keyed by sequence number.
    frags: HashMap<u64, FragEntry>,
}

impl ReliableReaderProxy {
    /// Create a new proxy for tracking a remote writer.
    pub fn new(writer_guid: [u8; 16]) -> Self {
        Self {
            writer_guid,
            list: CcList::new(1),
            last_hb_count: None,
            last_acknack_time: None,
            rate_limit: Duration::from_millis(ACKNACK_RATE_LIMIT_MS),
            frags: HashMap::new(),
        }
    }

    pub fn writer_guid(&self) -> &[u8; 16] {
        &self.writer_guid
    }

    /// Highest sequence number this proxy has ever been told about
    /// (received, missing, requested, or lost).
    pub fn highest_known_seq(&self) -> u64 {
        self.list.highest_seq().unwrap_or(0)
    }

    /// Highest sequence number actually delivered, i.e. the longest
    /// unbroken RECEIVED run starting at 1.
    pub fn highest_received_seq(&self) -> u64 {
        let mut highest = 0u64;
        for (seq, state) in self.list.iter_relevant() {
            if state == ReaderEntryState::Received && seq == highest + 1 {
                highest = seq;
            } else if state != ReaderEntryState::Received {
                break;
            }
        }
        highest
    }

    /// Appends `Missing` placeholder entries so the list's coverage reaches
    /// at least `upto` (inclusive).
    fn ensure_coverage(&mut self, upto: u64) {
        while self.list.next_seq() <= upto {
            let seq = self.list.next_seq();
            self.list.push_relevant(seq, ReaderEntryState::Missing);
        }
    }

    /// Record that DATA was received from the remote writer for `seq`.
    /// Returns `true` if this newly satisfied a previously-missing entry
    /// (i.e. is not a duplicate).
    pub fn on_data(&mut self, seq: u64) -> bool {
        if seq == 0 || seq < self.list.base() {
            return false;
        }
        if seq >= self.list.next_seq() {
            self.ensure_coverage(seq - 1);
            self.list.push_relevant(seq, ReaderEntryState::Received);
            return true;
        }
        match self.list.state_at(seq) {
            Some(ReaderEntryState::Missing) | Some(ReaderEntryState::Requested) => {
                self.list.set_state(seq, ReaderEntryState::Received);
                true
            }
            _ => false,
        }
    }

    /// Record a GAP submessage declaring `range` (exclusive end) will never
    /// be delivered. Sequences already `Received` are never downgraded.
    pub fn on_gap(&mut self, range: std::ops::Range<u64>) {
        if range.start >= range.end {
            return;
        }
        self.ensure_coverage(range.end - 1);
        for seq in range {
            if seq < self.list.base() {
                continue;
            }
            match self.list.state_at(seq) {
                Some(ReaderEntryState::Received) => {}
                Some(_) => {
                    self.list.set_state(seq, ReaderEntryState::Lost);
                }
                None => {}
            }
        }
    }

    /// Record one DATA_FRAG submessage for `seq`. `fragment_starting_num` is
    /// 1-based per the wire format; `fragments_in_submessage` fragments of
    /// `fragment_size` bytes each (the last overall fragment may be shorter,
    /// per `sample_size`) are concatenated in `body`.
    ///
    /// Once every fragment has arrived the reassembled payload is returned
    /// and `seq` is folded into the normal `on_data` path as a fully
    /// assembled sample.
    pub fn on_data_frag(
        &mut self,
        seq: u64,
        fragment_starting_num: u32,
        fragments_in_submessage: u16,
        fragment_size: u16,
        sample_size: u32,
        body: &[u8],
    ) -> Option<Vec<u8>> {
        if fragment_starting_num == 0 || fragment_size == 0 {
            return None;
        }
        let entry = self.frags.entry(seq).or_insert_with(|| FragEntry {
            info: FragInfo::new(seq, sample_size, fragment_size as u32, None),
            last_hbfrag_count: None,
        });

        let fragment_size = fragment_size as u64;
        for i in 0..fragments_in_submessage as u64 {
            let starting_fragment_0based = fragment_starting_num as u64 - 1 + i;
            let offset = i * fragment_size;
            let end = (offset + fragment_size).min(body.len() as u64);
            if offset >= body.len() as u64 {
                break;
            }
            let chunk = &body[offset as usize..end as usize];
            entry.info.receive_fragment(starting_fragment_0based as u32, chunk);
        }

        if entry.info.is_complete() {
            let entry = self.frags.remove(&seq).expect("just checked present");
            let payload = entry.info.into_payload();
            self.on_data(seq);
            Some(payload)
        } else {
            None
        }
    }

    /// Process a HEARTBEAT_FRAG for `seq`: returns the bitmap of fragments
    /// still absent up to `last_fragment_num` (0-based indices), per the
    /// spec's `hbfrag` contract.
    pub fn on_heartbeat_frag(&mut self, seq: u64, count: u32) -> FragAckDecision {
        let Some(entry) = self.frags.get_mut(&seq) else {
            return FragAckDecision::Ignore;
        };
        if let Some(last_count) = entry.last_hbfrag_count {
            if count <= last_count {
                return FragAckDecision::Ignore;
            }
        }
        entry.last_hbfrag_count = Some(count);
        entry.info.touch(Instant::now());

        let missing = entry.info.missing_fragments();
        if missing.is_empty() {
            FragAckDecision::Complete
        } else {
            FragAckDecision::NackFrag {
                base: missing[0],
                missing,
            }
        }
    }

    /// Drops any fragment reassembly contexts past their ~2s reassembly
    /// deadline.
    pub fn expire_stale_fragments(&mut self, now: Instant) {
        self.frags.retain(|_, entry| !entry.info.is_expired(now));
    }

    /// Every sequence number still outstanding (`Missing` or `Requested`),
    /// in ascending order, up to and including `last_seq`.
    fn outstanding_upto(&self, last_seq: u64) -> Vec<u64> {
        self.list
            .iter_relevant()
            .filter(|(seq, state)| {
                *seq <= last_seq
                    && matches!(state, ReaderEntryState::Missing | ReaderEntryState::Requested)
            })
            .map(|(seq, _)| seq)
            .collect()
    }

    /// Process an incoming HEARTBEAT and decide the ACKNACK response.
    pub fn on_heartbeat(
        &mut self,
        first_seq: i64,
        last_seq: i64,
        count: u32,
        _final_flag: bool,
    ) -> AcknackDecision {
        if let Some(last_count) = self.last_hb_count {
            if count <= last_count {
                log::trace!(
                    "[PROXY] Ignoring duplicate HEARTBEAT count={count} (last={last_count})"
                );
                return AcknackDecision::Ignore;
            }
        }
        self.last_hb_count = Some(count);

        if last_seq < first_seq || last_seq == 0 {
            return AcknackDecision::Synchronized {
                base: first_seq.max(1) as u64,
            };
        }

        if let Some(last_time) = self.last_acknack_time {
            if last_time.elapsed() < self.rate_limit {
                return AcknackDecision::RateLimited;
            }
        }

        let last_seq = last_seq as u64;
        let first_seq = first_seq.max(1) as u64;
        self.ensure_coverage(last_seq);

        // Entries still Missing below the writer's announced window start
        // will never arrive -- the writer no longer holds them.
        for seq in self.list.base()..first_seq {
            if matches!(self.list.state_at(seq), Some(ReaderEntryState::Missing)) {
                self.list.set_state(seq, ReaderEntryState::Lost);
            }
        }

        let missing = self.outstanding_upto(last_seq);
        if missing.is_empty() {
            log::debug!("[PROXY] Synchronized up to {last_seq}");
            AcknackDecision::Synchronized {
                base: self.list.next_seq(),
            }
        } else {
            for seq in &missing {
                self.list.set_state(*seq, ReaderEntryState::Requested);
            }
            log::debug!("[PROXY] NeedData: missing={missing:?}");
            AcknackDecision::NeedData {
                base: missing[0],
                missing,
            }
        }
    }

    /// Mark that an ACKNACK was sent (for rate limiting).
    pub fn mark_acknack_sent(&mut self) {
        self.last_acknack_time = Some(Instant::now());
    }

    /// True once every announced sequence number has been received.
    pub fn is_synchronized(&self) -> bool {
        self.list
            .iter_relevant()
            .all(|(_, state)| state == ReaderEntryState::Received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_proxy_needs_data() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        let decision = proxy.on_heartbeat(1, 1, 1, false);
        assert_eq!(
            decision,
            AcknackDecision::NeedData {
                base: 1,
                missing: vec![1]
            }
        );
    }

    #[test]
    fn test_synchronized_after_data() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        assert!(proxy.on_data(1));
        let decision = proxy.on_heartbeat(1, 1, 1, false);
        assert_eq!(decision, AcknackDecision::Synchronized { base: 2 });
        assert!(proxy.is_synchronized());
    }

    #[test]
    fn test_duplicate_heartbeat_ignored() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        let _ = proxy.on_heartbeat(1, 1, 1, false);
        proxy.mark_acknack_sent();

        let decision = proxy.on_heartbeat(1, 1, 1, false);
        assert_eq!(decision, AcknackDecision::Ignore);
    }

    #[test]
    fn test_empty_writer() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        let decision = proxy.on_heartbeat(1, 0, 1, false);
        assert!(matches!(decision, AcknackDecision::Synchronized { .. }));
    }

    /// Out-of-order bitmap: writer sends 1..10, reader sees
    /// 1,2,4,5,7,8,10 (missing 3,6,9). A HEARTBEAT(first=1,last=10) must
    /// produce an ACKNACK naming exactly {3,6,9}, not a contiguous range.
    #[test]
    fn scenario_a_out_of_order_bitmap_names_exact_gaps() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        for seq in [1u64, 2, 4, 5, 7, 8, 10] {
            proxy.on_data(seq);
        }

        let decision = proxy.on_heartbeat(1, 10, 1, false);
        match decision {
            AcknackDecision::NeedData { base, missing } => {
                assert_eq!(base, 3);
                assert_eq!(missing, vec![3, 6, 9]);
            }
            other => panic!("expected NeedData, got {other:?}"),
        }
        assert!(!proxy.is_synchronized());
    }

    #[test]
    fn out_of_order_data_fills_specific_gap() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        assert!(proxy.on_data(5)); // fills 1..4 as Missing, 5 as Received
        assert!(proxy.on_data(3)); // fills the gap at 3
        assert!(!proxy.on_data(3)); // duplicate: no longer Missing/Requested

        let decision = proxy.on_heartbeat(1, 5, 1, false);
        match decision {
            AcknackDecision::NeedData { missing, .. } => assert_eq!(missing, vec![1, 2, 4]),
            other => panic!("expected NeedData, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_below_first_sn_marks_lost_not_missing() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        // Writer's history starts at 5: 1..4 will never be sent.
        let decision = proxy.on_heartbeat(5, 7, 1, false);
        match decision {
            AcknackDecision::NeedData { missing, .. } => assert_eq!(missing, vec![5, 6, 7]),
            other => panic!("expected NeedData, got {other:?}"),
        }
    }

    #[test]
    fn gap_submessage_does_not_downgrade_received() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        proxy.on_data(2);
        proxy.on_gap(1..3); // seq 1 lost, seq 2 stays Received
        let decision = proxy.on_heartbeat(1, 2, 1, false);
        assert_eq!(decision, AcknackDecision::Synchronized { base: 3 });
    }

    #[test]
    fn bitmap_base_advances_with_contiguous_receipt() {
        let guid = [0u8; 16];
        let mut proxy = ReliableReaderProxy::new(guid);

        proxy.on_data(1);
        proxy.on_data(2);
        proxy.on_data(3);

        let decision = proxy.on_heartbeat(1, 5, 1, false);
        match decision {
            AcknackDecision::NeedData { base, missing } => {
                assert_eq!(base, 4);
                assert_eq!(missing, vec![4, 5]);
            }
            other => panic!("expected NeedData, got {other:?}"),
        }
    }
}
