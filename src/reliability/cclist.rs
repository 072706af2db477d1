// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-proxy change-coverage list (CCList).
//!
//! Tracks, for a single matched reader (writer side) or a single matched
//! writer (reader side), the per-sequence-number state of every change the
//! proxy has ever been told about. A CCList is a contiguous run of entries
//! starting at some base sequence number: each entry is either a `Relevant`
//! change still under tracking, or a `Gap` covering a contiguous run of
//! sequence numbers that were removed/irrelevant before this proxy ever saw
//! them (directed writes to another reader, disposed instances, etc).
//!
//! Two adjacent `Gap` entries are always merged if they carry the same
//! state, so the list never grows unboundedly from repeated single-sequence
//! gaps; `debug_assert_invariants` checks this along with strict
//! monotonicity and full coverage (no holes between entries).

use std::ops::Range;

/// Per-(writer, reader) change state tracked by a writer's CCList.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterEntryState {
    /// Produced by the local writer, not yet offered to this reader.
    New,
    /// Offered (a HEARTBEAT/DATA has announced it) but not yet sent.
    Unsent,
    /// Currently being transmitted.
    Underway,
    /// Sent, awaiting acknowledgment.
    Unacked,
    /// Acknowledged by the reader's ACKNACK.
    Acked,
    /// Explicitly requested for retransmission by an ACKNACK bitmap bit.
    Requested,
}

/// Per-(reader, writer) change state tracked by a reader's CCList.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEntryState {
    /// Announced by a HEARTBEAT/GAP but not yet received.
    Missing,
    /// Asked for via ACKNACK and awaiting delivery.
    Requested,
    /// Payload received and delivered to the history cache.
    Received,
    /// Declared lost by a GAP submessage; will never arrive.
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CcEntry<S> {
    Relevant { seq: u64, state: S },
    Gap { range: Range<u64>, state: S },
}

impl<S> CcEntry<S> {
    fn start(&self) -> u64 {
        match self {
            CcEntry::Relevant { seq, .. } => *seq,
            CcEntry::Gap { range, .. } => range.start,
        }
    }

    fn end(&self) -> u64 {
        match self {
            CcEntry::Relevant { seq, .. } => seq + 1,
            CcEntry::Gap { range, .. } => range.end,
        }
    }
}

/// A contiguous, ordered run of per-sequence entries for one matched proxy.
///
/// `base` is the first sequence number this list is responsible for; an
/// empty list covers nothing and the next insertion must start at `base`.
#[derive(Debug, Clone)]
pub struct CcList<S> {
    base: u64,
    next_seq: u64,
    entries: Vec<CcEntry<S>>,
}

impl<S: Copy + PartialEq> CcList<S> {
    /// Creates an empty list starting coverage at `base`.
    pub fn new(base: u64) -> Self {
        Self {
            base,
            next_seq: base,
            entries: Vec::new(),
        }
    }

    /// First sequence number this list is responsible for.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the highest sequence number covered so far.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Highest sequence number covered, or `None` if the list is empty.
    pub fn highest_seq(&self) -> Option<u64> {
        (self.next_seq > self.base).then(|| self.next_seq - 1)
    }

    /// Total entry count, relevant changes and gaps alike ("nchanges", spec
    /// Sec.3 CCList invariant 3).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of `Relevant` entries currently tracked, excluding gaps.
    pub fn relevant_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, CcEntry::Relevant { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the next relevant change, in state `state`.
    ///
    /// Panics if `seq` is not exactly `self.next_seq()` -- callers must
    /// extend a CCList strictly in sequence order, inserting gaps for any
    /// skipped sequence numbers first via [`push_gap`](Self::push_gap).
    pub fn push_relevant(&mut self, seq: u64, state: S) {
        assert_eq!(seq, self.next_seq, "CCList coverage must stay contiguous");
        self.entries.push(CcEntry::Relevant { seq, state });
        self.next_seq += 1;
    }

    /// Appends a gap covering `range`, merging into the previous entry if
    /// it is also a gap in the same state.
    pub fn push_gap(&mut self, range: Range<u64>, state: S) {
        assert!(!range.is_empty(), "gap range must be non-empty");
        assert_eq!(range.start, self.next_seq, "CCList coverage must stay contiguous");
        match self.entries.last_mut() {
            Some(CcEntry::Gap {
                range: prev_range,
                state: prev_state,
            }) if *prev_state == state => {
                prev_range.end = range.end;
            }
            _ => self.entries.push(CcEntry::Gap { range: range.clone(), state }),
        }
        self.next_seq = range.end;
    }

    /// Looks up the state of a relevant entry by sequence number.
    pub fn state_at(&self, seq: u64) -> Option<S> {
        self.entries.iter().find_map(|e| match e {
            CcEntry::Relevant { seq: s, state } if *s == seq => Some(*state),
            _ => None,
        })
    }

    /// Returns true if `seq` falls inside a gap entry (irrelevant change).
    pub fn is_gap(&self, seq: u64) -> bool {
        self.entries.iter().any(|e| match e {
            CcEntry::Gap { range, .. } => range.contains(&seq),
            _ => false,
        })
    }

    /// Updates the state of an existing relevant entry. Returns `false`
    /// (without effect) if `seq` names a gap or a sequence never covered.
    pub fn set_state(&mut self, seq: u64, state: S) -> bool {
        for e in &mut self.entries {
            if let CcEntry::Relevant { seq: s, state: st } = e {
                if *s == seq {
                    *st = state;
                    return true;
                }
            }
        }
        false
    }

    /// Iterates relevant entries in sequence order.
    pub fn iter_relevant(&self) -> impl Iterator<Item = (u64, S)> + '_ {
        self.entries.iter().filter_map(|e| match e {
            CcEntry::Relevant { seq, state } => Some((*seq, *state)),
            _ => None,
        })
    }

    /// Returns all relevant sequence numbers currently in `state`.
    pub fn sequences_in_state(&self, state: S) -> Vec<u64> {
        self.iter_relevant()
            .filter(|(_, s)| *s == state)
            .map(|(seq, _)| seq)
            .collect()
    }

    /// Returns the gap ranges currently recorded, in order.
    pub fn gap_ranges(&self) -> Vec<Range<u64>> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                CcEntry::Gap { range, .. } => Some(range.clone()),
                _ => None,
            })
            .collect()
    }

    /// Checks the structural invariants: strictly increasing, contiguous
    /// coverage, and no two adjacent gap entries sharing a state (which
    /// `push_gap` should have already merged).
    #[cfg(debug_assertions)]
    pub fn debug_assert_invariants(&self) {
        let mut expected = self.base;
        let mut prev_was_gap_state: Option<(bool, ())> = None;
        let _ = prev_was_gap_state;
        let mut prev_gap_end_state: Option<bool> = None;
        for e in &self.entries {
            assert_eq!(e.start(), expected, "CCList must have no coverage holes");
            expected = e.end();
            match e {
                CcEntry::Gap { .. } => {
                    if let Some(true) = prev_gap_end_state {
                        panic!("adjacent gap entries with the same state must be merged");
                    }
                    prev_gap_end_state = Some(true);
                }
                CcEntry::Relevant { .. } => prev_gap_end_state = Some(false),
            }
        }
        assert_eq!(expected, self.next_seq, "coverage must reach next_seq");
    }

    #[cfg(not(debug_assertions))]
    pub fn debug_assert_invariants(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_insertion_tracks_len() {
        let mut cc: CcList<WriterEntryState> = CcList::new(1);
        cc.push_relevant(1, WriterEntryState::Unacked);
        cc.push_relevant(2, WriterEntryState::Unacked);
        cc.push_relevant(3, WriterEntryState::Unacked);
        assert_eq!(cc.len(), 3);
        assert_eq!(cc.highest_seq(), Some(3));
        cc.debug_assert_invariants();
    }

    #[test]
    fn gap_then_relevant_is_contiguous() {
        let mut cc: CcList<ReaderEntryState> = CcList::new(1);
        cc.push_gap(1..4, ReaderEntryState::Lost);
        cc.push_relevant(4, ReaderEntryState::Received);
        assert!(cc.is_gap(2));
        assert!(!cc.is_gap(4));
        assert_eq!(cc.state_at(4), Some(ReaderEntryState::Received));
        cc.debug_assert_invariants();
    }

    #[test]
    fn adjacent_same_state_gaps_merge() {
        let mut cc: CcList<ReaderEntryState> = CcList::new(1);
        cc.push_gap(1..3, ReaderEntryState::Lost);
        cc.push_gap(3..5, ReaderEntryState::Lost);
        assert_eq!(cc.gap_ranges(), vec![1..5]);
        cc.debug_assert_invariants();
    }

    #[test]
    fn set_state_updates_relevant_only() {
        let mut cc: CcList<WriterEntryState> = CcList::new(1);
        cc.push_relevant(1, WriterEntryState::Unacked);
        cc.push_gap(2..3, WriterEntryState::Acked);
        assert!(cc.set_state(1, WriterEntryState::Requested));
        assert_eq!(cc.state_at(1), Some(WriterEntryState::Requested));
        assert!(!cc.set_state(2, WriterEntryState::Requested));
    }

    #[test]
    fn sequences_in_state_filters() {
        let mut cc: CcList<WriterEntryState> = CcList::new(1);
        cc.push_relevant(1, WriterEntryState::Unacked);
        cc.push_relevant(2, WriterEntryState::Acked);
        cc.push_relevant(3, WriterEntryState::Unacked);
        assert_eq!(cc.sequences_in_state(WriterEntryState::Unacked), vec![1, 3]);
    }

    #[test]
    #[should_panic(expected = "contiguous")]
    fn non_contiguous_insert_panics() {
        let mut cc: CcList<WriterEntryState> = CcList::new(1);
        cc.push_relevant(1, WriterEntryState::Unacked);
        cc.push_relevant(3, WriterEntryState::Unacked);
    }

    /// Writer published 1..5, cache evicted 2 and 4: a durable late-joining
    /// reader's initial snapshot must name exactly those two single-entry
    /// gaps, neither coalesced with its neighbor (they aren't adjacent).
    #[test]
    fn late_joiner_snapshot_names_exact_evicted_gaps() {
        let mut cc: CcList<ReaderEntryState> = CcList::new(1);
        cc.push_relevant(1, ReaderEntryState::Received);
        cc.push_gap(2..3, ReaderEntryState::Lost);
        cc.push_relevant(3, ReaderEntryState::Received);
        cc.push_gap(4..5, ReaderEntryState::Lost);
        cc.push_relevant(5, ReaderEntryState::Received);

        assert_eq!(cc.len(), 5);
        assert_eq!(cc.gap_ranges(), vec![2..3, 4..5]);
        assert_eq!(
            cc.iter_relevant().map(|(seq, _)| seq).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        cc.debug_assert_invariants();
    }
}
