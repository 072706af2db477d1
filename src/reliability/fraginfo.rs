// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fragment reassembly context for a single sample sent as DATA_FRAG.
//!
//! One `FragInfo` lives per in-flight fragmented sample. It owns the
//! reassembly buffer and a received-fragment bitmap; it is refcounted so a
//! best-effort reader and a reliable reader path can share ownership while
//! the last fragment hasn't arrived, and it self-destructs on a roughly
//! 2-second reassembly deadline even if more fragments never show up.

use std::time::{Duration, Instant};

/// Default time a partially-reassembled sample is kept before being
/// discarded as unrecoverable.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Reassembly state for one fragmented sample.
pub struct FragInfo {
    seq: u64,
    fragment_size: u32,
    total_size: u32,
    num_fragments: u32,
    received: Vec<bool>,
    buffer: Vec<u8>,
    key: Option<Vec<u8>>,
    refcount: usize,
    deadline: Instant,
}

impl FragInfo {
    /// Starts tracking a new fragmented sample.
    ///
    /// `total_size` is the full (unfragmented) sample length in bytes;
    /// `fragment_size` is the size of every fragment except possibly the
    /// last, which may be shorter.
    pub fn new(seq: u64, total_size: u32, fragment_size: u32, key: Option<Vec<u8>>) -> Self {
        assert!(fragment_size > 0, "fragment_size must be positive");
        let num_fragments = total_size.div_ceil(fragment_size).max(1);
        Self {
            seq,
            fragment_size,
            total_size,
            num_fragments,
            received: vec![false; num_fragments as usize],
            buffer: vec![0u8; total_size as usize],
            key,
            refcount: 1,
            deadline: Instant::now() + DEFAULT_REASSEMBLY_TIMEOUT,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn num_fragments(&self) -> u32 {
        self.num_fragments
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Copies one fragment's payload into the reassembly buffer.
    ///
    /// `starting_fragment` is 0-based (wire `fragmentStartingNum` is
    /// 1-based; callers must subtract 1 before calling). Returns `true`
    /// once every fragment has been received.
    ///
    /// Returns `false` if `starting_fragment` is out of range or `data`
    /// doesn't match the expected fragment length -- callers should treat
    /// that as a malformed submessage and drop it, not panic.
    pub fn receive_fragment(&mut self, starting_fragment: u32, data: &[u8]) -> bool {
        let idx = starting_fragment as usize;
        if idx >= self.received.len() {
            return false;
        }
        let offset = starting_fragment as u64 * self.fragment_size as u64;
        let is_last = idx + 1 == self.received.len();
        let expected_len = if is_last {
            self.total_size as u64 - offset
        } else {
            self.fragment_size as u64
        };
        if data.len() as u64 != expected_len {
            return false;
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > self.buffer.len() {
            return false;
        }
        self.buffer[start..end].copy_from_slice(data);
        self.received[idx] = true;
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|r| *r)
    }

    /// Consumes the reassembled payload. Callers must check
    /// [`is_complete`](Self::is_complete) first.
    pub fn into_payload(self) -> Vec<u8> {
        self.buffer
    }

    pub fn missing_fragments(&self) -> Vec<u32> {
        self.received
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (!r).then_some(i as u32))
            .collect()
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn retain(&mut self) {
        self.refcount += 1;
    }

    /// Decrements the refcount, returning `true` once it reaches zero and
    /// this `FragInfo` should be destroyed.
    pub fn release(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn touch(&mut self, now: Instant) {
        self.deadline = now + DEFAULT_REASSEMBLY_TIMEOUT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_exact_multiple() {
        let mut f = FragInfo::new(1, 20, 10, None);
        assert_eq!(f.num_fragments(), 2);
        assert!(!f.receive_fragment(0, &[1u8; 10]));
        assert!(f.receive_fragment(1, &[2u8; 10]));
        let payload = f.into_payload();
        assert_eq!(&payload[0..10], &[1u8; 10]);
        assert_eq!(&payload[10..20], &[2u8; 10]);
    }

    #[test]
    fn last_fragment_may_be_shorter() {
        let mut f = FragInfo::new(1, 25, 10, None);
        assert_eq!(f.num_fragments(), 3);
        assert!(!f.receive_fragment(0, &[1u8; 10]));
        assert!(!f.receive_fragment(1, &[2u8; 10]));
        assert!(f.receive_fragment(2, &[3u8; 5]));
        assert!(f.is_complete());
    }

    #[test]
    fn wrong_length_fragment_rejected() {
        let mut f = FragInfo::new(1, 25, 10, None);
        assert!(!f.receive_fragment(2, &[3u8; 10]));
        assert!(!f.is_complete());
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut f = FragInfo::new(1, 20, 10, None);
        assert!(!f.receive_fragment(5, &[0u8; 10]));
    }

    #[test]
    fn missing_fragments_reports_unreceived() {
        let mut f = FragInfo::new(1, 30, 10, None);
        f.receive_fragment(1, &[0u8; 10]);
        assert_eq!(f.missing_fragments(), vec![0, 2]);
    }

    #[test]
    fn refcount_destroys_at_zero() {
        let mut f = FragInfo::new(1, 10, 10, None);
        f.retain();
        assert_eq!(f.refcount(), 2);
        assert!(!f.release());
        assert!(f.release());
    }

    #[test]
    fn expiry_follows_deadline() {
        let f = FragInfo::new(1, 10, 10, None);
        assert!(!f.is_expired(Instant::now()));
        assert!(f.is_expired(Instant::now() + DEFAULT_REASSEMBLY_TIMEOUT + Duration::from_millis(1)));
    }
}
