// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateless Best-Effort (SL-BE, spec Sec.4.2) and Stateful Best-Effort
//! (SF-BE, spec Sec.4.3) Writer state.
//!
//! Neither variant tracks acknowledgment. SL-BE has no per-reader state at
//! all beyond a shared locator list and resends its whole change list on a
//! timer (used by builtin discovery writers); SF-BE has a per-reader change
//! list but removes each entry immediately after it is sent once -- no
//! resends, no NACK handling. Both are far simpler than [`super::SfRelWriterProxy`]
//! because best-effort delivery accepts sample loss by design.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Stateless Best-Effort Writer endpoint (RTPS Sec.8.4.8, spec Sec.4.2).
///
/// Used by builtin discovery writers (SPDP/SEDP): a single change list fans
/// out to every attached reader locator with no per-reader bookkeeping. When
/// `durability_transient` is set, sent changes are kept (state `UNDERWAY`)
/// so [`resend`](Self::resend) can replay them to late joiners or a
/// rediscovered participant; otherwise each change is forgotten right after
/// its first send.
pub struct StatelessWriterEndpoint {
    locators: Mutex<Vec<SocketAddr>>,
    unsent: Mutex<VecDeque<u64>>,
    /// Populated only when `durability_transient`, for replay via `resend`/`alive`.
    durable_changes: Mutex<Vec<u64>>,
    durability_transient: bool,
    resend_attempts: AtomicU32,
    /// Retries above this count fall back to the caller's normal resend
    /// period rather than the shorter retry interval (spec Sec.4.2 `resend`).
    resend_retry_cap: u32,
}

impl StatelessWriterEndpoint {
    pub fn new(durability_transient: bool, resend_retry_cap: u32) -> Self {
        Self {
            locators: Mutex::new(Vec::new()),
            unsent: Mutex::new(VecDeque::new()),
            durable_changes: Mutex::new(Vec::new()),
            durability_transient,
            resend_attempts: AtomicU32::new(0),
            resend_retry_cap,
        }
    }

    pub fn add_locator(&self, addr: SocketAddr) {
        let mut locators = self.locators.lock();
        if !locators.contains(&addr) {
            locators.push(addr);
        }
    }

    pub fn locators(&self) -> Vec<SocketAddr> {
        self.locators.lock().clone()
    }

    /// `new_change(change)`: append an `UNSENT` entry, activating the proxy
    /// for every attached locator (spec Sec.4.2).
    pub fn new_change(&self, seq: u64) {
        self.unsent.lock().push_back(seq);
        if self.durability_transient {
            self.durable_changes.lock().push(seq);
        }
    }

    /// `send()`: drains every `UNSENT` sequence number for the caller to
    /// emit as `DATA` to each attached locator. Non-durable changes are
    /// forgotten once drained; durable ones stay in `durable_changes` for
    /// later resend.
    pub fn send(&self) -> Vec<u64> {
        self.unsent.lock().drain(..).collect()
    }

    /// `resend()`: re-marks every durable change `UNSENT` so the next
    /// `send()` retransmits the whole history. Retries are capped at
    /// `resend_retry_cap` before the caller should fall back from the
    /// short retry interval to the normal resend period (spec Sec.4.2).
    ///
    /// Returns `true` while still within the capped short-interval retry
    /// budget, `false` once the caller should switch to the normal period.
    pub fn resend(&self) -> bool {
        let changes = self.durable_changes.lock().clone();
        self.unsent.lock().extend(changes);
        let attempt = self.resend_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        attempt <= self.resend_retry_cap
    }

    /// `alive(prefix)`: a rediscovered participant causes every durable
    /// change to be re-announced (spec Sec.4.2). Resets the retry budget
    /// the same way a fresh match would.
    pub fn alive(&self) {
        self.resend_attempts.store(0, Ordering::Relaxed);
        let changes = self.durable_changes.lock().clone();
        self.unsent.lock().extend(changes);
    }

    pub fn pending_count(&self) -> usize {
        self.unsent.lock().len()
    }
}

/// Stateful Best-Effort Writer per-reader state (RTPS Sec.8.4.8, spec
/// Sec.4.3). Same send path as [`StatelessWriterEndpoint`] but scoped to one
/// matched reader and never durable -- entries are removed the instant they
/// are sent.
pub struct SfBeWriterProxy {
    reader_guid: [u8; 16],
    unicast_addr: Mutex<SocketAddr>,
    unsent: Mutex<VecDeque<u64>>,
}

impl SfBeWriterProxy {
    pub fn new(reader_guid: [u8; 16], unicast_addr: SocketAddr) -> Self {
        Self {
            reader_guid,
            unicast_addr: Mutex::new(unicast_addr),
            unsent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn reader_guid(&self) -> &[u8; 16] {
        &self.reader_guid
    }

    pub fn unicast_addr(&self) -> SocketAddr {
        *self.unicast_addr.lock()
    }

    pub fn set_unicast_addr(&self, addr: SocketAddr) {
        *self.unicast_addr.lock() = addr;
    }

    /// Announces a newly-written change in `UNSENT` state.
    pub fn new_change(&self, seq: u64) {
        self.unsent.lock().push_back(seq);
    }

    /// Drains every pending sequence number for immediate, one-shot send.
    /// No resend, no ACK tracking: once drained an entry is gone for good.
    pub fn send(&self) -> Vec<u64> {
        self.unsent.lock().drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.unsent.lock().len()
    }
}

/// Thread-safe registry of [`SfBeWriterProxy`] instances for a stateful
/// best-effort Writer endpoint.
#[derive(Clone)]
pub struct BestEffortWritersRegistry {
    proxies: Arc<DashMap<[u8; 16], SfBeWriterProxy>>,
}

impl Default for BestEffortWritersRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BestEffortWritersRegistry {
    pub fn new() -> Self {
        Self {
            proxies: Arc::new(DashMap::new()),
        }
    }

    pub fn add_reader(&self, reader_guid: [u8; 16], unicast_addr: SocketAddr) {
        self.proxies
            .entry(reader_guid)
            .and_modify(|p| p.set_unicast_addr(unicast_addr))
            .or_insert_with(|| SfBeWriterProxy::new(reader_guid, unicast_addr));
    }

    /// Announce a newly-written change to every matched reader.
    pub fn new_change(&self, seq: u64) {
        for proxy in self.proxies.iter() {
            proxy.new_change(seq);
        }
    }

    /// Drain pending sends for one reader.
    pub fn send(&self, reader_guid: &[u8; 16]) -> Vec<u64> {
        self.proxies
            .get(reader_guid)
            .map(|p| p.send())
            .unwrap_or_default()
    }

    pub fn remove(&self, reader_guid: &[u8; 16]) -> bool {
        self.proxies.remove(reader_guid).is_some()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
