// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy active-queue (RTPS Sec.8.4.7 transmit coordination).
//!
//! A proxy with pending outbound submessages links itself into this queue;
//! the host's transmit loop drains it, sends each proxy's buffered
//! submessages, and unlinks it. `activate()` is idempotent -- a proxy
//! already linked in stays at its current queue position. `wait_inactive()`
//! blocks until a proxy is unlinked, for use on the endpoint-deletion path
//! so teardown never races an in-flight transmit.
//!
//! Proxies in this crate are registry-owned values (`DashMap<Guid, Proxy>`)
//! rather than arena slots with a stable index, so the "is_queued" flag the
//! design calls for is modeled here as a membership set guarded by the same
//! lock as the queue, instead of an atomic living on the proxy itself.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Which side of an endpoint pair a proxy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// A remote reader as seen from a local writer (`SfRelWriterProxy`).
    Writer,
    /// A remote writer as seen from a local reader (`ReliableReaderProxy`).
    Reader,
}

/// Identifies one proxy: which side it belongs to, the local endpoint it is
/// attached to, and the remote peer's GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId {
    pub kind: ProxyKind,
    pub local_entity_id: [u8; 4],
    pub remote_guid: [u8; 16],
}

impl ProxyId {
    pub fn writer(local_entity_id: [u8; 4], remote_reader_guid: [u8; 16]) -> Self {
        Self {
            kind: ProxyKind::Writer,
            local_entity_id,
            remote_guid: remote_reader_guid,
        }
    }

    pub fn reader(local_entity_id: [u8; 4], remote_writer_guid: [u8; 16]) -> Self {
        Self {
            kind: ProxyKind::Reader,
            local_entity_id,
            remote_guid: remote_writer_guid,
        }
    }
}

struct State {
    queue: VecDeque<ProxyId>,
    queued: HashSet<ProxyId>,
}

/// FIFO of proxies with outbound work pending, with idempotent activation
/// and a blocking wait for "this proxy has been fully drained".
pub struct ActiveProxyQueue {
    state: Mutex<State>,
    condvar: Condvar,
}

impl ActiveProxyQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                queued: HashSet::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Link a proxy into the active queue. No-op if already linked.
    pub fn activate(&self, id: ProxyId) {
        let mut state = self.state.lock();
        if state.queued.insert(id) {
            state.queue.push_back(id);
        }
    }

    /// Pop the next proxy for the transmit loop to drain, unlinking it.
    pub fn pop(&self) -> Option<ProxyId> {
        let mut state = self.state.lock();
        let id = state.queue.pop_front();
        if let Some(id) = id {
            state.queued.remove(&id);
        }
        drop(state);
        if id.is_some() {
            self.condvar.notify_all();
        }
        id
    }

    /// Drain every currently-queued proxy at once, unlinking all of them.
    /// Preserves queue order.
    pub fn drain(&self) -> Vec<ProxyId> {
        let mut state = self.state.lock();
        let drained: Vec<ProxyId> = state.queue.drain(..).collect();
        for id in &drained {
            state.queued.remove(id);
        }
        drop(state);
        if !drained.is_empty() {
            self.condvar.notify_all();
        }
        drained
    }

    /// Whether a proxy is currently linked in.
    pub fn is_active(&self, id: &ProxyId) -> bool {
        self.state.lock().queued.contains(id)
    }

    /// Number of proxies currently linked in.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until `id` is no longer linked into the queue. Called from the
    /// endpoint-deletion path so teardown never races an in-flight drain.
    pub fn wait_inactive(&self, id: ProxyId) {
        let mut state = self.state.lock();
        while state.queued.contains(&id) {
            self.condvar.wait(&mut state);
        }
    }

    /// Bounded variant of [`Self::wait_inactive`]. Returns `true` if the
    /// proxy became inactive before the deadline, `false` on timeout.
    pub fn wait_inactive_timeout(&self, id: ProxyId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.queued.contains(&id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.condvar.wait_for(&mut state, remaining);
            if result.timed_out() && state.queued.contains(&id) {
                return false;
            }
        }
        true
    }
}

impl Default for ActiveProxyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pid(remote: u8) -> ProxyId {
        ProxyId::writer([0, 0, 1, 0x02], [remote; 16])
    }

    #[test]
    fn activate_is_idempotent() {
        let queue = ActiveProxyQueue::new();
        let id = pid(1);

        queue.activate(id);
        queue.activate(id);
        queue.activate(id);

        assert_eq!(queue.len(), 1);
        assert!(queue.is_active(&id));
    }

    #[test]
    fn pop_preserves_fifo_order() {
        let queue = ActiveProxyQueue::new();
        queue.activate(pid(1));
        queue.activate(pid(2));
        queue.activate(pid(3));

        assert_eq!(queue.pop(), Some(pid(1)));
        assert_eq!(queue.pop(), Some(pid(2)));
        assert_eq!(queue.pop(), Some(pid(3)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn drain_empties_the_queue_in_order() {
        let queue = ActiveProxyQueue::new();
        queue.activate(pid(1));
        queue.activate(pid(2));

        let drained = queue.drain();
        assert_eq!(drained, vec![pid(1), pid(2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn wait_inactive_returns_immediately_when_never_queued() {
        let queue = ActiveProxyQueue::new();
        queue.wait_inactive(pid(9));
    }

    #[test]
    fn wait_inactive_unblocks_when_proxy_is_popped() {
        let queue = Arc::new(ActiveProxyQueue::new());
        let id = pid(5);
        queue.activate(id);

        let waiter_queue = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            waiter_queue.wait_inactive(id);
        });

        thread::sleep(Duration::from_millis(10));
        assert_eq!(queue.pop(), Some(id));

        handle.join().expect("waiter thread should complete");
    }

    #[test]
    fn wait_inactive_timeout_expires_while_still_queued() {
        let queue = ActiveProxyQueue::new();
        let id = pid(7);
        queue.activate(id);

        let woke = queue.wait_inactive_timeout(id, Duration::from_millis(20));
        assert!(!woke);
    }

    #[test]
    fn reader_and_writer_proxy_ids_with_same_guid_are_distinct() {
        let writer_id = ProxyId::writer([0, 0, 1, 0x02], [1u8; 16]);
        let reader_id = ProxyId::reader([0, 0, 1, 0x02], [1u8; 16]);
        assert_ne!(writer_id, reader_id);
    }
}
