// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound datagram routing and transmit-side wake coordination.
//!
//! # Architecture
//!
//! ```text
//! socket.recv() -> Dispatcher::on_datagram(&bytes)
//!       v
//! protocol::submessage::decode_submessages() -> Vec<DecodedSubmessage>
//!       v
//! per submessage: locate endpoint by {src GUID, remote entity id, local entity id}
//!       v
//! core::writer::MatchedReadersRegistry::on_acknack/on_nack_frag  (ACKNACK/NACK_FRAG -> writer)
//! core::reader::ReaderProxyRegistry::on_heartbeat/on_data/on_data_frag/on_heartbeat_frag (-> reader)
//!       v
//! ActiveProxyQueue::activate() -> transmit loop pop()s proxies with pending work
//! ```
//!
//! # Components
//!
//! - [`Dispatcher`]: locates and invokes the reliability state machine for
//!   each inbound submessage; never blocks, never sends.
//! - [`ActiveProxyQueue`]: FIFO of proxies with outbound work pending, shared
//!   between the dispatcher (producer) and the transmit loop (consumer).
//! - [`WakeNotifier`]: lock-free-fast-path wake signal for a transmit thread
//!   that would otherwise poll the active queue.

pub mod active_queue;
pub mod dispatcher;
pub mod wake;

pub use active_queue::{ActiveProxyQueue, ProxyId, ProxyKind};
pub use dispatcher::{DispatchEvent, DispatchReport, Dispatcher, ReceiverContext, ENTITYID_UNKNOWN};
pub use wake::WakeNotifier;
