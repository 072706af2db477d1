// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rtps-reliable
//!
//! An RTPS (Real-Time Publish-Subscribe) wire-protocol reliability engine:
//! the per-endpoint state machines that sit between a DDS history cache and
//! an unreliable datagram transport.
//!
//! This crate implements the hard middle of an RTPS stack -- stateless and
//! stateful writer/reader state machines, the submessage codec, per-peer
//! change lists with gap/fragment bookkeeping, and the dispatcher that ties
//! receive and transmit together -- without owning the history cache, CDR
//! (de)serialization, discovery, transport I/O, or the DCPS application API.
//! Those are external collaborators reached through the narrow interfaces
//! described in each module's documentation.
//!
//! ## Architecture
//!
//! ```text
//!   Application --write/dispose--> HC --notify--> Writer SM --emit--> Msg Builder --> Transport
//!                                   ^                                                     |
//!                                   |                                                     v
//!   Application <--notify--       HC  <--deliver-- Reader SM <--parse-- Msg Parser <-- Transport
//!                                                     ^
//!                                                     +-- Timer scheduler (HB, NACK-rsp, reassembly)
//! ```
//!
//! ## Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`protocol`] | RTPS wire format: constants, CDR encapsulation, submessage builders/parsers |
//! | [`reliability`] | Reliability protocol primitives: change lists, fragment reassembly, sequence arithmetic, messages |
//! | [`core`] | Per-endpoint state machines (writer/reader proxies) and runtime pools (slab allocator, index ring) |
//! | [`engine`] | Dispatcher: locates the destination endpoint for an inbound datagram, and the active-proxy transmit queue |
//! | [`config`] | Compile-time protocol constants plus the runtime-overridable parameter table |
//! | [`error`] | Recoverable error taxonomy shared across the parse/admit/reassemble paths |
//! | [`logging`] | Zero-cost-when-disabled structured logging macros |
//!
//! This crate carries no background threads of its own. The host process
//! drives [`engine::Dispatcher::on_datagram`] from its receive loop, drains
//! [`engine::ActiveProxyQueue`] from its transmit loop, and calls into the
//! endpoint proxies' timer hooks from its own timer thread.

/// Per-endpoint state machines (writer/reader proxies) and shared runtime pools.
pub mod core;
/// Dispatcher and active-proxy transmit queue tying receive and transmit together.
pub mod engine;

/// Compile-time protocol constants plus the runtime-overridable parameter table.
pub mod config;
/// Recoverable error taxonomy shared across the parse/admit/reassemble paths.
pub mod error;
/// Zero-cost-when-disabled structured logging macros.
pub mod logging;
/// RTPS wire format: constants, CDR encapsulation, submessage builders/parsers.
pub mod protocol;
/// Reliability protocol primitives: change lists, fragment reassembly, sequence
/// arithmetic, and reader/writer message handlers.
pub mod reliability;

pub use error::{Error, Result};
