// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thin builder facade over the vendor-neutral submessage encoders.
//!
//! Earlier revisions routed submessage construction through a pluggable
//! per-vendor encoder selected at runtime. That indirection added a layer
//! with no remaining caller: every builder in this crate always wants the
//! plain RTPS 2.3 wire format, so `get_encoder()` now just returns a
//! zero-sized handle onto `protocol::rtps::*` directly.

use super::rtps::{self, RtpsEncodeResult};

/// Handle onto the standard RTPS submessage encoders.
///
/// Zero-sized; exists so call sites read as `encoder.build_data(...)`
/// rather than free functions, matching the builder-style call sites in
/// `protocol::builder`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardEncoder;

/// Returns the standard RTPS encoder.
pub fn get_encoder() -> StandardEncoder {
    StandardEncoder
}

impl StandardEncoder {
    pub fn build_data(
        &self,
        reader_id: &[u8; 4],
        writer_id: &[u8; 4],
        sequence: u64,
        payload: &[u8],
        _reserved: Option<()>,
    ) -> RtpsEncodeResult<Vec<u8>> {
        rtps::encode_data(reader_id, writer_id, sequence, payload)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_data_frag(
        &self,
        reader_id: &[u8; 4],
        writer_id: &[u8; 4],
        sequence: u64,
        fragment_starting_num: u32,
        fragments_in_submessage: u16,
        data_size: u32,
        fragment_size: u16,
        payload: &[u8],
    ) -> RtpsEncodeResult<Vec<u8>> {
        rtps::encode_data_frag(
            reader_id,
            writer_id,
            sequence,
            fragment_starting_num,
            fragments_in_submessage,
            data_size,
            fragment_size,
            payload,
        )
    }

    pub fn build_heartbeat(
        &self,
        reader_id: &[u8; 4],
        writer_id: &[u8; 4],
        first_seq: u64,
        last_seq: u64,
        count: u32,
    ) -> RtpsEncodeResult<Vec<u8>> {
        rtps::encode_heartbeat(reader_id, writer_id, first_seq, last_seq, count)
    }

    pub fn build_acknack(
        &self,
        reader_id: &[u8; 4],
        writer_id: &[u8; 4],
        base_sn: u64,
        bitmap: &[u32],
        count: u32,
    ) -> RtpsEncodeResult<Vec<u8>> {
        let num_bits = (bitmap.len() as u32) * 32;
        rtps::encode_acknack_with_count(reader_id, writer_id, base_sn, num_bits, bitmap, count)
    }

    pub fn build_gap(
        &self,
        reader_id: &[u8; 4],
        writer_id: &[u8; 4],
        gap_start: u64,
        gap_list_base: u64,
        gap_bitmap: &[u32],
    ) -> RtpsEncodeResult<Vec<u8>> {
        let num_bits = (gap_bitmap.len() as u32) * 32;
        rtps::encode_gap(
            reader_id,
            writer_id,
            gap_start,
            gap_list_base,
            num_bits,
            gap_bitmap,
        )
    }

    pub fn build_info_dst(&self, guid_prefix: &[u8; 12]) -> Vec<u8> {
        rtps::encode_info_dst(guid_prefix)
    }
}
