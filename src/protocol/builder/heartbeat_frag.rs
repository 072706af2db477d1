// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HEARTBEAT_FRAG packet builder for fragment-level heartbeats.
//!
//! Builds complete RTPS packets with HEARTBEAT_FRAG submessages to announce
//! fragment availability for reliable fragmented data.
//! Per RTPS 2.3 spec Sec.8.3.7.6.

use crate::protocol::constants::RTPS_SUBMSG_HEARTBEAT_FRAG;

/// Build HEARTBEAT_FRAG submessage according to RTPS spec.
///
/// HEARTBEAT_FRAG format (RTPS v2.3 Sec.8.3.7.6):
/// ```text
/// +------------------+
/// | readerEntityId   |  4 bytes (ENTITYID_UNKNOWN for multicast)
/// +------------------+
/// | writerEntityId   |  4 bytes
/// +------------------+
/// | writerSN         |  8 bytes (sequence number of fragmented message)
/// +------------------+
/// | lastFragmentNum  |  4 bytes (last available fragment number, 1-based)
/// +------------------+
/// | count            |  4 bytes (incremented each time)
/// +------------------+
/// ```
///
/// # Arguments
///
/// - `reader_entity_id`: EntityId of the target DataReader (ENTITYID_UNKNOWN for multicast)
/// - `writer_entity_id`: EntityId of the DataWriter sending fragments
/// - `writer_sn`: Sequence number of the fragmented message
/// - `last_fragment_num`: Last fragment number available (1-based)
/// - `count`: Incremented for each HEARTBEAT_FRAG sent
///
/// # Returns
///
/// Complete HEARTBEAT_FRAG submessage bytes including submessage header.
pub fn build_heartbeat_frag_submessage(
    reader_entity_id: [u8; 4],
    writer_entity_id: [u8; 4],
    writer_sn: u64,
    last_fragment_num: u32,
    count: u32,
) -> Vec<u8> {
    // Submessage payload length:
    // readerEntityId(4) + writerEntityId(4) + writerSN(8) + lastFragmentNum(4) + count(4) = 24
    const SUBMSG_LEN: u16 = 24;

    let mut buf = Vec::with_capacity(4 + SUBMSG_LEN as usize);

    // Submessage header
    buf.push(RTPS_SUBMSG_HEARTBEAT_FRAG); // submessageId = 0x13
    buf.push(0x01); // flags: E=1 (little-endian)
    buf.extend_from_slice(&SUBMSG_LEN.to_le_bytes()); // octetsToNextHeader

    // readerEntityId
    buf.extend_from_slice(&reader_entity_id);

    // writerEntityId
    buf.extend_from_slice(&writer_entity_id);

    // writerSN (sequence number as RTPS SequenceNumber_t: high(4) + low(4))
    let sn_high = (writer_sn >> 32) as u32;
    let sn_low = writer_sn as u32;
    buf.extend_from_slice(&sn_high.to_le_bytes());
    buf.extend_from_slice(&sn_low.to_le_bytes());

    // lastFragmentNum (1-based)
    buf.extend_from_slice(&last_fragment_num.to_le_bytes());

    // count
    buf.extend_from_slice(&count.to_le_bytes());

    buf
}

/// Build complete RTPS packet with HEARTBEAT_FRAG submessage.
///
/// # Arguments
///
/// - `our_guid_prefix`: GUID prefix of the writer sending HEARTBEAT_FRAG
/// - `dest_guid_prefix`: GUID prefix of the target reader (or broadcast)
/// - `reader_entity_id`: EntityId of the target DataReader
/// - `writer_entity_id`: EntityId of the DataWriter
/// - `writer_sn`: Sequence number of the fragmented message
/// - `last_fragment_num`: Last fragment number available (1-based)
/// - `count`: HEARTBEAT_FRAG count for duplicate detection
#[allow(clippy::too_many_arguments)]
pub fn build_heartbeat_frag_packet(
    our_guid_prefix: [u8; 12],
    dest_guid_prefix: [u8; 12],
    reader_entity_id: [u8; 4],
    writer_entity_id: [u8; 4],
    writer_sn: u64,
    last_fragment_num: u32,
    count: u32,
) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64);

    // RTPS Header (20 bytes)
    packet.extend_from_slice(b"RTPS");
    packet.extend_from_slice(&[2, 3]); // Version 2.3
    packet.extend_from_slice(&[0x01, 0xaa]); // Vendor ID
    packet.extend_from_slice(&our_guid_prefix);

    // INFO_DST submessage (16 bytes)
    packet.push(0x0e); // submessageId = INFO_DST
    packet.push(0x01); // flags: E=1 (little-endian)
    packet.extend_from_slice(&12u16.to_le_bytes()); // octetsToNextHeader = 12
    packet.extend_from_slice(&dest_guid_prefix);

    // HEARTBEAT_FRAG submessage
    let hb_frag = build_heartbeat_frag_submessage(
        reader_entity_id,
        writer_entity_id,
        writer_sn,
        last_fragment_num,
        count,
    );
    packet.extend_from_slice(&hb_frag);

    packet
}
