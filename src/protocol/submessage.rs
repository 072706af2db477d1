// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound submessage classifier.
//!
//! `protocol::rtps` only ever builds outbound wire bytes -- there is no
//! general parser there for an arbitrary inbound datagram.
//! This module walks a raw RTPS message left to right and turns each
//! submessage into one arm of [`Submessage`], a tagged sum type standing in
//! for the wire's own tagged-union encoding (RTPS submessage id + flags).
//!
//! Only the little-endian wire representation is decoded: every encoder in
//! this crate emits `flags bit0 = 1` (little-endian), and no big-endian peer
//! has ever been exercised against it, so a submessage whose endian bit is
//! clear is reported as [`crate::Error::InvalidSubmsg`] rather than
//! byte-swapped on a guess.
//!
//! `DATA`/`DATA_FRAG` carry their inline QoS and serialized payload as opaque
//! bytes: this crate does not own CDR (de)serialization, so the dispatcher
//! forwards that slice to the history cache unexamined.

use crate::error::Error;
use crate::reliability::{EntityId, GapMsg, GuidPrefix, InfoDstMsg, InfoTsMsg, SequenceNumberSet};

use super::constants::*;

/// Parsed 20-byte RTPS message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpsHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl RtpsHeader {
    /// Parse the fixed RTPS message header at the start of `datagram`.
    pub fn parse(datagram: &[u8]) -> Result<Self, Error> {
        if datagram.len() < RTPS_HEADER_SIZE {
            return Err(Error::TooShort {
                submsg_id: 0,
                expected: RTPS_HEADER_SIZE,
                actual: datagram.len(),
            });
        }
        if &datagram[0..4] != RTPS_MAGIC.as_slice() {
            return Err(Error::InvalidSubmsg {
                submsg_id: 0,
                reason: "missing RTPS magic",
            });
        }

        let mut guid_prefix = [0u8; RTPS_GUID_PREFIX_SIZE];
        guid_prefix.copy_from_slice(&datagram[8..20]);

        Ok(Self {
            version_major: datagram[4],
            version_minor: datagram[5],
            vendor_id: [datagram[6], datagram[7]],
            guid_prefix,
        })
    }
}

/// One decoded RTPS submessage.
///
/// Stands in for the wire's tagged union of submessage kinds (§9 "tagged
/// submessages / unions -> Rust sum types").
#[derive(Debug, Clone, PartialEq)]
pub enum Submessage {
    Pad,
    AckNack {
        reader_id: EntityId,
        writer_id: EntityId,
        reader_sn_state: SequenceNumberSet,
        count: u32,
        final_flag: bool,
    },
    Heartbeat {
        reader_id: EntityId,
        writer_id: EntityId,
        first_sn: u64,
        last_sn: u64,
        count: u32,
        final_flag: bool,
        liveliness_flag: bool,
    },
    HeartbeatFrag {
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: u64,
        last_fragment_num: u32,
        count: u32,
    },
    Gap(GapMsg),
    NackFrag {
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: u64,
        frag_base: u32,
        frag_num_bits: u32,
        frag_bitmap: Vec<u32>,
        count: u32,
    },
    Data {
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: u64,
        /// Inline QoS (if present) followed by the serialized payload,
        /// exactly as received -- opaque to this crate.
        body: Vec<u8>,
    },
    DataFrag {
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: u64,
        fragment_starting_num: u32,
        fragments_in_submessage: u16,
        fragment_size: u16,
        sample_size: u32,
        body: Vec<u8>,
    },
    InfoTs(InfoTsMsg),
    InfoDst(InfoDstMsg),
    InfoSrc {
        version_major: u8,
        version_minor: u8,
        vendor_id: [u8; 2],
        guid_prefix: GuidPrefix,
    },
    InfoReply {
        raw: Vec<u8>,
    },
    /// Unrecognized or vendor-specific submessage id: skipped, not an error.
    Unknown { id: u8, flags: u8, len: usize },
}

/// A submessage together with the header byte offset it was parsed from,
/// for diagnostics.
#[derive(Debug, Clone)]
pub struct DecodedSubmessage {
    pub offset: usize,
    pub id: u8,
    pub flags: u8,
    pub result: Result<Submessage, Error>,
}

fn u32_from_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn u64_seq_from_le(buf: &[u8]) -> u64 {
    // RTPS SequenceNumber_t: high i32, low u32, both little-endian on the
    // wire when the submessage's own endian bit selects LE.
    let high = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let low = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    (((high as i64) << 32) | (low as i64)) as u64
}

fn decode_sequence_number_set(buf: &[u8]) -> Option<(SequenceNumberSet, usize)> {
    if buf.len() < 8 + 4 {
        return None;
    }
    let base = i64::from_le_bytes(buf[0..8].try_into().ok()?);
    let num_bits = u32_from_le(&buf[8..12]);
    if num_bits > SequenceNumberSet::MAX_BITS {
        return None;
    }
    let word_count = SequenceNumberSet::word_count_for_bits(num_bits);
    let bitmap_end = 12 + word_count * 4;
    if buf.len() < bitmap_end {
        return None;
    }
    let mut words = Vec::with_capacity(word_count);
    for w in 0..word_count {
        words.push(u32_from_le(&buf[12 + w * 4..16 + w * 4]));
    }
    let set = SequenceNumberSet::from_raw(base, num_bits, &words)?;
    Some((set, bitmap_end))
}

fn decode_acknack(payload: &[u8], flags: u8, count_hint_id: u8) -> Result<Submessage, Error> {
    if payload.len() < 8 + 12 {
        return Err(Error::TooShort {
            submsg_id: count_hint_id,
            expected: 8 + 12 + 4,
            actual: payload.len(),
        });
    }
    let reader_id: EntityId = payload[0..4].try_into().unwrap();
    let writer_id: EntityId = payload[4..8].try_into().unwrap();
    let (reader_sn_state, consumed) =
        decode_sequence_number_set(&payload[8..]).ok_or(Error::InvalidSubmsg {
            submsg_id: count_hint_id,
            reason: "malformed SequenceNumberSet in ACKNACK",
        })?;
    let count_off = 8 + consumed;
    if payload.len() < count_off + 4 {
        return Err(Error::TooShort {
            submsg_id: count_hint_id,
            expected: count_off + 4,
            actual: payload.len(),
        });
    }
    let count = u32_from_le(&payload[count_off..count_off + 4]);
    Ok(Submessage::AckNack {
        reader_id,
        writer_id,
        reader_sn_state,
        count,
        final_flag: flags & 0x02 != 0,
    })
}

fn decode_heartbeat(payload: &[u8], flags: u8) -> Result<Submessage, Error> {
    if payload.len() < 28 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_HEARTBEAT,
            expected: 28,
            actual: payload.len(),
        });
    }
    let reader_id: EntityId = payload[0..4].try_into().unwrap();
    let writer_id: EntityId = payload[4..8].try_into().unwrap();
    let first_sn = u64_seq_from_le(&payload[8..16]);
    let last_sn = u64_seq_from_le(&payload[16..24]);
    let count = u32_from_le(&payload[24..28]);
    Ok(Submessage::Heartbeat {
        reader_id,
        writer_id,
        first_sn,
        last_sn,
        count,
        final_flag: flags & 0x02 != 0,
        liveliness_flag: flags & 0x04 != 0,
    })
}

fn decode_heartbeat_frag(payload: &[u8]) -> Result<Submessage, Error> {
    if payload.len() < 20 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_HEARTBEAT_FRAG,
            expected: 20,
            actual: payload.len(),
        });
    }
    let reader_id: EntityId = payload[0..4].try_into().unwrap();
    let writer_id: EntityId = payload[4..8].try_into().unwrap();
    let writer_sn = u64_seq_from_le(&payload[8..16]);
    let last_fragment_num = u32_from_le(&payload[16..20]);
    if payload.len() < 24 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_HEARTBEAT_FRAG,
            expected: 24,
            actual: payload.len(),
        });
    }
    let count = u32_from_le(&payload[20..24]);
    Ok(Submessage::HeartbeatFrag {
        reader_id,
        writer_id,
        writer_sn,
        last_fragment_num,
        count,
    })
}

fn decode_nack_frag(payload: &[u8]) -> Result<Submessage, Error> {
    if payload.len() < 8 + 8 + 8 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_NACK_FRAG,
            expected: 8 + 8 + 8,
            actual: payload.len(),
        });
    }
    let reader_id: EntityId = payload[0..4].try_into().unwrap();
    let writer_id: EntityId = payload[4..8].try_into().unwrap();
    let writer_sn = u64_seq_from_le(&payload[8..16]);

    let frag_base = u32_from_le(&payload[16..20]);
    let frag_num_bits = u32_from_le(&payload[20..24]);
    let word_count = SequenceNumberSet::word_count_for_bits(frag_num_bits.min(SequenceNumberSet::MAX_BITS));
    let bitmap_end = 24 + word_count * 4;
    if payload.len() < bitmap_end + 4 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_NACK_FRAG,
            expected: bitmap_end + 4,
            actual: payload.len(),
        });
    }
    let mut frag_bitmap = Vec::with_capacity(word_count);
    for w in 0..word_count {
        frag_bitmap.push(u32_from_le(&payload[24 + w * 4..28 + w * 4]));
    }
    let count = u32_from_le(&payload[bitmap_end..bitmap_end + 4]);

    Ok(Submessage::NackFrag {
        reader_id,
        writer_id,
        writer_sn,
        frag_base,
        frag_num_bits,
        frag_bitmap,
        count,
    })
}

fn decode_gap(payload: &[u8]) -> Result<Submessage, Error> {
    GapMsg::decode_cdr2_le(payload)
        .map(Submessage::Gap)
        .ok_or(Error::InvalidSubmsg {
            submsg_id: RTPS_SUBMSG_GAP,
            reason: "malformed GAP payload",
        })
}

fn decode_data(payload: &[u8]) -> Result<Submessage, Error> {
    // extraFlags(2) + octetsToInlineQos(2) + readerId(4) + writerId(4) + writerSN(8)
    if payload.len() < 20 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_DATA,
            expected: 20,
            actual: payload.len(),
        });
    }
    let octets_to_inline_qos = u16::from_le_bytes([payload[2], payload[3]]) as usize;
    let reader_id: EntityId = payload[4..8].try_into().unwrap();
    let writer_id: EntityId = payload[8..12].try_into().unwrap();
    let writer_sn = u64_seq_from_le(&payload[12..20]);

    let body_start = 4 + octets_to_inline_qos;
    if body_start > payload.len() {
        return Err(Error::InvalidSubmsg {
            submsg_id: RTPS_SUBMSG_DATA,
            reason: "octetsToInlineQos points past the submessage",
        });
    }

    Ok(Submessage::Data {
        reader_id,
        writer_id,
        writer_sn,
        body: payload[body_start..].to_vec(),
    })
}

fn decode_data_frag(payload: &[u8]) -> Result<Submessage, Error> {
    if payload.len() < 32 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_DATA_FRAG,
            expected: 32,
            actual: payload.len(),
        });
    }
    let octets_to_inline_qos = u16::from_le_bytes([payload[2], payload[3]]) as usize;
    let reader_id: EntityId = payload[4..8].try_into().unwrap();
    let writer_id: EntityId = payload[8..12].try_into().unwrap();
    let writer_sn = u64_seq_from_le(&payload[12..20]);
    let fragment_starting_num = u32_from_le(&payload[20..24]);
    let fragments_in_submessage = u16::from_le_bytes([payload[24], payload[25]]);
    let fragment_size = u16::from_le_bytes([payload[26], payload[27]]);
    let sample_size = u32_from_le(&payload[28..32]);

    let body_start = 4 + octets_to_inline_qos;
    if body_start > payload.len() {
        return Err(Error::InvalidSubmsg {
            submsg_id: RTPS_SUBMSG_DATA_FRAG,
            reason: "octetsToInlineQos points past the submessage",
        });
    }

    Ok(Submessage::DataFrag {
        reader_id,
        writer_id,
        writer_sn,
        fragment_starting_num,
        fragments_in_submessage,
        fragment_size,
        sample_size,
        body: payload[body_start..].to_vec(),
    })
}

fn decode_info_ts(payload: &[u8], flags: u8) -> Result<Submessage, Error> {
    // INVALIDATE_FLAG (bit1): no timestamp bytes follow.
    if flags & 0x02 != 0 {
        return Ok(Submessage::InfoTs(InfoTsMsg::from_nanos(0)));
    }
    InfoTsMsg::decode_cdr2_le(payload)
        .map(Submessage::InfoTs)
        .ok_or(Error::TooShort {
            submsg_id: RTPS_SUBMSG_INFO_TS,
            expected: 8,
            actual: payload.len(),
        })
}

fn decode_info_src(payload: &[u8]) -> Result<Submessage, Error> {
    if payload.len() < 20 {
        return Err(Error::TooShort {
            submsg_id: RTPS_SUBMSG_INFO_SRC,
            expected: 20,
            actual: payload.len(),
        });
    }
    let version_major = payload[4];
    let version_minor = payload[5];
    let vendor_id = [payload[6], payload[7]];
    let mut guid_prefix = [0u8; RTPS_GUID_PREFIX_SIZE];
    guid_prefix.copy_from_slice(&payload[8..20]);
    Ok(Submessage::InfoSrc {
        version_major,
        version_minor,
        vendor_id,
        guid_prefix,
    })
}

fn decode_info_dst(payload: &[u8]) -> Result<Submessage, Error> {
    InfoDstMsg::decode_cdr2_le(payload)
        .map(Submessage::InfoDst)
        .ok_or(Error::TooShort {
            submsg_id: RTPS_SUBMSG_INFO_DST,
            expected: RTPS_GUID_PREFIX_SIZE,
            actual: payload.len(),
        })
}

fn decode_submessage(id: u8, flags: u8, payload: &[u8]) -> Result<Submessage, Error> {
    match id {
        RTPS_SUBMSG_PAD => Ok(Submessage::Pad),
        RTPS_SUBMSG_ACKNACK => decode_acknack(payload, flags, id),
        RTPS_SUBMSG_HEARTBEAT => decode_heartbeat(payload, flags),
        RTPS_SUBMSG_HEARTBEAT_FRAG => decode_heartbeat_frag(payload),
        RTPS_SUBMSG_GAP => decode_gap(payload),
        RTPS_SUBMSG_NACK_FRAG => decode_nack_frag(payload),
        RTPS_SUBMSG_DATA => decode_data(payload),
        RTPS_SUBMSG_DATA_FRAG => decode_data_frag(payload),
        RTPS_SUBMSG_INFO_TS => decode_info_ts(payload, flags),
        RTPS_SUBMSG_INFO_SRC => decode_info_src(payload),
        RTPS_SUBMSG_INFO_DST => decode_info_dst(payload),
        RTPS_SUBMSG_INFO_REPLY => Ok(Submessage::InfoReply {
            raw: payload.to_vec(),
        }),
        other => Ok(Submessage::Unknown {
            id: other,
            flags,
            len: payload.len(),
        }),
    }
}

/// Walk every submessage in `datagram` after the 20-byte RTPS header.
///
/// Each submessage is validated and decoded independently: a malformed one
/// is reported and skipped, parsing resumes at the next submessage header
/// per the codec's "stop processing this submessage, continue with the
/// next" contract.
pub fn decode_submessages(datagram: &[u8]) -> Vec<DecodedSubmessage> {
    let mut out = Vec::new();
    let mut offset = RTPS_HEADER_SIZE;

    while offset + RTPS_SUBMSG_HEADER_MIN_SIZE <= datagram.len() {
        let id = datagram[offset];
        let flags = datagram[offset + 1];
        let octets_to_next =
            u16::from_le_bytes([datagram[offset + 2], datagram[offset + 3]]) as usize;

        let payload_start = offset + RTPS_SUBMSG_HEADER_MIN_SIZE;
        let submsg_len = if octets_to_next == 0 {
            // Last submessage in the message: runs to the end of the datagram.
            datagram.len() - payload_start
        } else {
            octets_to_next
        };
        let payload_end = payload_start + submsg_len;

        if payload_end > datagram.len() {
            out.push(DecodedSubmessage {
                offset,
                id,
                flags,
                result: Err(Error::TooShort {
                    submsg_id: id,
                    expected: submsg_len,
                    actual: datagram.len() - payload_start,
                }),
            });
            break;
        }

        let payload = &datagram[payload_start..payload_end];
        let result = if flags & 0x01 == 0 {
            Err(Error::InvalidSubmsg {
                submsg_id: id,
                reason: "big-endian submessages are not supported",
            })
        } else {
            decode_submessage(id, flags, payload)
        };

        out.push(DecodedSubmessage {
            offset,
            id,
            flags,
            result,
        });

        if octets_to_next == 0 {
            break;
        }
        offset = payload_end;
    }

    out
}
