//! # SRTLA Wire Format
//!
//! Classification and field access for the two packet families the sender
//! has to understand: SRTLA control frames (registration, keepalive, link
//! acknowledgements) and the SRT stream they carry.
//!
//! ## SRTLA frames
//!
//! ```text
//!  0                   1                   2
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-
//! |      Type (16, BE)            |  body ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-
//! ```
//!
//! The SRTLA type space is the `0x9xxx` corner of the 16-bit word. REG1 and
//! REG2 carry the 256-byte group identity, REG3 and the error replies are
//! bare types, KEEPALIVE carries an 8-byte millisecond timestamp, and ACK
//! is always 44 bytes: a 4-byte header followed by ten 32-bit sequence
//! numbers.
//!
//! ## SRT frames
//!
//! Everything else is SRT and is forwarded opaquely. The only fields ever
//! read are the first 32-bit word (control bit + 31-bit data sequence) and,
//! for ACK/NAK control packets, the 32-bit entries starting at byte 16.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Length of the SRTLA group identity carried by REG1/REG2.
pub const SRTLA_ID_LEN: usize = 256;

/// The server matches only the first half of the identity it received in
/// REG1; the second half is completed by the server in its REG2 reply.
pub const SRTLA_ID_HALF_LEN: usize = SRTLA_ID_LEN / 2;

/// REG1/REG2 frame length: 2-byte type + full group identity.
pub const REG_PACKET_LEN: usize = 2 + SRTLA_ID_LEN;

/// KEEPALIVE frame length: 2-byte type + 8-byte millisecond timestamp.
pub const KEEPALIVE_PACKET_LEN: usize = 10;

/// SRTLA ACK frame length: 4-byte header + ten 32-bit sequence numbers.
pub const SRTLA_ACK_PACKET_LEN: usize = 44;

/// Number of sequence numbers in every SRTLA ACK.
pub const SRTLA_ACK_SEQ_COUNT: usize = 10;

/// Fixed SRT header length (data and control packets alike).
pub const SRT_HEADER_LEN: usize = 16;

/// Minimum length of an SRT ACK carrying the acknowledged sequence.
pub const SRT_ACK_MIN_LEN: usize = SRT_HEADER_LEN + 4;

/// Mask for the 31-bit SRT sequence space.
pub const SRT_SEQ_MASK: u32 = 0x7fff_ffff;

/// Control bit of the first 16-bit word of an SRT packet.
const SRT_CONTROL_BIT: u16 = 0x8000;

/// Range-start marker in an SRT NAK loss-list entry.
const NAK_RANGE_BIT: u32 = 0x8000_0000;

/// Longest run a single NAK range entry is allowed to expand to. A
/// correctly formed loss report never comes close; anything beyond this is
/// a corrupt frame and expanding it would stall the event loop.
const NAK_RANGE_CAP: u32 = 1 << 16;

// ─── SRTLA packet types ──────────────────────────────────────────────────────

/// The authoritative SRTLA type table. Values must match the receiver the
/// sender registers against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SrtlaPacketType {
    Keepalive = 0x9000,
    Ack = 0x9100,
    Reg1 = 0x9200,
    Reg2 = 0x9201,
    Reg3 = 0x9202,
    RegErr = 0x9210,
    /// "No group": the server has no session for the presented identity.
    RegNgp = 0x9211,
    /// Registration rejected (e.g. the group is out of link slots).
    RegNak = 0x9212,
}

impl SrtlaPacketType {
    pub fn from_u16(word: u16) -> Option<Self> {
        match word {
            0x9000 => Some(SrtlaPacketType::Keepalive),
            0x9100 => Some(SrtlaPacketType::Ack),
            0x9200 => Some(SrtlaPacketType::Reg1),
            0x9201 => Some(SrtlaPacketType::Reg2),
            0x9202 => Some(SrtlaPacketType::Reg3),
            0x9210 => Some(SrtlaPacketType::RegErr),
            0x9211 => Some(SrtlaPacketType::RegNgp),
            0x9212 => Some(SrtlaPacketType::RegNak),
            _ => None,
        }
    }
}

// ─── SRT control types ───────────────────────────────────────────────────────

/// SRT control type field values the sender inspects. Anything else is
/// forwarded without interpretation.
pub const SRT_TYPE_ACK: u16 = 0x0002;
pub const SRT_TYPE_NAK: u16 = 0x0003;
pub const SRT_TYPE_SHUTDOWN: u16 = 0x0005;

// ─── Packet classification ───────────────────────────────────────────────────

/// What a received datagram turned out to be. `classify` is total: every
/// byte string maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// SRT data packet with its 31-bit sequence number.
    SrtData { sequence: u32 },
    SrtAck,
    SrtNak,
    SrtShutdown,
    /// Any other SRT control packet — forwarded opaquely.
    SrtControl,
    SrtlaKeepalive,
    SrtlaAck,
    SrtlaReg1,
    SrtlaReg2,
    SrtlaReg3,
    SrtlaRegErr,
    SrtlaRegNgp,
    SrtlaRegNak,
    /// Too short to carry a recognizable header.
    Runt,
}

impl PacketKind {
    /// Whether the frame belongs to the SRT stream (data or control) and
    /// is a candidate for forwarding to the encoder.
    pub fn is_srt(self) -> bool {
        matches!(
            self,
            PacketKind::SrtData { .. }
                | PacketKind::SrtAck
                | PacketKind::SrtNak
                | PacketKind::SrtShutdown
                | PacketKind::SrtControl
        )
    }

    /// Whether the frame is a terminal registration reply.
    pub fn is_registration_failure(self) -> bool {
        matches!(
            self,
            PacketKind::SrtlaRegErr | PacketKind::SrtlaRegNgp | PacketKind::SrtlaRegNak
        )
    }
}

/// Classify a received datagram.
pub fn classify(frame: &[u8]) -> PacketKind {
    if frame.len() < 2 {
        return PacketKind::Runt;
    }
    let word = u16::from_be_bytes([frame[0], frame[1]]);

    if let Some(t) = SrtlaPacketType::from_u16(word) {
        return match t {
            SrtlaPacketType::Keepalive => PacketKind::SrtlaKeepalive,
            SrtlaPacketType::Ack => PacketKind::SrtlaAck,
            SrtlaPacketType::Reg1 => PacketKind::SrtlaReg1,
            SrtlaPacketType::Reg2 => PacketKind::SrtlaReg2,
            SrtlaPacketType::Reg3 => PacketKind::SrtlaReg3,
            SrtlaPacketType::RegErr => PacketKind::SrtlaRegErr,
            SrtlaPacketType::RegNgp => PacketKind::SrtlaRegNgp,
            SrtlaPacketType::RegNak => PacketKind::SrtlaRegNak,
        };
    }

    if word & SRT_CONTROL_BIT != 0 {
        return match word & !SRT_CONTROL_BIT {
            SRT_TYPE_ACK => PacketKind::SrtAck,
            SRT_TYPE_NAK => PacketKind::SrtNak,
            SRT_TYPE_SHUTDOWN => PacketKind::SrtShutdown,
            _ => PacketKind::SrtControl,
        };
    }

    // Data packet: the sequence is the whole first word, top bit clear.
    match srt_sequence(frame) {
        Some(sequence) => PacketKind::SrtData { sequence },
        None => PacketKind::Runt,
    }
}

// ─── SRT field access ────────────────────────────────────────────────────────

/// Sequence number of an SRT data packet: the low 31 bits of the first
/// word. `None` for control packets and runts.
pub fn srt_sequence(frame: &[u8]) -> Option<u32> {
    if frame.len() < 4 {
        return None;
    }
    let word = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if word & (1 << 31) != 0 {
        return None;
    }
    Some(word & SRT_SEQ_MASK)
}

/// Acknowledged sequence of an SRT ACK: the 32-bit field at byte 16.
pub fn srt_ack_seq(frame: &[u8]) -> Option<u32> {
    if classify(frame) != PacketKind::SrtAck || frame.len() < SRT_ACK_MIN_LEN {
        return None;
    }
    let mut field = &frame[SRT_HEADER_LEN..];
    Some(field.get_u32() & SRT_SEQ_MASK)
}

/// Iterator over the sequence numbers named by an SRT NAK loss report.
///
/// Entries are 32-bit words starting at byte 16. An entry with the top bit
/// set opens an inclusive range whose inclusive end is the next entry;
/// expansion is ascending with 31-bit wraparound. A lone range-start at the
/// end of the frame degrades to a single sequence.
pub fn srt_nak_sequences(frame: &[u8]) -> Option<NakSequences<'_>> {
    if classify(frame) != PacketKind::SrtNak {
        return None;
    }
    Some(NakSequences {
        entries: &frame[SRT_HEADER_LEN.min(frame.len())..],
        range: None,
    })
}

/// See [`srt_nak_sequences`].
pub struct NakSequences<'a> {
    entries: &'a [u8],
    /// In-progress range: (next value to emit, inclusive end).
    range: Option<(u32, u32)>,
}

impl NakSequences<'_> {
    fn next_entry(&mut self) -> Option<u32> {
        if self.entries.len() < 4 {
            return None;
        }
        Some(self.entries.get_u32())
    }
}

impl Iterator for NakSequences<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if let Some((next, end)) = self.range {
            if next == end {
                self.range = None;
            } else {
                self.range = Some((next.wrapping_add(1) & SRT_SEQ_MASK, end));
            }
            return Some(next);
        }

        let entry = self.next_entry()?;
        if entry & NAK_RANGE_BIT == 0 {
            return Some(entry & SRT_SEQ_MASK);
        }

        let start = entry & SRT_SEQ_MASK;
        let Some(end_entry) = self.next_entry() else {
            // Truncated range: report the start alone.
            return Some(start);
        };
        let end = end_entry & SRT_SEQ_MASK;
        let run = end.wrapping_sub(start) & SRT_SEQ_MASK;
        if run == 0 || run > NAK_RANGE_CAP {
            // Degenerate or corrupt range; keep the endpoints only.
            if start != end {
                self.range = Some((end, end));
            }
            return Some(start);
        }
        self.range = Some((start.wrapping_add(1) & SRT_SEQ_MASK, end));
        Some(start)
    }
}

// ─── SRTLA field access ──────────────────────────────────────────────────────

/// The ten sequence numbers of an SRTLA ACK. The frame must be exactly 44
/// bytes; anything else is malformed and dropped by the caller.
pub fn srtla_ack_sequences(frame: &[u8]) -> Option<[u32; SRTLA_ACK_SEQ_COUNT]> {
    if classify(frame) != PacketKind::SrtlaAck || frame.len() != SRTLA_ACK_PACKET_LEN {
        return None;
    }
    let mut body = &frame[4..];
    let mut seqs = [0u32; SRTLA_ACK_SEQ_COUNT];
    for slot in &mut seqs {
        *slot = body.get_u32();
    }
    Some(seqs)
}

/// The 256-byte group identity carried by a REG1 or REG2 frame.
pub fn reg_group_id(frame: &[u8]) -> Option<&[u8]> {
    match classify(frame) {
        PacketKind::SrtlaReg1 | PacketKind::SrtlaReg2 if frame.len() >= REG_PACKET_LEN => {
            Some(&frame[2..REG_PACKET_LEN])
        }
        _ => None,
    }
}

/// The millisecond timestamp of a KEEPALIVE, ours or the server's echo.
pub fn keepalive_timestamp(frame: &[u8]) -> Option<u64> {
    if classify(frame) != PacketKind::SrtlaKeepalive || frame.len() < KEEPALIVE_PACKET_LEN {
        return None;
    }
    let mut body = &frame[2..];
    Some(body.get_u64())
}

// ─── Frame builders ──────────────────────────────────────────────────────────

fn build_reg(t: SrtlaPacketType, id: &SrtlaId) -> BytesMut {
    let mut buf = BytesMut::with_capacity(REG_PACKET_LEN);
    buf.put_u16(t as u16);
    buf.put_slice(id.as_bytes());
    buf
}

/// REG1: enrolment request carrying the locally generated identity.
pub fn build_reg1(id: &SrtlaId) -> BytesMut {
    build_reg(SrtlaPacketType::Reg1, id)
}

/// REG2: per-link enrolment carrying the server-completed identity.
pub fn build_reg2(id: &SrtlaId) -> BytesMut {
    build_reg(SrtlaPacketType::Reg2, id)
}

/// KEEPALIVE with a monotonic millisecond timestamp; the server echoes the
/// frame verbatim.
pub fn build_keepalive(timestamp_ms: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(KEEPALIVE_PACKET_LEN);
    buf.put_u16(SrtlaPacketType::Keepalive as u16);
    buf.put_u64(timestamp_ms);
    buf
}

// ─── Group identity ──────────────────────────────────────────────────────────

/// The 256-byte group identity shared by every link of one session.
///
/// Generated randomly at engine start; the first half identifies the
/// session to the server, which completes the second half in its REG2
/// reply. The completed identity is what subsequent REG2 broadcasts carry.
#[derive(Clone, PartialEq, Eq)]
pub struct SrtlaId([u8; SRTLA_ID_LEN]);

impl SrtlaId {
    /// Freshly randomized identity.
    pub fn random() -> Self {
        use rand::RngExt;
        let mut bytes = [0u8; SRTLA_ID_LEN];
        rand::rng().fill(&mut bytes[..]);
        SrtlaId(bytes)
    }

    /// Build from raw bytes; `None` unless exactly 256 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SRTLA_ID_LEN] = bytes.try_into().ok()?;
        Some(SrtlaId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SRTLA_ID_LEN] {
        &self.0
    }

    /// Whether `other` begins with the same first half as this identity.
    /// This is the REG2 validity check.
    pub fn first_half_matches(&self, other: &[u8]) -> bool {
        other.len() >= SRTLA_ID_HALF_LEN && self.0[..SRTLA_ID_HALF_LEN] == other[..SRTLA_ID_HALF_LEN]
    }

    /// Replace the identity with the server-completed one. Returns `false`
    /// (and leaves the identity untouched) unless `completed` is exactly
    /// 256 bytes.
    pub fn adopt(&mut self, completed: &[u8]) -> bool {
        match <[u8; SRTLA_ID_LEN]>::try_from(completed) {
            Ok(arr) => {
                self.0 = arr;
                true
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for SrtlaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SrtlaId({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// ─── Sequence arithmetic ─────────────────────────────────────────────────────

/// Wrap-aware ordering over the 31-bit sequence space: `a ≤ b` iff the
/// signed 32-bit difference `b − a` is non-negative.
#[inline]
pub fn seq_leq(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) as i32 >= 0
}

/// Strict counterpart of [`seq_leq`].
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    !seq_leq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn srt_data_frame(seq: u32, payload_len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; SRT_HEADER_LEN + payload_len];
        frame[..4].copy_from_slice(&(seq & SRT_SEQ_MASK).to_be_bytes());
        frame
    }

    fn srt_control_frame(ctrl_type: u16, extra: &[u32]) -> Vec<u8> {
        let mut frame = vec![0u8; SRT_HEADER_LEN];
        frame[..2].copy_from_slice(&(SRT_CONTROL_BIT | ctrl_type).to_be_bytes());
        for word in extra {
            frame.extend_from_slice(&word.to_be_bytes());
        }
        frame
    }

    // ─── Classification ─────────────────────────────────────────────────

    #[test]
    fn classify_srtla_types() {
        for (word, kind) in [
            (0x9000u16, PacketKind::SrtlaKeepalive),
            (0x9100, PacketKind::SrtlaAck),
            (0x9200, PacketKind::SrtlaReg1),
            (0x9201, PacketKind::SrtlaReg2),
            (0x9202, PacketKind::SrtlaReg3),
            (0x9210, PacketKind::SrtlaRegErr),
            (0x9211, PacketKind::SrtlaRegNgp),
            (0x9212, PacketKind::SrtlaRegNak),
        ] {
            assert_eq!(classify(&word.to_be_bytes()), kind, "type {word:#06x}");
        }
    }

    #[test]
    fn classify_srt_control() {
        assert_eq!(classify(&srt_control_frame(SRT_TYPE_ACK, &[])), PacketKind::SrtAck);
        assert_eq!(classify(&srt_control_frame(SRT_TYPE_NAK, &[])), PacketKind::SrtNak);
        assert_eq!(
            classify(&srt_control_frame(SRT_TYPE_SHUTDOWN, &[])),
            PacketKind::SrtShutdown
        );
        // Handshake (type 0) is opaque control.
        assert_eq!(classify(&srt_control_frame(0x0000, &[])), PacketKind::SrtControl);
    }

    #[test]
    fn classify_srt_data_carries_sequence() {
        let frame = srt_data_frame(42, 100);
        assert_eq!(classify(&frame), PacketKind::SrtData { sequence: 42 });
    }

    #[test]
    fn classify_runts() {
        assert_eq!(classify(&[]), PacketKind::Runt);
        assert_eq!(classify(&[0x12]), PacketKind::Runt);
        // Two bytes with the data bit clear: not enough for a sequence.
        assert_eq!(classify(&[0x00, 0x01]), PacketKind::Runt);
    }

    proptest! {
        #[test]
        fn proptest_classify_total(frame in proptest::collection::vec(any::<u8>(), 0..2048)) {
            // Must never panic, whatever the bytes.
            let _ = classify(&frame);
        }

        #[test]
        fn proptest_data_sequence_roundtrip(seq in 0u32..=SRT_SEQ_MASK) {
            let frame = srt_data_frame(seq, 8);
            prop_assert_eq!(classify(&frame), PacketKind::SrtData { sequence: seq });
            prop_assert_eq!(srt_sequence(&frame), Some(seq));
        }
    }

    // ─── SRT field access ───────────────────────────────────────────────

    #[test]
    fn ack_seq_at_offset_16() {
        let frame = srt_control_frame(SRT_TYPE_ACK, &[12345]);
        assert_eq!(srt_ack_seq(&frame), Some(12345));
    }

    #[test]
    fn short_ack_has_no_seq() {
        let frame = srt_control_frame(SRT_TYPE_ACK, &[]);
        assert_eq!(srt_ack_seq(&frame), None);
    }

    #[test]
    fn nak_single_sequences() {
        let frame = srt_control_frame(SRT_TYPE_NAK, &[7, 9]);
        let seqs: Vec<u32> = srt_nak_sequences(&frame).unwrap().collect();
        assert_eq!(seqs, vec![7, 9]);
    }

    #[test]
    fn nak_range_expands_inclusive() {
        let frame = srt_control_frame(SRT_TYPE_NAK, &[NAK_RANGE_BIT | 100, 104]);
        let seqs: Vec<u32> = srt_nak_sequences(&frame).unwrap().collect();
        assert_eq!(seqs, vec![100, 101, 102, 103, 104]);
    }

    #[test]
    fn nak_mixed_entries() {
        let frame = srt_control_frame(SRT_TYPE_NAK, &[5, NAK_RANGE_BIT | 10, 12, 20]);
        let seqs: Vec<u32> = srt_nak_sequences(&frame).unwrap().collect();
        assert_eq!(seqs, vec![5, 10, 11, 12, 20]);
    }

    #[test]
    fn nak_range_wraps_sequence_space() {
        let frame = srt_control_frame(
            SRT_TYPE_NAK,
            &[NAK_RANGE_BIT | (SRT_SEQ_MASK - 1), 1],
        );
        let seqs: Vec<u32> = srt_nak_sequences(&frame).unwrap().collect();
        assert_eq!(seqs, vec![SRT_SEQ_MASK - 1, SRT_SEQ_MASK, 0, 1]);
    }

    #[test]
    fn nak_truncated_range_keeps_start() {
        let frame = srt_control_frame(SRT_TYPE_NAK, &[NAK_RANGE_BIT | 50]);
        let seqs: Vec<u32> = srt_nak_sequences(&frame).unwrap().collect();
        assert_eq!(seqs, vec![50]);
    }

    #[test]
    fn nak_corrupt_range_keeps_endpoints() {
        // "Range" spanning almost the whole sequence space.
        let frame = srt_control_frame(SRT_TYPE_NAK, &[NAK_RANGE_BIT | 10, 9]);
        let seqs: Vec<u32> = srt_nak_sequences(&frame).unwrap().collect();
        assert_eq!(seqs, vec![10, 9]);
    }

    proptest! {
        #[test]
        fn proptest_nak_range_count(start in 0u32..=SRT_SEQ_MASK, len in 0u32..256) {
            let end = start.wrapping_add(len) & SRT_SEQ_MASK;
            let frame = srt_control_frame(SRT_TYPE_NAK, &[NAK_RANGE_BIT | start, end]);
            let count = srt_nak_sequences(&frame).unwrap().count() as u32;
            prop_assert_eq!(count, len + 1);
        }
    }

    // ─── SRTLA field access ─────────────────────────────────────────────

    fn srtla_ack_frame(seqs: &[u32; SRTLA_ACK_SEQ_COUNT]) -> Vec<u8> {
        let mut frame = vec![0x91, 0x00, 0x00, 0x00];
        for seq in seqs {
            frame.extend_from_slice(&seq.to_be_bytes());
        }
        frame
    }

    #[test]
    fn srtla_ack_ten_sequences() {
        let seqs = [42, 0, 0, 0, 0, 0, 0, 0, 0, 7];
        let frame = srtla_ack_frame(&seqs);
        assert_eq!(frame.len(), SRTLA_ACK_PACKET_LEN);
        assert_eq!(srtla_ack_sequences(&frame), Some(seqs));
    }

    #[test]
    fn srtla_ack_wrong_length_rejected() {
        let seqs = [1; SRTLA_ACK_SEQ_COUNT];
        let mut frame = srtla_ack_frame(&seqs);
        frame.pop();
        assert_eq!(srtla_ack_sequences(&frame), None);
    }

    // ─── Builders ───────────────────────────────────────────────────────

    #[test]
    fn reg1_roundtrip() {
        let id = SrtlaId::random();
        let frame = build_reg1(&id);
        assert_eq!(frame.len(), REG_PACKET_LEN);
        assert_eq!(classify(&frame), PacketKind::SrtlaReg1);
        assert_eq!(reg_group_id(&frame), Some(&id.as_bytes()[..]));
    }

    #[test]
    fn reg2_roundtrip() {
        let id = SrtlaId::random();
        let frame = build_reg2(&id);
        assert_eq!(classify(&frame), PacketKind::SrtlaReg2);
        assert_eq!(reg_group_id(&frame), Some(&id.as_bytes()[..]));
    }

    #[test]
    fn keepalive_roundtrip() {
        let frame = build_keepalive(0x0102_0304_0506_0708);
        assert_eq!(frame.len(), KEEPALIVE_PACKET_LEN);
        assert_eq!(classify(&frame), PacketKind::SrtlaKeepalive);
        assert_eq!(keepalive_timestamp(&frame), Some(0x0102_0304_0506_0708));
    }

    #[test]
    fn truncated_reg_has_no_id() {
        let id = SrtlaId::random();
        let frame = build_reg1(&id);
        assert_eq!(reg_group_id(&frame[..frame.len() - 1]), None);
    }

    // ─── Group identity ─────────────────────────────────────────────────

    #[test]
    fn identity_half_match() {
        let id = SrtlaId::random();
        let mut completed = *id.as_bytes();
        completed[SRTLA_ID_HALF_LEN..].fill(0xAB);
        assert!(id.first_half_matches(&completed));

        let mut mismatch = completed;
        mismatch[0] ^= 0xFF;
        assert!(!id.first_half_matches(&mismatch));
    }

    #[test]
    fn identity_adopt_replaces_in_full() {
        let mut id = SrtlaId::random();
        let completed = [0x5Au8; SRTLA_ID_LEN];
        assert!(id.adopt(&completed));
        assert_eq!(id.as_bytes(), &completed);

        assert!(!id.adopt(&completed[..100]));
        assert_eq!(id.as_bytes(), &completed);
    }

    #[test]
    fn random_identities_differ() {
        assert_ne!(SrtlaId::random().as_bytes(), SrtlaId::random().as_bytes());
    }

    // ─── Sequence arithmetic ────────────────────────────────────────────

    #[test]
    fn seq_ordering_plain() {
        assert!(seq_leq(5, 5));
        assert!(seq_leq(5, 6));
        assert!(!seq_leq(6, 5));
        assert!(seq_gt(6, 5));
    }

    #[test]
    fn seq_ordering_across_wrap() {
        // Top of the sequence space is "just before" the bottom.
        let near_top = SRT_SEQ_MASK - 1;
        assert!(seq_leq(near_top, SRT_SEQ_MASK));
        // 2^31 - 2 is ≤ 2^31 - 1, which in turn resolves it; 0 after the
        // wrap compares as far in the past of near_top in i32 space.
        assert!(seq_leq(0, 1));
        assert!(seq_gt(1, 0));
    }
}
