//! On-disk layout of the tape file (§3.7, §6.3): a versioned header, a
//! dictionary block, a tape-wide time index, a record table with embedded
//! per-record time indices, and a stream of length-delimited messages.
//!
//! Per §9's redesign note, the header is written in one of two on-disk
//! layouts depending on the writer's native pointer width (32-bit or
//! 64-bit offsets) and may be big- or little-endian; this module parses
//! both by hand into one canonical [`TapeHeader`] rather than relying on
//! any compiler struct layout, matching the spec's explicit warning against
//! assuming padding equivalence across platforms.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub const MAGIC: &[u8; 16] = b"RTEDGE_TAPE_V01\0";
pub const HEADER_LEN: usize = 256;

pub const SLOT_SERVICE_LEN: usize = 32;
pub const SLOT_TICKER_LEN: usize = 64;

/// Seconds per bucket in the tape-wide time index — a day is divided into
/// `86400 / SEC_PER_IDX_TAPE` slots (§6.3).
pub const DEFAULT_SEC_PER_IDX_TAPE: u32 = 60;
/// Seconds per bucket in each record's embedded time index.
pub const DEFAULT_SEC_PER_IDX_RECORD: u32 = 300;

pub const DICT_ENTRY_LEN: usize = SLOT_SERVICE_LEN + SLOT_TICKER_LEN + 2 + 4 + 8 + 8;
pub const TAPE_INDEX_SLOT_LEN: usize = 16; // first_msg_offset(u64) + first_seqno(u64)
pub const RECORD_STAT_LEN: usize = SLOT_SERVICE_LEN + SLOT_TICKER_LEN + 2 + 4 + 8 + 8;
pub const RECORD_TIME_INDEX_SLOT_LEN: usize = 8; // first_msg_offset(u64)
/// `protocol(u8) + record_index(u32) + back_pointer(u64) + timestamp_ns(i64)
/// + length(u32)`.
pub const MESSAGE_FRAME_HEADER_LEN: usize = 25;
/// Sentinel back-pointer value meaning "no earlier message in this chain".
pub const NO_CHAIN_PREDECESSOR: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrderKind {
    Little,
    Big,
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("file too short to hold a header")]
    Truncated,
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported long width {0}, expected 4 or 8")]
    UnsupportedLongWidth(u8),
}

fn read_u64(buf: &[u8], bo: ByteOrderKind) -> u64 {
    match bo {
        ByteOrderKind::Little => LittleEndian::read_u64(buf),
        ByteOrderKind::Big => BigEndian::read_u64(buf),
    }
}

fn read_u32(buf: &[u8], bo: ByteOrderKind) -> u32 {
    match bo {
        ByteOrderKind::Little => LittleEndian::read_u32(buf),
        ByteOrderKind::Big => BigEndian::read_u32(buf),
    }
}

fn read_i64(buf: &[u8], bo: ByteOrderKind) -> i64 {
    match bo {
        ByteOrderKind::Little => LittleEndian::read_i64(buf),
        ByteOrderKind::Big => BigEndian::read_i64(buf),
    }
}

fn write_u64(buf: &mut [u8], v: u64, bo: ByteOrderKind) {
    match bo {
        ByteOrderKind::Little => LittleEndian::write_u64(buf, v),
        ByteOrderKind::Big => BigEndian::write_u64(buf, v),
    }
}

fn write_u32(buf: &mut [u8], v: u32, bo: ByteOrderKind) {
    match bo {
        ByteOrderKind::Little => LittleEndian::write_u32(buf, v),
        ByteOrderKind::Big => BigEndian::write_u32(buf, v),
    }
}

fn write_i64(buf: &mut [u8], v: i64, bo: ByteOrderKind) {
    match bo {
        ByteOrderKind::Little => LittleEndian::write_i64(buf, v),
        ByteOrderKind::Big => BigEndian::write_i64(buf, v),
    }
}

/// Reads an offset field that is either 4 or 8 bytes wide on disk,
/// depending on the writer's `long_width`, widened to `u64` in memory.
fn read_offset(buf: &[u8], width: u8, bo: ByteOrderKind) -> u64 {
    if width == 4 {
        read_u32(buf, bo) as u64
    } else {
        read_u64(buf, bo)
    }
}

fn offset_width(long_width: u8) -> usize {
    long_width as usize
}

/// Canonical, platform-independent view of the tape header. Offset fields
/// are always widened to `u64` here regardless of how they were stored.
#[derive(Debug, Clone, Copy)]
pub struct TapeHeader {
    pub version: u32,
    pub byte_order: ByteOrderKind,
    pub long_width: u8,
    pub created_at_unix_ns: i64,
    pub sec_per_idx_tape: u32,
    pub sec_per_idx_record: u32,
    pub dict_count: u32,
    pub record_count: u32,
    pub dict_offset: u64,
    pub tape_index_offset: u64,
    pub record_table_offset: u64,
    pub message_stream_offset: u64,
    pub next_write_offset: u64,
}

impl TapeHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < HEADER_LEN {
            return Err(LayoutError::Truncated);
        }
        if &buf[0..16] != MAGIC {
            return Err(LayoutError::BadMagic);
        }
        // version/byte_order/long_width are endianness-agnostic single bytes
        // or values written consistently regardless of the flag, so they can
        // be read before the byte order is known.
        let version = LittleEndian::read_u32(&buf[16..20]);
        if version != 1 {
            return Err(LayoutError::UnsupportedVersion(version));
        }
        let byte_order = match buf[20] {
            0 => ByteOrderKind::Little,
            1 => ByteOrderKind::Big,
            other => return Err(LayoutError::UnsupportedVersion(other as u32)),
        };
        let long_width = buf[21];
        if long_width != 4 && long_width != 8 {
            return Err(LayoutError::UnsupportedLongWidth(long_width));
        }
        let bo = byte_order;
        let mut off = 28; // magic(16) + version(4) + byte_order(1) + long_width(1) + reserved(6)
        let created_at_unix_ns = read_i64(&buf[off..off + 8], bo);
        off += 8;
        let sec_per_idx_tape = read_u32(&buf[off..off + 4], bo);
        off += 4;
        let sec_per_idx_record = read_u32(&buf[off..off + 4], bo);
        off += 4;
        let dict_count = read_u32(&buf[off..off + 4], bo);
        off += 4;
        let record_count = read_u32(&buf[off..off + 4], bo);
        off += 4;
        let w = offset_width(long_width);
        let dict_offset = read_offset(&buf[off..off + w], long_width, bo);
        off += w;
        let tape_index_offset = read_offset(&buf[off..off + w], long_width, bo);
        off += w;
        let record_table_offset = read_offset(&buf[off..off + w], long_width, bo);
        off += w;
        let message_stream_offset = read_offset(&buf[off..off + w], long_width, bo);
        off += w;
        let next_write_offset = read_offset(&buf[off..off + w], long_width, bo);

        Ok(Self {
            version,
            byte_order,
            long_width,
            created_at_unix_ns,
            sec_per_idx_tape,
            sec_per_idx_record,
            dict_count,
            record_count,
            dict_offset,
            tape_index_offset,
            record_table_offset,
            message_stream_offset,
            next_write_offset,
        })
    }

    /// Writes the header using this instance's own `long_width`/`byte_order`
    /// — used only by test/tool fixture generation (§9: the real writer is
    /// an external peer).
    pub fn write_into(&self, buf: &mut [u8]) {
        buf[0..16].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut buf[16..20], self.version);
        buf[20] = match self.byte_order {
            ByteOrderKind::Little => 0,
            ByteOrderKind::Big => 1,
        };
        buf[21] = self.long_width;
        let bo = self.byte_order;
        let mut off = 28;
        write_i64(&mut buf[off..off + 8], self.created_at_unix_ns, bo);
        off += 8;
        write_u32(&mut buf[off..off + 4], self.sec_per_idx_tape, bo);
        off += 4;
        write_u32(&mut buf[off..off + 4], self.sec_per_idx_record, bo);
        off += 4;
        write_u32(&mut buf[off..off + 4], self.dict_count, bo);
        off += 4;
        write_u32(&mut buf[off..off + 4], self.record_count, bo);
        off += 4;
        let w = offset_width(self.long_width);
        let mut write_offset = |buf: &mut [u8], off: usize, v: u64| {
            if w == 4 {
                write_u32(&mut buf[off..off + 4], v as u32, bo);
            } else {
                write_u64(&mut buf[off..off + 8], v, bo);
            }
        };
        write_offset(buf, off, self.dict_offset);
        off += w;
        write_offset(buf, off, self.tape_index_offset);
        off += w;
        write_offset(buf, off, self.record_table_offset);
        off += w;
        write_offset(buf, off, self.message_stream_offset);
        off += w;
        write_offset(buf, off, self.next_write_offset);
    }
}

#[derive(Debug, Clone)]
pub struct DictEntry {
    pub service: String,
    pub ticker: String,
    pub channel_id: u16,
    pub record_index: u32,
    pub first_offset: u64,
    pub last_offset: u64,
}

pub fn read_dict_entry(buf: &[u8], bo: ByteOrderKind) -> DictEntry {
    let service = super::strutil::read_fixed_str(&buf[0..SLOT_SERVICE_LEN]);
    let ticker = super::strutil::read_fixed_str(&buf[SLOT_SERVICE_LEN..SLOT_SERVICE_LEN + SLOT_TICKER_LEN]);
    let mut off = SLOT_SERVICE_LEN + SLOT_TICKER_LEN;
    let channel_id = match bo {
        ByteOrderKind::Little => LittleEndian::read_u16(&buf[off..off + 2]),
        ByteOrderKind::Big => BigEndian::read_u16(&buf[off..off + 2]),
    };
    off += 2;
    let record_index = read_u32(&buf[off..off + 4], bo);
    off += 4;
    let first_offset = read_u64(&buf[off..off + 8], bo);
    off += 8;
    let last_offset = read_u64(&buf[off..off + 8], bo);
    DictEntry { service, ticker, channel_id, record_index, first_offset, last_offset }
}

pub fn write_dict_entry(buf: &mut [u8], entry: &DictEntry, bo: ByteOrderKind) {
    super::strutil::write_fixed_str(&mut buf[0..SLOT_SERVICE_LEN], &entry.service);
    super::strutil::write_fixed_str(&mut buf[SLOT_SERVICE_LEN..SLOT_SERVICE_LEN + SLOT_TICKER_LEN], &entry.ticker);
    let mut off = SLOT_SERVICE_LEN + SLOT_TICKER_LEN;
    match bo {
        ByteOrderKind::Little => LittleEndian::write_u16(&mut buf[off..off + 2], entry.channel_id),
        ByteOrderKind::Big => BigEndian::write_u16(&mut buf[off..off + 2], entry.channel_id),
    }
    off += 2;
    write_u32(&mut buf[off..off + 4], entry.record_index, bo);
    off += 4;
    write_u64(&mut buf[off..off + 8], entry.first_offset, bo);
    off += 8;
    write_u64(&mut buf[off..off + 8], entry.last_offset, bo);
}

/// `(first_msg_offset, first_seqno)` — the tape-wide time index slot.
pub fn read_tape_index_slot(buf: &[u8], bo: ByteOrderKind) -> (u64, u64) {
    (read_u64(&buf[0..8], bo), read_u64(&buf[8..16], bo))
}

pub fn write_tape_index_slot(buf: &mut [u8], first_msg_offset: u64, first_seqno: u64, bo: ByteOrderKind) {
    write_u64(&mut buf[0..8], first_msg_offset, bo);
    write_u64(&mut buf[8..16], first_seqno, bo);
}

#[derive(Debug, Clone)]
pub struct RecordStat {
    pub service: String,
    pub ticker: String,
    pub channel_id: u16,
    pub msg_count: u32,
    pub first_offset: u64,
    pub last_offset: u64,
}

pub fn read_record_stat(buf: &[u8], bo: ByteOrderKind) -> RecordStat {
    let service = super::strutil::read_fixed_str(&buf[0..SLOT_SERVICE_LEN]);
    let ticker = super::strutil::read_fixed_str(&buf[SLOT_SERVICE_LEN..SLOT_SERVICE_LEN + SLOT_TICKER_LEN]);
    let mut off = SLOT_SERVICE_LEN + SLOT_TICKER_LEN;
    let channel_id = match bo {
        ByteOrderKind::Little => LittleEndian::read_u16(&buf[off..off + 2]),
        ByteOrderKind::Big => BigEndian::read_u16(&buf[off..off + 2]),
    };
    off += 2;
    let msg_count = read_u32(&buf[off..off + 4], bo);
    off += 4;
    let first_offset = read_u64(&buf[off..off + 8], bo);
    off += 8;
    let last_offset = read_u64(&buf[off..off + 8], bo);
    RecordStat { service, ticker, channel_id, msg_count, first_offset, last_offset }
}

pub fn write_record_stat(buf: &mut [u8], stat: &RecordStat, bo: ByteOrderKind) {
    super::strutil::write_fixed_str(&mut buf[0..SLOT_SERVICE_LEN], &stat.service);
    super::strutil::write_fixed_str(&mut buf[SLOT_SERVICE_LEN..SLOT_SERVICE_LEN + SLOT_TICKER_LEN], &stat.ticker);
    let mut off = SLOT_SERVICE_LEN + SLOT_TICKER_LEN;
    match bo {
        ByteOrderKind::Little => LittleEndian::write_u16(&mut buf[off..off + 2], stat.channel_id),
        ByteOrderKind::Big => BigEndian::write_u16(&mut buf[off..off + 2], stat.channel_id),
    }
    off += 2;
    write_u32(&mut buf[off..off + 4], stat.msg_count, bo);
    off += 4;
    write_u64(&mut buf[off..off + 8], stat.first_offset, bo);
    off += 8;
    write_u64(&mut buf[off..off + 8], stat.last_offset, bo);
}

/// `protocol` tag (which [`WireCodec`](rt_protocol::WireCodec) decodes the
/// payload), `record_index`, chain `back_pointer` (absolute file offset of
/// the previous message in the same record's chain,
/// [`NO_CHAIN_PREDECESSOR`] if none), `timestamp_ns`, and payload `length`.
#[derive(Debug, Clone, Copy)]
pub struct MessageFrameHeader {
    pub protocol: u8,
    pub record_index: u32,
    pub back_pointer: u64,
    pub timestamp_ns: i64,
    pub length: u32,
}

impl MessageFrameHeader {
    pub fn parse(buf: &[u8], bo: ByteOrderKind) -> Self {
        Self {
            protocol: buf[0],
            record_index: read_u32(&buf[1..5], bo),
            back_pointer: read_u64(&buf[5..13], bo),
            timestamp_ns: read_i64(&buf[13..21], bo),
            length: read_u32(&buf[21..25], bo),
        }
    }

    pub fn write_into(&self, buf: &mut [u8], bo: ByteOrderKind) {
        buf[0] = self.protocol;
        write_u32(&mut buf[1..5], self.record_index, bo);
        write_u64(&mut buf[5..13], self.back_pointer, bo);
        write_i64(&mut buf[13..21], self.timestamp_ns, bo);
        write_u32(&mut buf[21..25], self.length, bo);
    }
}

/// The bucket index `0..(86400/sec_per_idx)` a wall-clock timestamp falls
/// into, relative to midnight of the same day in UTC (§6.3).
pub fn bucket_for_timestamp(timestamp_ns: i64, sec_per_idx: u32) -> usize {
    let secs_in_day = (timestamp_ns / 1_000_000_000).rem_euclid(86_400);
    (secs_in_day as u32 / sec_per_idx) as usize
}

pub fn index_slot_count(sec_per_idx: u32) -> usize {
    (86_400 / sec_per_idx) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(long_width: u8, bo: ByteOrderKind) -> TapeHeader {
        TapeHeader {
            version: 1,
            byte_order: bo,
            long_width,
            created_at_unix_ns: 1_700_000_000_000_000_000,
            sec_per_idx_tape: DEFAULT_SEC_PER_IDX_TAPE,
            sec_per_idx_record: DEFAULT_SEC_PER_IDX_RECORD,
            dict_count: 3,
            record_count: 3,
            dict_offset: HEADER_LEN as u64,
            tape_index_offset: 9000,
            record_table_offset: 20000,
            message_stream_offset: 40000,
            next_write_offset: 50000,
        }
    }

    #[test]
    fn header_roundtrips_32bit_little_endian() {
        let h = sample_header(4, ByteOrderKind::Little);
        let mut buf = vec![0u8; HEADER_LEN];
        h.write_into(&mut buf);
        let parsed = TapeHeader::parse(&buf).unwrap();
        assert_eq!(parsed.record_table_offset, 20000);
        assert_eq!(parsed.long_width, 4);
    }

    #[test]
    fn header_roundtrips_64bit_big_endian() {
        let h = sample_header(8, ByteOrderKind::Big);
        let mut buf = vec![0u8; HEADER_LEN];
        h.write_into(&mut buf);
        let parsed = TapeHeader::parse(&buf).unwrap();
        assert_eq!(parsed.message_stream_offset, 40000);
        assert_eq!(parsed.byte_order, ByteOrderKind::Big);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; HEADER_LEN];
        assert!(matches!(TapeHeader::parse(&buf), Err(LayoutError::BadMagic)));
    }

    #[test]
    fn dict_entry_roundtrips() {
        let entry = DictEntry {
            service: "SVC".into(),
            ticker: "IBM".into(),
            channel_id: 7,
            record_index: 2,
            first_offset: 100,
            last_offset: 900,
        };
        let mut buf = vec![0u8; DICT_ENTRY_LEN];
        write_dict_entry(&mut buf, &entry, ByteOrderKind::Little);
        let parsed = read_dict_entry(&buf, ByteOrderKind::Little);
        assert_eq!(parsed.ticker, "IBM");
        assert_eq!(parsed.last_offset, 900);
    }

    #[test]
    fn message_frame_header_roundtrips() {
        let h = MessageFrameHeader { protocol: 1, record_index: 4, back_pointer: 1234, timestamp_ns: 999, length: 77 };
        let mut buf = vec![0u8; MESSAGE_FRAME_HEADER_LEN];
        h.write_into(&mut buf, ByteOrderKind::Little);
        let parsed = MessageFrameHeader::parse(&buf, ByteOrderKind::Little);
        assert_eq!(parsed.protocol, 1);
        assert_eq!(parsed.back_pointer, 1234);
        assert_eq!(parsed.length, 77);
    }

    #[test]
    fn bucket_for_timestamp_divides_day_into_equal_slots() {
        assert_eq!(bucket_for_timestamp(0, 60), 0);
        assert_eq!(bucket_for_timestamp(61_000_000_000, 60), 1);
        assert_eq!(index_slot_count(60), 1440);
    }
}
