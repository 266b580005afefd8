//! Memory-mapped, time-indexed append-only tape reader (§3.7, §4.11, §6.3).
//!
//! The tape file is written by a peer recorder; this crate only reads it.
//! [`TapeReader`] exposes linear replay (`read`), direct seek (`rewind`,
//! `rewind_to`), and four pump modes that differ in which index they walk:
//! full-tape (linear), per-ticker (record chain), time slice (tape-wide time
//! index), and sampled time slice (time index plus per-interval coalescing).

pub mod layout;
pub(crate) mod strutil;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::ByteOrder;
use layout::{
    ByteOrderKind, DictEntry, MessageFrameHeader, RecordStat, TapeHeader, MESSAGE_FRAME_HEADER_LEN,
    RECORD_STAT_LEN, RECORD_TIME_INDEX_SLOT_LEN, TAPE_INDEX_SLOT_LEN,
};
use rt_mmap::{MappedFile, OpenMode};
use rt_protocol::{BinaryCodec, CodecError, DecodeOutcome, Envelope, Protocol, WireCodec, codec_for};

#[derive(Debug, thiserror::Error)]
pub enum TapeError {
    #[error("mmap error: {0}")]
    Mmap(#[from] rt_mmap::MmapError),
    #[error("layout error: {0}")]
    Layout(#[from] layout::LayoutError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("unknown protocol tag {0}")]
    UnknownProtocol(u8),
    #[error("unknown ticker {service}:{ticker}")]
    UnknownTicker { service: String, ticker: String },
}

fn protocol_to_u8(p: Protocol) -> u8 {
    match p {
        Protocol::Binary => 0,
        Protocol::Mf => 1,
        Protocol::Xml => 2,
    }
}

fn protocol_from_u8(b: u8) -> Option<Protocol> {
    Some(match b {
        0 => Protocol::Binary,
        1 => Protocol::Mf,
        2 => Protocol::Xml,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Seek target for [`TapeReader::rewind_to`].
#[derive(Debug, Clone, Copy)]
pub enum SeekTarget {
    TimestampNs(i64),
    Offset(u64),
}

#[derive(Debug, Clone)]
pub struct TapeMessage {
    pub record_index: u32,
    pub timestamp_ns: i64,
    pub file_offset: u64,
    pub envelope: Envelope,
}

struct RecordEntry {
    stat: RecordStat,
    time_index: Vec<u64>,
}

pub struct TapeReader {
    mapped: MappedFile,
    header: TapeHeader,
    dict: Vec<DictEntry>,
    records: Vec<RecordEntry>,
    tape_index: Vec<(u64, u64)>,
    position: u64,
    direction: Direction,
    run: Arc<AtomicBool>,
}

impl TapeReader {
    pub fn open(path: &Path) -> Result<Self, TapeError> {
        let mut mapped = MappedFile::open(path, OpenMode::Read)?;
        let len = mapped.stat_len()? as usize;
        mapped.map(0, len)?;
        let header = {
            let bytes = mapped.as_slice()?;
            TapeHeader::parse(bytes)?
        };
        let bo = header.byte_order;

        let dict = {
            let bytes = mapped.as_slice()?;
            (0..header.dict_count as usize)
                .map(|i| {
                    let start = header.dict_offset as usize + i * layout::DICT_ENTRY_LEN;
                    layout::read_dict_entry(&bytes[start..start + layout::DICT_ENTRY_LEN], bo)
                })
                .collect()
        };

        let records = {
            let bytes = mapped.as_slice()?;
            let idx_slots = layout::index_slot_count(header.sec_per_idx_record);
            let stride = RECORD_STAT_LEN + idx_slots * RECORD_TIME_INDEX_SLOT_LEN;
            (0..header.record_count as usize)
                .map(|i| {
                    let start = header.record_table_offset as usize + i * stride;
                    let stat = layout::read_record_stat(&bytes[start..start + RECORD_STAT_LEN], bo);
                    let idx_start = start + RECORD_STAT_LEN;
                    let time_index = (0..idx_slots)
                        .map(|s| {
                            let off = idx_start + s * RECORD_TIME_INDEX_SLOT_LEN;
                            match bo {
                                ByteOrderKind::Little => {
                                    byteorder::LittleEndian::read_u64(&bytes[off..off + 8])
                                }
                                ByteOrderKind::Big => byteorder::BigEndian::read_u64(&bytes[off..off + 8]),
                            }
                        })
                        .collect();
                    RecordEntry { stat, time_index }
                })
                .collect()
        };

        let tape_index = {
            let bytes = mapped.as_slice()?;
            let slots = layout::index_slot_count(header.sec_per_idx_tape);
            (0..slots)
                .map(|i| {
                    let off = header.tape_index_offset as usize + i * TAPE_INDEX_SLOT_LEN;
                    layout::read_tape_index_slot(&bytes[off..off + TAPE_INDEX_SLOT_LEN], bo)
                })
                .collect()
        };

        let position = header.message_stream_offset;
        Ok(Self {
            mapped,
            header,
            dict,
            records,
            tape_index,
            position,
            direction: Direction::Forward,
            run: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn close(self) {}

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn rewind(&mut self) {
        self.position = self.header.message_stream_offset;
    }

    /// Current read cursor, a byte offset into the mapped file.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn rewind_to(&mut self, target: SeekTarget) -> Result<(), TapeError> {
        self.position = match target {
            SeekTarget::Offset(off) => off,
            SeekTarget::TimestampNs(ts) => self.locate_time_index(ts),
        };
        Ok(())
    }

    /// Walks the tape-wide time index forward from `ts`'s bucket until it
    /// finds a non-empty slot (§6.3: "each index bucket stores the byte
    /// offset of the first message with timestamp >= bucket start").
    fn locate_time_index(&self, ts: i64) -> u64 {
        let start_bucket = layout::bucket_for_timestamp(ts, self.header.sec_per_idx_tape);
        for (offset, _seqno) in self.tape_index.iter().skip(start_bucket) {
            if *offset != 0 {
                return *offset;
            }
        }
        self.header.next_write_offset
    }

    fn find_record_index(&self, service: &str, ticker: &str) -> Option<u32> {
        self.dict
            .iter()
            .find(|e| e.service == service && e.ticker == ticker)
            .map(|e| e.record_index)
    }

    fn frame_at(&self, offset: u64) -> Result<(MessageFrameHeader, &[u8], u64), TapeError> {
        let bytes = self.mapped.as_slice()?;
        let start = offset as usize;
        let header = MessageFrameHeader::parse(&bytes[start..start + MESSAGE_FRAME_HEADER_LEN], self.header.byte_order);
        let payload_start = start + MESSAGE_FRAME_HEADER_LEN;
        let payload = &bytes[payload_start..payload_start + header.length as usize];
        let next = (payload_start + header.length as usize) as u64;
        Ok((header, payload, next))
    }

    /// Reads the next message in wall-clock (file) order; `Ok(None)` at EOF.
    pub fn read(&mut self) -> Result<Option<TapeMessage>, TapeError> {
        if self.position >= self.header.next_write_offset {
            return Ok(None);
        }
        let offset = self.position;
        let (frame, payload, next) = self.frame_at(offset)?;
        let msg = self.decode(&frame, payload, offset)?;
        self.position = next;
        Ok(Some(msg))
    }

    /// Decodes one frame's payload with the codec named by its protocol tag.
    pub fn decode(&self, frame: &MessageFrameHeader, payload: &[u8], file_offset: u64) -> Result<TapeMessage, TapeError> {
        let protocol = protocol_from_u8(frame.protocol).ok_or(TapeError::UnknownProtocol(frame.protocol))?;
        let codec = codec_for(protocol);
        let envelope = match codec.decode(payload)? {
            DecodeOutcome::Message { envelope, .. } => envelope,
            DecodeOutcome::Incomplete => return Err(CodecError::Truncated.into()),
        };
        Ok(TapeMessage {
            record_index: frame.record_index,
            timestamp_ns: frame.timestamp_ns,
            file_offset,
            envelope,
        })
    }

    /// Cancels an active pump cooperatively; pumps poll this between messages.
    pub fn stop_tape(&self) {
        self.run.store(false, Ordering::SeqCst);
    }

    fn resume_running(&self) {
        self.run.store(true, Ordering::SeqCst);
    }

    /// Streams every message in file order starting at `start_offset`, up to
    /// `max_msgs`, invoking `on_message` for each. Stops early if
    /// [`stop_tape`](Self::stop_tape) is called from another thread between
    /// messages.
    pub fn pump_full_tape(
        &mut self,
        start_offset: u64,
        max_msgs: usize,
        mut on_message: impl FnMut(&TapeMessage),
    ) -> Result<usize, TapeError> {
        self.resume_running();
        self.position = start_offset;
        let mut delivered = 0;
        while delivered < max_msgs && self.run.load(Ordering::SeqCst) {
            match self.read()? {
                Some(msg) => {
                    on_message(&msg);
                    delivered += 1;
                }
                None => break,
            }
        }
        Ok(delivered)
    }

    /// Follows the per-record chain (§3.7) rather than linear file order.
    /// Forward walks head-to-tail via `first_offset`/stat chain entries
    /// already indexed on open; reverse walks tail-to-head using each
    /// frame's `back_pointer`.
    pub fn pump_ticker(
        &mut self,
        service: &str,
        ticker: &str,
        mut on_message: impl FnMut(&TapeMessage),
    ) -> Result<usize, TapeError> {
        self.resume_running();
        let record_index = self
            .find_record_index(service, ticker)
            .ok_or_else(|| TapeError::UnknownTicker { service: service.to_string(), ticker: ticker.to_string() })?;
        let stat = &self.records[record_index as usize].stat;
        let mut delivered = 0;

        match self.direction {
            Direction::Forward => {
                let mut offset = stat.first_offset;
                while offset != layout::NO_CHAIN_PREDECESSOR && self.run.load(Ordering::SeqCst) {
                    let (frame, payload, _next) = self.frame_at(offset)?;
                    let msg = self.decode(&frame, payload, offset)?;
                    on_message(&msg);
                    delivered += 1;
                    // Forward traversal follows ascending chain order; the
                    // next link for a given record is only discoverable by
                    // scanning subsequent frames for the same record_index,
                    // since only a back-pointer is stored per-frame.
                    offset = self.next_chain_offset(record_index, offset)?;
                }
            }
            Direction::Reverse => {
                let mut offset = stat.last_offset;
                while offset != layout::NO_CHAIN_PREDECESSOR && self.run.load(Ordering::SeqCst) {
                    let (frame, payload, _next) = self.frame_at(offset)?;
                    let msg = self.decode(&frame, payload, offset)?;
                    on_message(&msg);
                    delivered += 1;
                    offset = frame.back_pointer;
                }
            }
        }
        Ok(delivered)
    }

    /// Scans forward from `after` for the next frame belonging to
    /// `record_index`, used only by forward chain traversal.
    fn next_chain_offset(&self, record_index: u32, after: u64) -> Result<u64, TapeError> {
        let mut offset = after;
        loop {
            let (frame, _payload, next) = self.frame_at(offset)?;
            if next >= self.header.next_write_offset {
                return Ok(layout::NO_CHAIN_PREDECESSOR);
            }
            let (next_frame, _next_payload, _) = self.frame_at(next)?;
            if next_frame.record_index == record_index {
                return Ok(next);
            }
            offset = next;
            let _ = frame;
        }
    }

    /// Uses the tape-level time index to locate the first message at or
    /// after `t_start` and stops at `t_end` (§4.11).
    pub fn pump_tape_slice(
        &mut self,
        t_start: i64,
        t_end: i64,
        mut on_message: impl FnMut(&TapeMessage),
    ) -> Result<usize, TapeError> {
        self.resume_running();
        self.position = self.locate_time_index(t_start);
        let mut delivered = 0;
        while self.run.load(Ordering::SeqCst) {
            let Some(msg) = self.read()? else { break };
            if msg.timestamp_ns > t_end {
                break;
            }
            on_message(&msg);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Subsamples per-record: for each record, emits only the most recent
    /// update observed within each `interval`-sized bucket, restricted to
    /// `fields`.
    pub fn pump_tape_slice_sample(
        &mut self,
        t_start: i64,
        t_end: i64,
        interval_ns: i64,
        fields: &[u16],
        mut on_message: impl FnMut(&TapeMessage),
    ) -> Result<usize, TapeError> {
        self.resume_running();
        self.position = self.locate_time_index(t_start);
        let mut latest_per_bucket: HashMap<(u32, i64), TapeMessage> = HashMap::new();
        while self.run.load(Ordering::SeqCst) {
            let Some(mut msg) = self.read()? else { break };
            if msg.timestamp_ns > t_end {
                break;
            }
            if !fields.is_empty() {
                msg.envelope.fields.retain(|f| fields.contains(&f.id));
            }
            let bucket = (msg.timestamp_ns - t_start) / interval_ns.max(1);
            latest_per_bucket.insert((msg.record_index, bucket), msg);
        }
        let mut entries: Vec<_> = latest_per_bucket.into_values().collect();
        entries.sort_by_key(|m| m.timestamp_ns);
        for msg in &entries {
            on_message(msg);
        }
        Ok(entries.len())
    }

    pub fn dict(&self) -> &[DictEntry] {
        &self.dict
    }
}

/// Test/tool fixture construction: builds a well-formed tape file on disk.
/// The real writer is an external peer recorder (§9 non-goal: no
/// persistence ownership), so this only exists to give tests and
/// `tools/tape-dump` something real to read.
pub mod fixture {
    use super::*;
    use byteorder::LittleEndian;
    use rt_protocol::BinaryCodec;
    use std::io::Write as _;

    pub struct FixtureMessage {
        pub service: String,
        pub ticker: String,
        pub timestamp_ns: i64,
        pub envelope: Envelope,
    }

    /// Writes a tape with one dictionary entry / record per distinct
    /// `(service, ticker)` pair found in `messages`, chaining same-record
    /// frames via `back_pointer` in the order given.
    pub fn write_tape_file(path: &std::path::Path, messages: &[FixtureMessage]) {
        let codec = BinaryCodec::default();
        let sec_per_idx_tape = layout::DEFAULT_SEC_PER_IDX_TAPE;
        let sec_per_idx_record = layout::DEFAULT_SEC_PER_IDX_RECORD;
        let bo = ByteOrderKind::Little;

        let mut record_keys: Vec<(String, String)> = Vec::new();
        for m in messages {
            let key = (m.service.clone(), m.ticker.clone());
            if !record_keys.contains(&key) {
                record_keys.push(key);
            }
        }
        let idx_slots = layout::index_slot_count(sec_per_idx_record);
        let record_stride = RECORD_STAT_LEN + idx_slots * RECORD_TIME_INDEX_SLOT_LEN;
        let tape_idx_slots = layout::index_slot_count(sec_per_idx_tape);

        let dict_offset = layout::HEADER_LEN as u64;
        let tape_index_offset = dict_offset + record_keys.len() as u64 * layout::DICT_ENTRY_LEN as u64;
        let record_table_offset = tape_index_offset + tape_idx_slots as u64 * TAPE_INDEX_SLOT_LEN as u64;
        let message_stream_offset = record_table_offset + record_keys.len() as u64 * record_stride as u64;

        // Pre-encode every message's payload so exact frame offsets are known
        // up front (needed for chain/back-pointers and the dictionary).
        let mut last_offset_for_record: Vec<u64> = vec![layout::NO_CHAIN_PREDECESSOR; record_keys.len()];
        let mut first_offset_for_record: Vec<u64> = vec![layout::NO_CHAIN_PREDECESSOR; record_keys.len()];
        let mut msg_count_for_record: Vec<u32> = vec![0; record_keys.len()];
        let mut per_record_first_in_bucket: Vec<Vec<u64>> = vec![vec![0; idx_slots]; record_keys.len()];
        let mut tape_first_in_bucket: Vec<u64> = vec![0; tape_idx_slots];
        let mut tape_first_seqno: Vec<u64> = vec![0; tape_idx_slots];

        let mut frames: Vec<(u32, i64, Vec<u8>, u64)> = Vec::new(); // (record_index, ts, payload, back_pointer)
        let mut cursor = message_stream_offset;
        for (seqno, m) in messages.iter().enumerate() {
            let record_index = record_keys.iter().position(|k| *k == (m.service.clone(), m.ticker.clone())).unwrap() as u32;
            let encoded = codec.encode(&m.envelope).unwrap();
            let back_pointer = last_offset_for_record[record_index as usize];
            frames.push((record_index, m.timestamp_ns, encoded.clone(), back_pointer));

            if first_offset_for_record[record_index as usize] == layout::NO_CHAIN_PREDECESSOR {
                first_offset_for_record[record_index as usize] = cursor;
            }
            last_offset_for_record[record_index as usize] = cursor;
            msg_count_for_record[record_index as usize] += 1;

            let rbucket = layout::bucket_for_timestamp(m.timestamp_ns, sec_per_idx_record);
            if per_record_first_in_bucket[record_index as usize][rbucket] == 0 {
                per_record_first_in_bucket[record_index as usize][rbucket] = cursor;
            }
            let tbucket = layout::bucket_for_timestamp(m.timestamp_ns, sec_per_idx_tape);
            if tape_first_in_bucket[tbucket] == 0 {
                tape_first_in_bucket[tbucket] = cursor;
                tape_first_seqno[tbucket] = seqno as u64;
            }

            cursor += MESSAGE_FRAME_HEADER_LEN as u64 + encoded.len() as u64;
        }
        let next_write_offset = cursor;
        let schema_unused_tail = 0u64; // no trailing schema block for tape files

        let total_len = (next_write_offset + schema_unused_tail) as usize;
        let mut buf = vec![0u8; total_len];

        let header = TapeHeader {
            version: 1,
            byte_order: bo,
            long_width: 8,
            created_at_unix_ns: messages.first().map(|m| m.timestamp_ns).unwrap_or(0),
            sec_per_idx_tape,
            sec_per_idx_record,
            dict_count: record_keys.len() as u32,
            record_count: record_keys.len() as u32,
            dict_offset,
            tape_index_offset,
            record_table_offset,
            message_stream_offset,
            next_write_offset,
        };
        header.write_into(&mut buf);

        for (i, (service, ticker)) in record_keys.iter().enumerate() {
            let entry = DictEntry {
                service: service.clone(),
                ticker: ticker.clone(),
                channel_id: 0,
                record_index: i as u32,
                first_offset: first_offset_for_record[i],
                last_offset: last_offset_for_record[i],
            };
            let start = dict_offset as usize + i * layout::DICT_ENTRY_LEN;
            layout::write_dict_entry(&mut buf[start..start + layout::DICT_ENTRY_LEN], &entry, bo);
        }

        for (bucket, (offset, seqno)) in tape_first_in_bucket.iter().zip(tape_first_seqno.iter()).enumerate() {
            let start = tape_index_offset as usize + bucket * TAPE_INDEX_SLOT_LEN;
            layout::write_tape_index_slot(&mut buf[start..start + TAPE_INDEX_SLOT_LEN], *offset, *seqno, bo);
        }

        for (i, (service, ticker)) in record_keys.iter().enumerate() {
            let stat = RecordStat {
                service: service.clone(),
                ticker: ticker.clone(),
                channel_id: 0,
                msg_count: msg_count_for_record[i],
                first_offset: first_offset_for_record[i],
                last_offset: last_offset_for_record[i],
            };
            let start = record_table_offset as usize + i * record_stride;
            layout::write_record_stat(&mut buf[start..start + RECORD_STAT_LEN], &stat, bo);
            for (slot, offset) in per_record_first_in_bucket[i].iter().enumerate() {
                let off = start + RECORD_STAT_LEN + slot * RECORD_TIME_INDEX_SLOT_LEN;
                LittleEndian::write_u64(&mut buf[off..off + 8], *offset);
            }
        }

        let mut write_cursor = message_stream_offset;
        for (record_index, ts, payload, back_pointer) in &frames {
            let frame = MessageFrameHeader {
                protocol: protocol_to_u8(Protocol::Binary),
                record_index: *record_index,
                back_pointer: *back_pointer,
                timestamp_ns: *ts,
                length: payload.len() as u32,
            };
            let start = write_cursor as usize;
            frame.write_into(&mut buf[start..start + MESSAGE_FRAME_HEADER_LEN], bo);
            let payload_start = start + MESSAGE_FRAME_HEADER_LEN;
            buf[payload_start..payload_start + payload.len()].copy_from_slice(payload);
            write_cursor += MESSAGE_FRAME_HEADER_LEN as u64 + payload.len() as u64;
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }
}
