//! Memory-mapped last-value cache reader (§3.6, §4.10, §6.2).
//!
//! The LVC file is written by a peer process; this crate only reads it. Two
//! consistency modes are offered per §4.10: [`LvcReader::view`] uses
//! optimistic sequence-lock retry (cheap, may report `stale` under
//! contention) and [`LvcReader::snap`] serializes same-process readers
//! through an internal mutex before retrying, trading a little throughput
//! for never spinning unbounded.

pub mod layout;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};
use layout::{FieldImageLayout, LvcHeader, SLOT_HEADER_LEN, SLOT_SERVICE_LEN, SLOT_TICKER_LEN};
use rt_mmap::{MappedFile, OpenMode};
use rt_protocol::Field;
use rt_schema::Schema;

/// Byte offset of the one-byte "active" flag within a slot's fixed header:
/// seq(8) + service(32) + ticker(64) + last_msg_time(8) + update_count(4).
const SLOT_ACTIVE_OFFSET: usize = 8 + SLOT_SERVICE_LEN + SLOT_TICKER_LEN + 8 + 4;

const _: () = assert!(SLOT_ACTIVE_OFFSET < SLOT_HEADER_LEN);

#[derive(Debug, thiserror::Error)]
pub enum LvcError {
    #[error("mmap error: {0}")]
    Mmap(#[from] rt_mmap::MmapError),
    #[error("layout error: {0}")]
    Layout(#[from] layout::LayoutError),
    #[error("schema error: {0}")]
    Schema(#[from] rt_schema::SchemaError),
    #[error("schema block is not valid utf8")]
    SchemaNotUtf8,
}

/// How many times [`LvcReader::view`] retries a torn sequence-lock read
/// before giving up and returning the last-observed state with `stale: true`
/// (§4.10, §7 "LVC slot sequence-lock exhaustion").
pub const VIEW_RETRY_BUDGET: u32 = 16;

/// A hard ceiling on [`LvcReader::snap`]'s retry loop — the source spins
/// under its internal lock, but an unconditional infinite spin is not
/// something a library should ever do; this is generous enough that a
/// well-behaved writer never comes close.
const SNAP_RETRY_CEILING: u32 = 100_000;

pub struct SnapResult {
    pub fields: Vec<Field>,
    pub stale: bool,
}

pub struct RecordView {
    pub service: String,
    pub ticker: String,
    pub fields: Vec<Field>,
    pub stale: bool,
}

/// Projects both the field axis and the service axis (§4.10 `SetFilter`).
#[derive(Default, Clone)]
pub struct Filter {
    pub field_names: Option<HashSet<String>>,
    pub service_names: Option<HashSet<String>>,
}

impl Filter {
    pub fn allows_service(&self, service: &str) -> bool {
        self.service_names.as_ref().is_none_or(|set| set.contains(service))
    }

    pub fn allows_field(&self, name: &str) -> bool {
        self.field_names.as_ref().is_none_or(|set| set.contains(name))
    }
}

/// A read-only snapshot of reader-visible aggregate state (§4.10
/// "Supplemented features": LVCStatMon-style admin query).
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub record_count: u32,
    pub active_count: u32,
    pub schema_field_count: usize,
    pub last_writer_sequence: u64,
}

pub struct LvcReader {
    mapped: MappedFile,
    header: LvcHeader,
    schema: Schema,
    field_layout: FieldImageLayout,
    filter: Filter,
    snap_lock: Mutex<()>,
}

impl LvcReader {
    pub fn open(path: &Path) -> Result<Self, LvcError> {
        let mut mapped = MappedFile::open(path, OpenMode::Read)?;
        let len = mapped.stat_len()? as usize;
        mapped.map(0, len)?;
        let header = {
            let bytes = mapped.as_slice()?;
            LvcHeader::parse(bytes)?
        };
        let schema = {
            let bytes = mapped.as_slice()?;
            let start = header.schema_offset as usize;
            let end = start + header.schema_length as usize;
            let text = std::str::from_utf8(&bytes[start..end]).map_err(|_| LvcError::SchemaNotUtf8)?;
            Schema::parse(text)?
        };
        let field_layout = FieldImageLayout::from_schema(&schema);
        Ok(Self {
            mapped,
            header,
            schema,
            field_layout,
            filter: Filter::default(),
            snap_lock: Mutex::new(()),
        })
    }

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    pub fn set_filter(&mut self, field_names: Option<HashSet<String>>, service_names: Option<HashSet<String>>) {
        self.filter = Filter { field_names, service_names };
    }

    fn slot_bytes(&self, index: u32) -> Result<&[u8], LvcError> {
        let bytes = self.mapped.as_slice()?;
        let start = self.header.record_table_offset as usize + index as usize * self.header.record_stride as usize;
        Ok(&bytes[start..start + self.header.record_stride as usize])
    }

    fn find_slot(&self, service: &str, ticker: &str) -> Result<Option<u32>, LvcError> {
        for i in 0..self.header.record_count {
            let slot = self.slot_bytes(i)?;
            if slot[SLOT_ACTIVE_OFFSET] == 0 {
                continue; // inactive
            }
            let svc = layout::read_fixed_str(&slot[8..8 + SLOT_SERVICE_LEN]);
            let tkr = layout::read_fixed_str(&slot[8 + SLOT_SERVICE_LEN..8 + SLOT_SERVICE_LEN + SLOT_TICKER_LEN]);
            if svc == service && tkr == ticker {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn read_sequence(&self, slot: &[u8]) -> u64 {
        LittleEndian::read_u64(&slot[0..8])
    }

    fn decode_slot_fields(&self, slot: &[u8]) -> Vec<Field> {
        let region = &slot[SLOT_HEADER_LEN..];
        self.field_layout
            .cells
            .iter()
            .filter_map(|cell| {
                let def = self.schema.by_id(cell.id)?;
                if !self.filter.allows_field(&def.name) {
                    return None;
                }
                self.field_layout
                    .decode_from(region, cell.id, def.exponent)
                    .map(|v| Field::new(cell.id, v))
            })
            .collect()
    }

    /// One sequence-lock consistent read attempt: `s1`, copy, `s2`; caller
    /// decides what "inconsistent" means for its own retry policy.
    fn read_once(&self, index: u32) -> Result<(u64, u64, Vec<Field>, String, String), LvcError> {
        let slot = self.slot_bytes(index)?;
        let s1 = self.read_sequence(slot);
        let svc = layout::read_fixed_str(&slot[8..8 + SLOT_SERVICE_LEN]);
        let tkr = layout::read_fixed_str(&slot[8 + SLOT_SERVICE_LEN..8 + SLOT_SERVICE_LEN + SLOT_TICKER_LEN]);
        let fields = self.decode_slot_fields(slot);
        let slot_again = self.slot_bytes(index)?;
        let s2 = self.read_sequence(slot_again);
        Ok((s1, s2, fields, svc, tkr))
    }

    /// Optimistic sequence-lock read with a bounded retry budget (§4.10).
    pub fn view(&self, service: &str, ticker: &str) -> Result<Option<RecordView>, LvcError> {
        if !self.filter.allows_service(service) {
            return Ok(None);
        }
        let Some(index) = self.find_slot(service, ticker)? else {
            return Ok(None);
        };
        let mut last = None;
        for _ in 0..VIEW_RETRY_BUDGET {
            let (s1, s2, fields, svc, tkr) = self.read_once(index)?;
            if s1 == s2 && s1 % 2 == 0 {
                return Ok(Some(RecordView { service: svc, ticker: tkr, fields, stale: false }));
            }
            last = Some((svc, tkr, fields));
        }
        let (svc, tkr, fields) = last.expect("budget > 0");
        Ok(Some(RecordView { service: svc, ticker: tkr, fields, stale: true }))
    }

    /// Mutex-serialized read: other same-process `snap` callers queue behind
    /// each other, then each retries the sequence lock against the writer
    /// until consistent (bounded by [`SNAP_RETRY_CEILING`] as a safety net).
    pub fn snap(&self, service: &str, ticker: &str) -> Result<Option<SnapResult>, LvcError> {
        if !self.filter.allows_service(service) {
            return Ok(None);
        }
        let _guard = self.snap_lock.lock().unwrap();
        let Some(index) = self.find_slot(service, ticker)? else {
            return Ok(None);
        };
        for _ in 0..SNAP_RETRY_CEILING {
            let (s1, s2, fields, ..) = self.read_once(index)?;
            if s1 == s2 && s1 % 2 == 0 {
                return Ok(Some(SnapResult { fields, stale: false }));
            }
        }
        let (_, _, fields, ..) = self.read_once(index)?;
        Ok(Some(SnapResult { fields, stale: true }))
    }

    fn all_active_indices(&self) -> Result<Vec<u32>, LvcError> {
        let mut out = Vec::new();
        for i in 0..self.header.record_count {
            let slot = self.slot_bytes(i)?;
            if slot[SLOT_ACTIVE_OFFSET] != 0 {
                out.push(i);
            }
        }
        Ok(out)
    }

    pub fn view_all(&self) -> Result<Vec<RecordView>, LvcError> {
        let mut out = Vec::new();
        self.view_all_safe(&mut out)?;
        Ok(out)
    }

    pub fn snap_all(&self) -> Result<Vec<RecordView>, LvcError> {
        let mut out = Vec::new();
        self.snap_all_safe(&mut out)?;
        Ok(out)
    }

    /// Like [`view_all`](Self::view_all) but deep-copies into a
    /// caller-supplied, reusable container (§4.10 `ViewAll_safe`) to avoid a
    /// fresh allocation on every call.
    pub fn view_all_safe(&self, dst: &mut Vec<RecordView>) -> Result<(), LvcError> {
        dst.clear();
        for index in self.all_active_indices()? {
            let slot = self.slot_bytes(index)?;
            let svc = layout::read_fixed_str(&slot[8..8 + SLOT_SERVICE_LEN]);
            if !self.filter.allows_service(&svc) {
                continue;
            }
            if let Some(view) = self.view(&svc, &layout::read_fixed_str(&slot[8 + SLOT_SERVICE_LEN..8 + SLOT_SERVICE_LEN + SLOT_TICKER_LEN]))? {
                dst.push(view);
            }
        }
        Ok(())
    }

    pub fn snap_all_safe(&self, dst: &mut Vec<RecordView>) -> Result<(), LvcError> {
        dst.clear();
        for index in self.all_active_indices()? {
            let slot = self.slot_bytes(index)?;
            let svc = layout::read_fixed_str(&slot[8..8 + SLOT_SERVICE_LEN]);
            let tkr = layout::read_fixed_str(&slot[8 + SLOT_SERVICE_LEN..8 + SLOT_SERVICE_LEN + SLOT_TICKER_LEN]);
            if !self.filter.allows_service(&svc) {
                continue;
            }
            if let Some(snap) = self.snap(&svc, &tkr)? {
                dst.push(RecordView { service: svc, ticker: tkr, fields: snap.fields, stale: snap.stale });
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<Stats, LvcError> {
        let mut active = 0u32;
        let mut max_seq = 0u64;
        for i in 0..self.header.record_count {
            let slot = self.slot_bytes(i)?;
            if slot[SLOT_ACTIVE_OFFSET] != 0 {
                active += 1;
            }
            max_seq = max_seq.max(self.read_sequence(slot));
        }
        Ok(Stats {
            record_count: self.header.record_count,
            active_count: active,
            schema_field_count: self.schema.len(),
            last_writer_sequence: max_seq,
        })
    }
}

/// Test/tool fixture construction: builds a well-formed LVC file on disk so
/// `LvcReader` and `tools/lvc-dump` have something real to exercise without
/// depending on a live peer writer.
pub mod fixture {
    use super::*;
    use rt_protocol::WireValue;
    use std::io::Write as _;

    pub struct FixtureRecord {
        pub service: String,
        pub ticker: String,
        pub fields: Vec<(u16, WireValue)>,
        pub update_count: u32,
        pub last_msg_time: i64,
    }

    pub fn write_lvc_file(path: &std::path::Path, schema_blob: &str, records: &[FixtureRecord]) {
        let schema = Schema::parse(schema_blob).unwrap();
        let layout = FieldImageLayout::from_schema(&schema);
        let stride = layout::SLOT_HEADER_LEN + layout.total_len;
        let record_table_offset = layout::HEADER_LEN as u64;
        let schema_offset = record_table_offset + stride as u64 * records.len() as u64;
        let schema_bytes = schema_blob.as_bytes();

        let total_len = schema_offset as usize + schema_bytes.len();
        let mut buf = vec![0u8; total_len];

        let header = LvcHeader {
            version: 1,
            record_stride: stride as u32,
            record_count: records.len() as u32,
            record_table_offset,
            schema_offset,
            schema_length: schema_bytes.len() as u32,
        };
        header.write_into(&mut buf);
        buf[schema_offset as usize..schema_offset as usize + schema_bytes.len()].copy_from_slice(schema_bytes);

        for (i, rec) in records.iter().enumerate() {
            let slot_start = record_table_offset as usize + i * stride;
            let slot = &mut buf[slot_start..slot_start + stride];
            LittleEndian::write_u64(&mut slot[0..8], 2); // even sequence: consistent
            layout::write_fixed_str(&mut slot[8..8 + layout::SLOT_SERVICE_LEN], &rec.service);
            layout::write_fixed_str(
                &mut slot[8 + layout::SLOT_SERVICE_LEN..8 + layout::SLOT_SERVICE_LEN + layout::SLOT_TICKER_LEN],
                &rec.ticker,
            );
            let time_off = 8 + layout::SLOT_SERVICE_LEN + layout::SLOT_TICKER_LEN;
            LittleEndian::write_i64(&mut slot[time_off..time_off + 8], rec.last_msg_time);
            LittleEndian::write_u32(&mut slot[time_off + 8..time_off + 12], rec.update_count);
            slot[time_off + 12] = 1; // active
            let region = &mut slot[layout::SLOT_HEADER_LEN..];
            for (id, value) in &rec.fields {
                layout.encode_into(region, *id, value);
            }
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }
}
