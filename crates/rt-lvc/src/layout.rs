//! On-disk layout of the LVC file (§3.6, §6.2): fixed header, embedded
//! schema block, and a dense table of fixed-stride records.
//!
//! The per-field encoding inside a slot's field image is this crate's own
//! choice (the spec names the slot's outer shape only): each schema field
//! gets a fixed-size cell sized from its `max_len`/type, a 1-byte wire tag
//! followed by a type-dependent payload, so a slot's total size is knowable
//! from the schema alone without scanning the file.

use byteorder::{ByteOrder, LittleEndian};
use rt_protocol::{WireTag, WireValue};
use rt_schema::{FieldType, Schema};

pub const MAGIC: &[u8; 16] = b"RTEDGE_LVC_V001\0";
pub const HEADER_LEN: usize = 4096; // page-aligned per §6.2 "reserved padding to page align"

pub const OFF_MAGIC: usize = 0;
pub const OFF_VERSION: usize = 16;
pub const OFF_RECORD_STRIDE: usize = 20;
pub const OFF_RECORD_COUNT: usize = 24;
pub const OFF_RECORD_TABLE_OFFSET: usize = 28;
pub const OFF_SCHEMA_OFFSET: usize = 36;
pub const OFF_SCHEMA_LENGTH: usize = 44;

pub const SLOT_SERVICE_LEN: usize = 32;
pub const SLOT_TICKER_LEN: usize = 64;
/// seq(8) + service(32) + ticker(64) + last_msg_time(8) + update_count(4) +
/// active(1), padded to an 8-byte boundary.
pub const SLOT_HEADER_LEN: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct LvcHeader {
    pub version: u32,
    pub record_stride: u32,
    pub record_count: u32,
    pub record_table_offset: u64,
    pub schema_offset: u64,
    pub schema_length: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("file too short to hold a header")]
    Truncated,
    #[error("bad magic: expected {expected:?}, file has {found:?}")]
    BadMagic { expected: [u8; 16], found: [u8; 16] },
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
}

impl LvcHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < HEADER_LEN {
            return Err(LayoutError::Truncated);
        }
        let mut found = [0u8; 16];
        found.copy_from_slice(&buf[OFF_MAGIC..OFF_MAGIC + 16]);
        if &found != MAGIC {
            return Err(LayoutError::BadMagic { expected: *MAGIC, found });
        }
        let version = LittleEndian::read_u32(&buf[OFF_VERSION..]);
        if version != 1 {
            return Err(LayoutError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            record_stride: LittleEndian::read_u32(&buf[OFF_RECORD_STRIDE..]),
            record_count: LittleEndian::read_u32(&buf[OFF_RECORD_COUNT..]),
            record_table_offset: LittleEndian::read_u64(&buf[OFF_RECORD_TABLE_OFFSET..]),
            schema_offset: LittleEndian::read_u64(&buf[OFF_SCHEMA_OFFSET..]),
            schema_length: LittleEndian::read_u32(&buf[OFF_SCHEMA_LENGTH..]),
        })
    }

    pub fn write_into(&self, buf: &mut [u8]) {
        buf[OFF_MAGIC..OFF_MAGIC + 16].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut buf[OFF_VERSION..], self.version);
        LittleEndian::write_u32(&mut buf[OFF_RECORD_STRIDE..], self.record_stride);
        LittleEndian::write_u32(&mut buf[OFF_RECORD_COUNT..], self.record_count);
        LittleEndian::write_u64(&mut buf[OFF_RECORD_TABLE_OFFSET..], self.record_table_offset);
        LittleEndian::write_u64(&mut buf[OFF_SCHEMA_OFFSET..], self.schema_offset);
        LittleEndian::write_u32(&mut buf[OFF_SCHEMA_LENGTH..], self.schema_length);
    }
}

/// One schema field's cell within a slot's field-image region.
#[derive(Debug, Clone, Copy)]
pub struct FieldCell {
    pub id: u16,
    pub offset: usize,
    pub size: usize,
}

/// The field-image layout derived from a schema: stable, deterministic, and
/// shared by every slot in the file (computed once when the file is
/// created; readers recompute it from the embedded schema).
#[derive(Debug, Clone)]
pub struct FieldImageLayout {
    pub cells: Vec<FieldCell>,
    pub total_len: usize,
}

fn cell_size(ty: FieldType, max_len: u32) -> usize {
    match ty {
        FieldType::String | FieldType::ByteStream => 3 + max_len as usize, // tag + u16 len + bytes
        FieldType::VectorDouble => 4 + (max_len as usize) * 8,
        FieldType::VectorTimed => 4 + (max_len as usize) * 16,
        _ => 9, // tag + 8-byte payload, enough for every scalar variant
    }
}

impl FieldImageLayout {
    pub fn from_schema(schema: &Schema) -> Self {
        let mut offset = 0usize;
        let mut cells = Vec::with_capacity(schema.len());
        for def in schema.iter_by_id() {
            let size = cell_size(def.ty, def.max_len);
            cells.push(FieldCell { id: def.id, offset, size });
            offset += size;
        }
        Self { cells, total_len: offset }
    }

    pub fn cell_for(&self, id: u16) -> Option<&FieldCell> {
        self.cells.iter().find(|c| c.id == id)
    }

    /// Encode one field's value into its cell within `region` (the slot's
    /// field-image bytes). Silently a no-op if the field has no cell (not
    /// in schema) — the caller should only be offering schema fields.
    pub fn encode_into(&self, region: &mut [u8], id: u16, value: &WireValue) {
        let Some(cell) = self.cell_for(id) else { return };
        let buf = &mut region[cell.offset..cell.offset + cell.size];
        buf[0] = value.tag() as u8;
        encode_payload(&mut buf[1..], value);
    }

    /// Decode one field's cell, returning `None` if its tag is `Undefined`
    /// (never written / explicitly cleared).
    pub fn decode_from(&self, region: &[u8], id: u16, exponent: Option<i8>) -> Option<WireValue> {
        let cell = self.cell_for(id)?;
        let buf = &region[cell.offset..cell.offset + cell.size];
        let tag = WireTag::from_u8(buf[0])?;
        if tag == WireTag::Undefined {
            return None;
        }
        Some(decode_payload(tag, &buf[1..], exponent))
    }
}

fn encode_payload(buf: &mut [u8], value: &WireValue) {
    match value {
        WireValue::Undefined => {}
        WireValue::Str(b) | WireValue::ByteStreamRef(b) => {
            let len = b.len().min(buf.len().saturating_sub(2));
            LittleEndian::write_u16(buf, len as u16);
            buf[2..2 + len].copy_from_slice(&b[..len]);
        }
        WireValue::I8(n) => buf[0] = *n as u8,
        WireValue::I16(n) => LittleEndian::write_i16(buf, *n),
        WireValue::I32(n) => LittleEndian::write_i32(buf, *n),
        WireValue::I64(n) => LittleEndian::write_i64(buf, *n),
        WireValue::F32(n) => LittleEndian::write_f32(buf, *n),
        WireValue::F64(n) => LittleEndian::write_f64(buf, *n),
        WireValue::UnixTime(n) => LittleEndian::write_i64(buf, *n),
        WireValue::Real { mantissa, .. } => LittleEndian::write_i64(buf, *mantissa),
        WireValue::Date { year, month, day } => {
            LittleEndian::write_u16(buf, *year);
            buf[2] = *month;
            buf[3] = *day;
        }
        WireValue::Time { hour, minute, sec, millis } => {
            buf[0] = *hour;
            buf[1] = *minute;
            buf[2] = *sec;
            LittleEndian::write_u16(&mut buf[3..], *millis);
        }
        WireValue::TimeSeconds { hour, minute, sec } => {
            buf[0] = *hour;
            buf[1] = *minute;
            buf[2] = *sec;
        }
        WireValue::VectorDouble { precision, values } => {
            let max_n = (buf.len() - 3) / 8;
            let n = values.len().min(max_n);
            buf[0] = *precision;
            LittleEndian::write_u16(&mut buf[1..], n as u16);
            for (i, v) in values.iter().take(n).enumerate() {
                LittleEndian::write_f64(&mut buf[3 + i * 8..], *v);
            }
        }
        WireValue::VectorTimed { precision, times, values } => {
            let max_n = (buf.len() - 3) / 16;
            let n = values.len().min(times.len()).min(max_n);
            buf[0] = *precision;
            LittleEndian::write_u16(&mut buf[1..], n as u16);
            for (i, t) in times.iter().take(n).enumerate() {
                LittleEndian::write_i64(&mut buf[3 + i * 16..], *t);
            }
            for (i, v) in values.iter().take(n).enumerate() {
                LittleEndian::write_f64(&mut buf[3 + i * 16 + 8..], *v);
            }
        }
    }
}

fn decode_payload(tag: WireTag, buf: &[u8], exponent: Option<i8>) -> WireValue {
    match tag {
        WireTag::Undefined => WireValue::Undefined,
        WireTag::Str | WireTag::ByteStreamRef => {
            let len = LittleEndian::read_u16(buf) as usize;
            let bytes = buf[2..2 + len].to_vec();
            if tag == WireTag::Str { WireValue::Str(bytes) } else { WireValue::ByteStreamRef(bytes) }
        }
        WireTag::I8 => WireValue::I8(buf[0] as i8),
        WireTag::I16 => WireValue::I16(LittleEndian::read_i16(buf)),
        WireTag::I32 => WireValue::I32(LittleEndian::read_i32(buf)),
        WireTag::I64 => WireValue::I64(LittleEndian::read_i64(buf)),
        WireTag::F32 => WireValue::F32(LittleEndian::read_f32(buf)),
        WireTag::F64 => WireValue::F64(LittleEndian::read_f64(buf)),
        WireTag::UnixTime => WireValue::UnixTime(LittleEndian::read_i64(buf)),
        WireTag::Real => WireValue::Real { mantissa: LittleEndian::read_i64(buf), exponent: exponent.unwrap_or(0) },
        WireTag::Date => WireValue::Date { year: LittleEndian::read_u16(buf), month: buf[2], day: buf[3] },
        WireTag::Time => WireValue::Time {
            hour: buf[0],
            minute: buf[1],
            sec: buf[2],
            millis: LittleEndian::read_u16(&buf[3..]),
        },
        WireTag::TimeSeconds => WireValue::TimeSeconds { hour: buf[0], minute: buf[1], sec: buf[2] },
        WireTag::VectorDouble => {
            let precision = buf[0];
            let n = LittleEndian::read_u16(&buf[1..]) as usize;
            let values = (0..n).map(|i| LittleEndian::read_f64(&buf[3 + i * 8..])).collect();
            WireValue::VectorDouble { precision, values }
        }
        WireTag::VectorTimed => {
            let precision = buf[0];
            let n = LittleEndian::read_u16(&buf[1..]) as usize;
            let times = (0..n).map(|i| LittleEndian::read_i64(&buf[3 + i * 16..])).collect();
            let values = (0..n).map(|i| LittleEndian::read_f64(&buf[3 + i * 16 + 8..])).collect();
            WireValue::VectorTimed { precision, times, values }
        }
    }
}

pub fn write_fixed_str(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[n..] {
        *b = 0;
    }
}

pub fn read_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_bytes() {
        let h = LvcHeader {
            version: 1,
            record_stride: 256,
            record_count: 10,
            record_table_offset: HEADER_LEN as u64,
            schema_offset: 64,
            schema_length: 40,
        };
        let mut buf = vec![0u8; HEADER_LEN];
        h.write_into(&mut buf);
        let parsed = LvcHeader::parse(&buf).unwrap();
        assert_eq!(parsed.record_stride, 256);
        assert_eq!(parsed.record_count, 10);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; HEADER_LEN];
        assert!(matches!(LvcHeader::parse(&buf), Err(LayoutError::BadMagic { .. })));
    }

    #[test]
    fn field_image_layout_roundtrips_scalar_and_string() {
        let schema = Schema::parse("BID 1 PRICE 12|SYM 2 ALPHANUMERIC 8").unwrap();
        let layout = FieldImageLayout::from_schema(&schema);
        let mut region = vec![0u8; layout.total_len];
        layout.encode_into(&mut region, 1, &WireValue::F64(100.25));
        layout.encode_into(&mut region, 2, &WireValue::Str(b"IBM".to_vec()));
        assert_eq!(layout.decode_from(&region, 1, None), Some(WireValue::F64(100.25)));
        assert_eq!(layout.decode_from(&region, 2, None), Some(WireValue::Str(b"IBM".to_vec())));
    }

    #[test]
    fn fixed_str_roundtrips_and_pads_with_zeros() {
        let mut buf = [0xFFu8; 16];
        write_fixed_str(&mut buf, "IBM");
        assert_eq!(read_fixed_str(&buf), "IBM");
    }
}
