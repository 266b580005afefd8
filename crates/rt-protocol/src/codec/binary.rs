//! Binary wire encoding (§6.1): a fixed envelope header followed by a
//! type-tagged field list.
//!
//! Layout, all integers little-endian:
//! ```text
//! magic   "RTMD"          4 bytes
//! version u8              1 byte   (currently 1)
//! msgtype u8               1 byte
//! flags   u16              2 bytes  (bit0: 8-byte lengths, else 4-byte)
//! svc_len u16 / svc bytes
//! tkr_len u16 / tkr bytes
//! stream_id u32
//! field_count u32
//! fields...
//! ```
//! Each field is `<id:u16><tag:u8><payload>`, where the payload's own
//! length prefix (when variable-length) is 4 bytes, or 8 bytes when
//! `flags & FLAG_WIDE_LEN` is set — the long form exists for byte-stream and
//! vector fields large enough to need it (§4.12).

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{CodecError, DecodeOutcome, WireCodec};
use crate::envelope::{Envelope, MessageType};
use crate::field::{Field, WireTag, WireValue};

const MAGIC: &[u8; 4] = b"RTMD";
const VERSION: u8 = 1;
const FLAG_WIDE_LEN: u16 = 0x0001;

pub struct BinaryCodec {
    /// When set, variable-length field payloads use 8-byte length prefixes
    /// instead of 4. Chosen once per session at construction (§4.12).
    pub wide_len: bool,
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self { wide_len: false }
    }
}

fn read_u16(buf: &[u8], off: usize) -> Result<u16, CodecError> {
    if off + 2 > buf.len() {
        return Err(CodecError::Truncated);
    }
    Ok(LittleEndian::read_u16(&buf[off..off + 2]))
}

fn read_u32(buf: &[u8], off: usize) -> Result<u32, CodecError> {
    if off + 4 > buf.len() {
        return Err(CodecError::Truncated);
    }
    Ok(LittleEndian::read_u32(&buf[off..off + 4]))
}

fn read_u64(buf: &[u8], off: usize) -> Result<u64, CodecError> {
    if off + 8 > buf.len() {
        return Err(CodecError::Truncated);
    }
    Ok(LittleEndian::read_u64(&buf[off..off + 8]))
}

fn read_len(buf: &[u8], off: usize, wide: bool) -> Result<(u64, usize), CodecError> {
    if wide {
        Ok((read_u64(buf, off)?, 8))
    } else {
        Ok((read_u32(buf, off)? as u64, 4))
    }
}

fn push_len(out: &mut Vec<u8>, len: u64, wide: bool) {
    if wide {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, len);
        out.extend_from_slice(&b);
    } else {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, len as u32);
        out.extend_from_slice(&b);
    }
}

impl WireCodec for BinaryCodec {
    fn encode(&self, env: &Envelope) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::new();
        // svc/tkr
        body.extend_from_slice(&(env.svc.len() as u16).to_le_bytes());
        body.extend_from_slice(env.svc.as_bytes());
        body.extend_from_slice(&(env.tkr.len() as u16).to_le_bytes());
        body.extend_from_slice(env.tkr.as_bytes());
        body.extend_from_slice(&env.stream_id.to_le_bytes());
        body.extend_from_slice(&(env.fields.len() as u32).to_le_bytes());
        for field in &env.fields {
            body.extend_from_slice(&field.id.to_le_bytes());
            body.push(field.value.tag() as u8);
            encode_value(&mut body, &field.value, self.wide_len);
        }

        let mut out = Vec::with_capacity(body.len() + 12);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(env.msg_type.to_byte());
        let flags = if self.wide_len { FLAG_WIDE_LEN } else { 0 };
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, buf: &[u8]) -> Result<DecodeOutcome, CodecError> {
        if buf.len() < 4 {
            return Ok(DecodeOutcome::Incomplete);
        }
        if &buf[0..4] != MAGIC {
            return Err(CodecError::MalformedEnvelope("bad magic".into()));
        }
        if buf.len() < 8 {
            return Ok(DecodeOutcome::Incomplete);
        }
        let version = buf[4];
        if version != VERSION {
            return Err(CodecError::MalformedEnvelope(format!("unsupported version {version}")));
        }
        let msg_type = MessageType::from_byte(buf[5])
            .ok_or_else(|| CodecError::MalformedEnvelope(format!("unknown msgtype {}", buf[5])))?;
        let flags = LittleEndian::read_u16(&buf[6..8]);
        let wide = flags & FLAG_WIDE_LEN != 0;

        let mut off = 8;
        let svc_len = match read_u16(buf, off) {
            Ok(v) => v as usize,
            Err(_) => return Ok(DecodeOutcome::Incomplete),
        };
        off += 2;
        if off + svc_len > buf.len() {
            return Ok(DecodeOutcome::Incomplete);
        }
        let svc = String::from_utf8_lossy(&buf[off..off + svc_len]).into_owned();
        off += svc_len;

        let tkr_len = match read_u16(buf, off) {
            Ok(v) => v as usize,
            Err(_) => return Ok(DecodeOutcome::Incomplete),
        };
        off += 2;
        if off + tkr_len > buf.len() {
            return Ok(DecodeOutcome::Incomplete);
        }
        let tkr = String::from_utf8_lossy(&buf[off..off + tkr_len]).into_owned();
        off += tkr_len;

        let stream_id = match read_u32(buf, off) {
            Ok(v) => v,
            Err(_) => return Ok(DecodeOutcome::Incomplete),
        };
        off += 4;

        let field_count = match read_u32(buf, off) {
            Ok(v) => v,
            Err(_) => return Ok(DecodeOutcome::Incomplete),
        };
        off += 4;

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            if off + 3 > buf.len() {
                return Ok(DecodeOutcome::Incomplete);
            }
            let id = read_u16(buf, off)?;
            off += 2;
            let tag = WireTag::from_u8(buf[off])
                .ok_or_else(|| CodecError::MalformedEnvelope(format!("unknown field tag {}", buf[off])))?;
            off += 1;
            let (value, consumed) = match decode_value(&buf[off..], tag, wide) {
                Some(pair) => pair,
                None => return Ok(DecodeOutcome::Incomplete),
            };
            off += consumed;
            fields.push(Field::new(id, value));
        }

        let env = Envelope::new(msg_type, svc, tkr, stream_id).with_fields(fields);
        Ok(DecodeOutcome::Message { envelope: env, consumed: off })
    }
}

fn encode_value(out: &mut Vec<u8>, v: &WireValue, wide: bool) {
    match v {
        WireValue::Undefined => {}
        WireValue::Str(b) => {
            push_len(out, b.len() as u64, wide);
            out.extend_from_slice(b);
        }
        WireValue::ByteStreamRef(b) => {
            push_len(out, b.len() as u64, wide);
            out.extend_from_slice(b);
        }
        WireValue::I8(n) => out.push(*n as u8),
        WireValue::I16(n) => out.extend_from_slice(&n.to_le_bytes()),
        WireValue::I32(n) => out.extend_from_slice(&n.to_le_bytes()),
        WireValue::I64(n) => out.extend_from_slice(&n.to_le_bytes()),
        WireValue::F32(n) => out.extend_from_slice(&n.to_le_bytes()),
        WireValue::F64(n) => out.extend_from_slice(&n.to_le_bytes()),
        WireValue::UnixTime(n) => out.extend_from_slice(&n.to_le_bytes()),
        WireValue::Date { year, month, day } => {
            out.extend_from_slice(&year.to_le_bytes());
            out.push(*month);
            out.push(*day);
        }
        WireValue::Time { hour, minute, sec, millis } => {
            out.push(*hour);
            out.push(*minute);
            out.push(*sec);
            out.extend_from_slice(&millis.to_le_bytes());
        }
        WireValue::TimeSeconds { hour, minute, sec } => {
            out.push(*hour);
            out.push(*minute);
            out.push(*sec);
        }
        WireValue::Real { mantissa, exponent } => {
            out.extend_from_slice(&mantissa.to_le_bytes());
            out.push(*exponent as u8);
        }
        WireValue::VectorDouble { precision, values } => {
            out.push(*precision);
            push_len(out, values.len() as u64, wide);
            for val in values {
                out.extend_from_slice(&val.to_le_bytes());
            }
        }
        WireValue::VectorTimed { precision, times, values } => {
            out.push(*precision);
            push_len(out, values.len() as u64, wide);
            for t in times {
                out.extend_from_slice(&t.to_le_bytes());
            }
            for val in values {
                out.extend_from_slice(&val.to_le_bytes());
            }
        }
    }
}

/// Returns `(value, bytes consumed)`, or `None` if `buf` doesn't yet hold a
/// full payload for this tag (caller should report the frame incomplete).
fn decode_value(buf: &[u8], tag: WireTag, wide: bool) -> Option<(WireValue, usize)> {
    match tag {
        WireTag::Undefined => Some((WireValue::Undefined, 0)),
        WireTag::Str | WireTag::ByteStreamRef => {
            let (len, consumed_len) = read_len(buf, 0, wide).ok()?;
            let len = len as usize;
            if consumed_len + len > buf.len() {
                return None;
            }
            let bytes = buf[consumed_len..consumed_len + len].to_vec();
            let value = if tag == WireTag::Str {
                WireValue::Str(bytes)
            } else {
                WireValue::ByteStreamRef(bytes)
            };
            Some((value, consumed_len + len))
        }
        WireTag::I8 => {
            if buf.is_empty() {
                return None;
            }
            Some((WireValue::I8(buf[0] as i8), 1))
        }
        WireTag::I16 => {
            if buf.len() < 2 {
                return None;
            }
            Some((WireValue::I16(LittleEndian::read_i16(&buf[..2])), 2))
        }
        WireTag::I32 => {
            if buf.len() < 4 {
                return None;
            }
            Some((WireValue::I32(LittleEndian::read_i32(&buf[..4])), 4))
        }
        WireTag::I64 => {
            if buf.len() < 8 {
                return None;
            }
            Some((WireValue::I64(LittleEndian::read_i64(&buf[..8])), 8))
        }
        WireTag::F32 => {
            if buf.len() < 4 {
                return None;
            }
            Some((WireValue::F32(LittleEndian::read_f32(&buf[..4])), 4))
        }
        WireTag::F64 => {
            if buf.len() < 8 {
                return None;
            }
            Some((WireValue::F64(LittleEndian::read_f64(&buf[..8])), 8))
        }
        WireTag::UnixTime => {
            if buf.len() < 8 {
                return None;
            }
            Some((WireValue::UnixTime(LittleEndian::read_i64(&buf[..8])), 8))
        }
        WireTag::Date => {
            if buf.len() < 4 {
                return None;
            }
            let year = LittleEndian::read_u16(&buf[..2]);
            Some((WireValue::Date { year, month: buf[2], day: buf[3] }, 4))
        }
        WireTag::Time => {
            if buf.len() < 5 {
                return None;
            }
            let millis = LittleEndian::read_u16(&buf[3..5]);
            Some((
                WireValue::Time { hour: buf[0], minute: buf[1], sec: buf[2], millis },
                5,
            ))
        }
        WireTag::TimeSeconds => {
            if buf.len() < 3 {
                return None;
            }
            Some((
                WireValue::TimeSeconds { hour: buf[0], minute: buf[1], sec: buf[2] },
                3,
            ))
        }
        WireTag::Real => {
            if buf.len() < 9 {
                return None;
            }
            let mantissa = LittleEndian::read_i64(&buf[..8]);
            Some((WireValue::Real { mantissa, exponent: buf[8] as i8 }, 9))
        }
        WireTag::VectorDouble => {
            if buf.is_empty() {
                return None;
            }
            let precision = buf[0];
            let (count, consumed_len) = read_len(buf, 1, wide).ok()?;
            let start = 1 + consumed_len;
            let need = start + count as usize * 8;
            if buf.len() < need {
                return None;
            }
            let values = (0..count as usize)
                .map(|i| LittleEndian::read_f64(&buf[start + i * 8..start + i * 8 + 8]))
                .collect();
            Some((WireValue::VectorDouble { precision, values }, need))
        }
        WireTag::VectorTimed => {
            if buf.is_empty() {
                return None;
            }
            let precision = buf[0];
            let (count, consumed_len) = read_len(buf, 1, wide).ok()?;
            let count = count as usize;
            let times_start = 1 + consumed_len;
            let values_start = times_start + count * 8;
            let need = values_start + count * 8;
            if buf.len() < need {
                return None;
            }
            let times = (0..count)
                .map(|i| LittleEndian::read_i64(&buf[times_start + i * 8..times_start + i * 8 + 8]))
                .collect();
            let values = (0..count)
                .map(|i| LittleEndian::read_f64(&buf[values_start + i * 8..values_start + i * 8 + 8]))
                .collect();
            Some((WireValue::VectorTimed { precision, times, values }, need))
        }
        WireTag::ByteStreamRef => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(env: &Envelope, wide: bool) -> Envelope {
        let codec = BinaryCodec { wide_len: wide };
        let bytes = codec.encode(env).unwrap();
        match codec.decode(&bytes).unwrap() {
            DecodeOutcome::Message { envelope, consumed } => {
                assert_eq!(consumed, bytes.len());
                envelope
            }
            DecodeOutcome::Incomplete => panic!("expected a complete message"),
        }
    }

    #[test]
    fn roundtrips_scalar_fields() {
        let env = Envelope::new(MessageType::Update, "SVC", "TICK", 7).with_fields(vec![
            Field::new(1, WireValue::I32(-12345)),
            Field::new(2, WireValue::F64(100.25)),
            Field::new(3, WireValue::Str(b"hello".to_vec())),
        ]);
        assert_eq!(roundtrip(&env, false), env);
    }

    #[test]
    fn roundtrips_boundary_integers() {
        let env = Envelope::new(MessageType::Image, "S", "T", 1).with_fields(vec![
            Field::new(1, WireValue::I8(i8::MIN)),
            Field::new(2, WireValue::I8(i8::MAX)),
            Field::new(3, WireValue::I64(i64::MIN)),
            Field::new(4, WireValue::I64(i64::MAX)),
        ]);
        assert_eq!(roundtrip(&env, false), env);
    }

    #[test]
    fn roundtrips_nan_and_infinity() {
        let env = Envelope::new(MessageType::Update, "S", "T", 1).with_fields(vec![
            Field::new(1, WireValue::F64(f64::NAN)),
            Field::new(2, WireValue::F64(f64::INFINITY)),
            Field::new(3, WireValue::F64(f64::NEG_INFINITY)),
        ]);
        let decoded = roundtrip(&env, false);
        assert!(matches!(decoded.fields[0].value, WireValue::F64(v) if v.is_nan()));
        assert!(matches!(decoded.fields[1].value, WireValue::F64(v) if v == f64::INFINITY));
        assert!(matches!(decoded.fields[2].value, WireValue::F64(v) if v == f64::NEG_INFINITY));
    }

    #[test]
    fn roundtrips_zero_length_string() {
        let env = Envelope::new(MessageType::Update, "S", "T", 1)
            .with_fields(vec![Field::new(1, WireValue::Str(Vec::new()))]);
        assert_eq!(roundtrip(&env, false), env);
    }

    #[test]
    fn wide_len_flag_roundtrips_large_bytestream() {
        let payload = vec![0xABu8; 70_000];
        let env = Envelope::new(MessageType::Update, "S", "T", 1)
            .with_fields(vec![Field::new(1, WireValue::ByteStreamRef(payload.clone()))]);
        let decoded = roundtrip(&env, true);
        assert_eq!(decoded.fields[0].value, WireValue::ByteStreamRef(payload));
    }

    #[test]
    fn decode_reports_incomplete_for_truncated_buffer() {
        let env = Envelope::new(MessageType::Update, "SVC", "TICK", 1)
            .with_fields(vec![Field::new(1, WireValue::I64(42))]);
        let codec = BinaryCodec::default();
        let bytes = codec.encode(&env).unwrap();
        for cut in [0, 4, 8, bytes.len() - 1] {
            let outcome = codec.decode(&bytes[..cut]).unwrap();
            assert!(matches!(outcome, DecodeOutcome::Incomplete));
        }
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let codec = BinaryCodec::default();
        let err = codec.decode(b"XXXXxxxx");
        assert!(matches!(err, Err(CodecError::MalformedEnvelope(_))));
    }

    #[test]
    fn roundtrips_vector_double_and_timed() {
        let env = Envelope::new(MessageType::Update, "S", "T", 1).with_fields(vec![
            Field::new(1, WireValue::VectorDouble { precision: 3, values: vec![1.0, 2.5, -3.25] }),
            Field::new(
                2,
                WireValue::VectorTimed {
                    precision: 2,
                    times: vec![100, 200, 300],
                    values: vec![1.1, 2.2, 3.3],
                },
            ),
        ]);
        assert_eq!(roundtrip(&env, false), env);
    }
}
