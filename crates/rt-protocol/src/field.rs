//! The field value model shared by all three wire encodings (§3.1).
//!
//! A [`Field`] pairs a numeric id with a [`WireValue`] — the value *as it
//! actually arrived on the wire*. Because the ASCII and XML encodings always
//! ship strings, `WireValue::Str` may need to be coerced into a schema's
//! declared native type; [`Field::native`] does that coercion lazily and
//! falls back to the raw string when the field has no schema entry or the
//! parse fails, matching the §3.1 invariant.

use rt_schema::{FieldType, Schema};

/// The wire-type tag a field actually carries, independent of what the
/// schema declares for that field id.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Undefined,
    Str(Vec<u8>),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Date { year: u16, month: u8, day: u8 },
    Time { hour: u8, minute: u8, sec: u8, millis: u16 },
    TimeSeconds { hour: u8, minute: u8, sec: u8 },
    /// Fixed-point real: `mantissa * 10^exponent`.
    Real { mantissa: i64, exponent: i8 },
    ByteStreamRef(Vec<u8>),
    VectorDouble { precision: u8, values: Vec<f64> },
    VectorTimed { precision: u8, times: Vec<i64>, values: Vec<f64> },
    /// Nanoseconds since the Unix epoch.
    UnixTime(i64),
}

/// The one-byte type tag used on the binary wire (§6.1 field-list format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireTag {
    Undefined = 0,
    Str = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    F32 = 6,
    F64 = 7,
    Date = 8,
    Time = 9,
    TimeSeconds = 10,
    Real = 11,
    ByteStreamRef = 12,
    VectorDouble = 13,
    VectorTimed = 14,
    UnixTime = 15,
}

impl WireTag {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => WireTag::Undefined,
            1 => WireTag::Str,
            2 => WireTag::I8,
            3 => WireTag::I16,
            4 => WireTag::I32,
            5 => WireTag::I64,
            6 => WireTag::F32,
            7 => WireTag::F64,
            8 => WireTag::Date,
            9 => WireTag::Time,
            10 => WireTag::TimeSeconds,
            11 => WireTag::Real,
            12 => WireTag::ByteStreamRef,
            13 => WireTag::VectorDouble,
            14 => WireTag::VectorTimed,
            15 => WireTag::UnixTime,
            _ => return None,
        })
    }
}

impl WireValue {
    pub fn tag(&self) -> WireTag {
        match self {
            WireValue::Undefined => WireTag::Undefined,
            WireValue::Str(_) => WireTag::Str,
            WireValue::I8(_) => WireTag::I8,
            WireValue::I16(_) => WireTag::I16,
            WireValue::I32(_) => WireTag::I32,
            WireValue::I64(_) => WireTag::I64,
            WireValue::F32(_) => WireTag::F32,
            WireValue::F64(_) => WireTag::F64,
            WireValue::Date { .. } => WireTag::Date,
            WireValue::Time { .. } => WireTag::Time,
            WireValue::TimeSeconds { .. } => WireTag::TimeSeconds,
            WireValue::Real { .. } => WireTag::Real,
            WireValue::ByteStreamRef(_) => WireTag::ByteStreamRef,
            WireValue::VectorDouble { .. } => WireTag::VectorDouble,
            WireValue::VectorTimed { .. } => WireTag::VectorTimed,
            WireValue::UnixTime(_) => WireTag::UnixTime,
        }
    }

    /// Render as its ASCII/XML textual representation (§4.5: "ASCII and XML
    /// encoders emit the textual representation of native values").
    pub fn to_text(&self) -> String {
        match self {
            WireValue::Undefined => String::new(),
            WireValue::Str(b) => String::from_utf8_lossy(b).into_owned(),
            WireValue::I8(v) => v.to_string(),
            WireValue::I16(v) => v.to_string(),
            WireValue::I32(v) => v.to_string(),
            WireValue::I64(v) => v.to_string(),
            WireValue::F32(v) => v.to_string(),
            WireValue::F64(v) => v.to_string(),
            WireValue::Date { year, month, day } => format!("{year:04}-{month:02}-{day:02}"),
            WireValue::Time { hour, minute, sec, millis } => {
                format!("{hour:02}:{minute:02}:{sec:02}.{millis:03}")
            }
            WireValue::TimeSeconds { hour, minute, sec } => format!("{hour:02}:{minute:02}:{sec:02}"),
            WireValue::Real { mantissa, exponent } => {
                format!("{}", (*mantissa as f64) * 10f64.powi(*exponent as i32))
            }
            WireValue::ByteStreamRef(b) => String::from_utf8_lossy(b).into_owned(),
            WireValue::VectorDouble { values, .. } => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
            WireValue::VectorTimed { times, values, .. } => times
                .iter()
                .zip(values.iter())
                .map(|(t, v)| format!("{t}:{v}"))
                .collect::<Vec<_>>()
                .join(","),
            WireValue::UnixTime(ns) => ns.to_string(),
        }
    }

    /// Parse a textual value (as produced by `to_text`) into the raw wire
    /// representation matching `ty`. Used by the ASCII/XML decoders, which
    /// always receive strings and must coerce lazily at native-accessor time.
    pub fn from_text(ty: FieldType, text: &str) -> WireValue {
        match ty {
            FieldType::String | FieldType::Undefined => WireValue::Str(text.as_bytes().to_vec()),
            FieldType::I8 => text.parse().map(WireValue::I8).unwrap_or(WireValue::Str(text.into())),
            FieldType::I16 => text.parse().map(WireValue::I16).unwrap_or(WireValue::Str(text.into())),
            FieldType::I32 => text.parse().map(WireValue::I32).unwrap_or(WireValue::Str(text.into())),
            FieldType::I64 => text.parse().map(WireValue::I64).unwrap_or(WireValue::Str(text.into())),
            FieldType::F32 => text.parse().map(WireValue::F32).unwrap_or(WireValue::Str(text.into())),
            FieldType::F64 => text.parse().map(WireValue::F64).unwrap_or(WireValue::Str(text.into())),
            FieldType::UnixTime => text.parse().map(WireValue::UnixTime).unwrap_or(WireValue::Str(text.into())),
            _ => WireValue::Str(text.as_bytes().to_vec()),
        }
    }
}

/// A field as delivered to the application: the id, the raw wire value, and
/// (lazily, on request) the schema-coerced native value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: u16,
    pub value: WireValue,
}

impl Field {
    pub fn new(id: u16, value: WireValue) -> Self {
        Self { id, value }
    }

    /// Coerce this field's value to `f64` using the schema's declared type
    /// when the raw value is textual; returns `None` if coercion fails.
    pub fn as_f64(&self, schema: &Schema) -> Option<f64> {
        match &self.value {
            WireValue::F64(v) => Some(*v),
            WireValue::F32(v) => Some(*v as f64),
            WireValue::I8(v) => Some(*v as f64),
            WireValue::I16(v) => Some(*v as f64),
            WireValue::I32(v) => Some(*v as f64),
            WireValue::I64(v) => Some(*v as f64),
            WireValue::Real { mantissa, exponent } => Some((*mantissa as f64) * 10f64.powi(*exponent as i32)),
            WireValue::Str(b) => {
                let text = String::from_utf8_lossy(b);
                let ty = schema.declared_type(self.id);
                match WireValue::from_text(ty, &text) {
                    WireValue::Str(_) => text.parse().ok(),
                    other => Field::new(self.id, other).as_f64(schema),
                }
            }
            _ => None,
        }
    }

    /// Coerce to a UTF-8 string, always succeeding via `to_text`.
    pub fn as_str(&self) -> String {
        self.value.to_text()
    }

    /// Compare two field values for the conflation equality test used by
    /// `RecordCache::update` (§4.7): fixed-size types compare by value,
    /// string/byte-stream by length+bytes, vectors element-wise with a
    /// precision tolerance derived from the declared `precision` digits.
    pub fn value_eq(a: &WireValue, b: &WireValue) -> bool {
        match (a, b) {
            (WireValue::VectorDouble { precision, values: va }, WireValue::VectorDouble { values: vb, .. }) => {
                if va.len() != vb.len() {
                    return false;
                }
                let eps = 10f64.powi(-(*precision as i32));
                va.iter().zip(vb.iter()).all(|(x, y)| (x - y).abs() < eps)
            }
            (
                WireValue::VectorTimed { precision, times: ta, values: va },
                WireValue::VectorTimed { times: tb, values: vb, .. },
            ) => {
                if ta.len() != tb.len() || va.len() != vb.len() {
                    return false;
                }
                let eps = 10f64.powi(-(*precision as i32));
                ta == tb && va.iter().zip(vb.iter()).all(|(x, y)| (x - y).abs() < eps)
            }
            _ => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_schema::Schema;

    #[test]
    fn wire_tag_roundtrips_through_u8() {
        for tag in [
            WireTag::Undefined,
            WireTag::Str,
            WireTag::I64,
            WireTag::F64,
            WireTag::Real,
            WireTag::VectorTimed,
            WireTag::UnixTime,
        ] {
            assert_eq!(WireTag::from_u8(tag as u8), Some(tag));
        }
    }

    #[test]
    fn text_roundtrip_for_scalar_types() {
        let schema = Schema::parse("BID 1 PRICE 12").unwrap();
        let f = Field::new(1, WireValue::F64(100.25));
        assert_eq!(f.as_str(), "100.25");
        assert_eq!(f.as_f64(&schema), Some(100.25));
    }

    #[test]
    fn ascii_string_value_coerces_via_schema() {
        let schema = Schema::parse("BID 1 PRICE 12").unwrap();
        let f = Field::new(1, WireValue::Str(b"100.30".to_vec()));
        assert_eq!(f.as_f64(&schema), Some(100.30));
    }

    #[test]
    fn unknown_field_falls_back_to_string_parse() {
        let schema = Schema::new();
        let f = Field::new(999, WireValue::Str(b"42".to_vec()));
        assert_eq!(f.as_f64(&schema), Some(42.0));
    }

    #[test]
    fn vector_equality_is_precision_aware() {
        let a = WireValue::VectorDouble { precision: 2, values: vec![1.001, 2.002] };
        let b = WireValue::VectorDouble { precision: 2, values: vec![1.0015, 2.0019] };
        assert!(Field::value_eq(&a, &b));
        let c = WireValue::VectorDouble { precision: 2, values: vec![1.1, 2.002] };
        assert!(!Field::value_eq(&a, &c));
    }

    #[test]
    fn real_value_renders_as_decimal_text() {
        let f = Field::new(1, WireValue::Real { mantissa: 12345, exponent: -2 });
        assert_eq!(f.as_str(), "123.45");
    }
}
