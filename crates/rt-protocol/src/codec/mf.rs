//! ASCII market-feed encoding (§6.1): control-byte-delimited tokens, one
//! message per record separated by RS, fields separated by FS, with an
//! inner VS separating a field's id from its value.
//!
//! Frame layout: `MSGTYPE FS SVC FS TKR FS STREAM_ID FS (FID VS VALUE FS)* RS`
//!
//! All values are textual; schema-aware coercion happens lazily at
//! `Field::as_f64`/`as_str` call sites rather than at decode time, matching
//! the §3.1 invariant that the wire tag and declared type may differ.

use crate::codec::{CodecError, DecodeOutcome, WireCodec};
use crate::envelope::{Envelope, MessageType};
use crate::field::{Field, WireValue};

const FS: u8 = 0x01;
const VS: u8 = 0x02;
const RS: u8 = 0x1e;

#[derive(Default)]
pub struct MfCodec;

impl WireCodec for MfCodec {
    fn encode(&self, env: &Envelope) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        out.extend_from_slice(env.msg_type.to_tag().as_bytes());
        out.push(FS);
        out.extend_from_slice(env.svc.as_bytes());
        out.push(FS);
        out.extend_from_slice(env.tkr.as_bytes());
        out.push(FS);
        out.extend_from_slice(env.stream_id.to_string().as_bytes());
        for field in &env.fields {
            out.push(FS);
            out.extend_from_slice(field.id.to_string().as_bytes());
            out.push(VS);
            out.extend_from_slice(field.value.to_text().as_bytes());
        }
        out.push(RS);
        Ok(out)
    }

    fn decode(&self, buf: &[u8]) -> Result<DecodeOutcome, CodecError> {
        let Some(rs_pos) = buf.iter().position(|&b| b == RS) else {
            return Ok(DecodeOutcome::Incomplete);
        };
        let frame = &buf[..rs_pos];
        let mut tokens = frame.split(|&b| b == FS);

        let msg_type_raw = tokens
            .next()
            .ok_or_else(|| CodecError::MalformedEnvelope("missing message type".into()))?;
        let msg_type_str = std::str::from_utf8(msg_type_raw)
            .map_err(|_| CodecError::MalformedEnvelope("message type not utf8".into()))?;
        let msg_type = MessageType::from_tag(msg_type_str)
            .ok_or_else(|| CodecError::MalformedEnvelope(format!("unknown message type {msg_type_str:?}")))?;

        let svc = tokens
            .next()
            .ok_or_else(|| CodecError::MalformedEnvelope("missing svc".into()))
            .map(|b| String::from_utf8_lossy(b).into_owned())?;
        let tkr = tokens
            .next()
            .ok_or_else(|| CodecError::MalformedEnvelope("missing tkr".into()))
            .map(|b| String::from_utf8_lossy(b).into_owned())?;
        let stream_id_raw = tokens
            .next()
            .ok_or_else(|| CodecError::MalformedEnvelope("missing stream id".into()))?;
        let stream_id: u32 = std::str::from_utf8(stream_id_raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CodecError::MalformedEnvelope("bad stream id".into()))?;

        let mut fields = Vec::new();
        for token in tokens {
            if token.is_empty() {
                continue;
            }
            let vs_pos = token
                .iter()
                .position(|&b| b == VS)
                .ok_or_else(|| CodecError::MalformedEnvelope("field missing VS separator".into()))?;
            let id_str = std::str::from_utf8(&token[..vs_pos])
                .map_err(|_| CodecError::MalformedEnvelope("field id not utf8".into()))?;
            let id: u16 = id_str
                .parse()
                .map_err(|_| CodecError::MalformedEnvelope(format!("bad field id {id_str:?}")))?;
            let value_text = String::from_utf8_lossy(&token[vs_pos + 1..]).into_owned();
            fields.push(Field::new(id, WireValue::Str(value_text.into_bytes())));
        }

        let env = Envelope::new(msg_type, svc, tkr, stream_id).with_fields(fields);
        Ok(DecodeOutcome::Message { envelope: env, consumed: rs_pos + 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_basic_message() {
        let codec = MfCodec;
        let env = Envelope::new(MessageType::Update, "SVC", "TICK", 42).with_fields(vec![
            Field::new(1, WireValue::Str(b"100.25".to_vec())),
            Field::new(2, WireValue::Str(b"200".to_vec())),
        ]);
        let bytes = codec.encode(&env).unwrap();
        match codec.decode(&bytes).unwrap() {
            DecodeOutcome::Message { envelope, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(envelope, env);
            }
            DecodeOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn incomplete_without_record_separator() {
        let codec = MfCodec;
        let partial = b"UPDATE\x01SVC\x01TICK\x011\x011\x02100".to_vec();
        assert!(matches!(codec.decode(&partial).unwrap(), DecodeOutcome::Incomplete));
    }

    #[test]
    fn malformed_message_type_errors() {
        let codec = MfCodec;
        let bytes = b"NOPE\x01SVC\x01TICK\x011\x1e".to_vec();
        assert!(codec.decode(&bytes).is_err());
    }

    #[test]
    fn zero_length_field_value_roundtrips() {
        let codec = MfCodec;
        let env = Envelope::new(MessageType::Image, "S", "T", 1)
            .with_fields(vec![Field::new(1, WireValue::Str(Vec::new()))]);
        let bytes = codec.encode(&env).unwrap();
        if let DecodeOutcome::Message { envelope, .. } = codec.decode(&bytes).unwrap() {
            assert_eq!(envelope.fields[0].value, WireValue::Str(Vec::new()));
        } else {
            panic!("expected complete");
        }
    }

    #[test]
    fn two_frames_in_one_buffer_decodes_only_the_first() {
        let codec = MfCodec;
        let env = Envelope::new(MessageType::Ping, "S", "T", 1);
        let one = codec.encode(&env).unwrap();
        let mut both = one.clone();
        both.extend_from_slice(&one);
        match codec.decode(&both).unwrap() {
            DecodeOutcome::Message { consumed, .. } => assert_eq!(consumed, one.len()),
            DecodeOutcome::Incomplete => panic!("expected complete"),
        }
    }
}
