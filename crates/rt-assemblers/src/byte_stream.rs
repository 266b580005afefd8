//! ByteStream consumer (§4.12): reassembles the header-quartet-plus-payload
//! scheme `PublishChannel::publish_bytestream` (rt-pub, §4.9) produces.

use rt_protocol::{Field, WireValue};
use tracing::warn;

use crate::event::AssemblerEvent;

/// The same header quartet field ids the publish side uses (§4.9): offset,
/// total length, field count in this message, first payload field id.
#[derive(Debug, Clone, Copy)]
pub struct ByteStreamFids {
    pub offset: u16,
    pub total_len: u16,
    pub num_fld: u16,
    pub payload_start: u16,
}

/// Reassembles fragments by offset (§4.12). A fragment whose offset doesn't
/// match the bytes received so far (a missing or duplicated fragment) is
/// reported as [`AssemblerEvent::ByteStreamError`], never as a truncated
/// `ByteStreamComplete` (§8 testable property 8).
pub struct ByteStreamAssembler {
    fids: ByteStreamFids,
    received: Vec<u8>,
    total_len: Option<usize>,
    dead: bool,
}

impl ByteStreamAssembler {
    pub fn new(fids: ByteStreamFids) -> Self {
        Self { fids, received: Vec::new(), total_len: None, dead: false }
    }

    /// Feed one message's field list. Returns zero or more events: a `Data`
    /// event for the chunk, followed by `Complete` once the full payload has
    /// arrived, or a single `Error` event (which latches `dead` — further
    /// feeds are ignored) on a sequencing mismatch.
    pub fn feed(&mut self, fields: &[Field]) -> Vec<AssemblerEvent> {
        if self.dead {
            return Vec::new();
        }
        let offset = field_i32(fields, self.fids.offset);
        let total_len = field_i32(fields, self.fids.total_len);
        let (offset, total_len) = match (offset, total_len) {
            (Some(o), Some(t)) => (o as usize, t as usize),
            _ => {
                self.dead = true;
                warn!("byte-stream fragment missing header quartet fields");
                return vec![AssemblerEvent::ByteStreamError("missing header quartet fields".into())];
            }
        };
        self.total_len = Some(total_len);
        if offset != self.received.len() {
            self.dead = true;
            warn!(offset, received = self.received.len(), "byte-stream fragment gap");
            return vec![AssemblerEvent::ByteStreamError(format!(
                "fragment offset {offset} does not match {} bytes received so far",
                self.received.len()
            ))];
        }

        let mut chunk = Vec::new();
        for field in fields.iter().filter(|f| f.id >= self.fids.payload_start) {
            if let WireValue::ByteStreamRef(bytes) = &field.value {
                chunk.extend_from_slice(bytes);
            }
        }
        self.received.extend_from_slice(&chunk);

        let mut events = vec![AssemblerEvent::ByteStreamData(chunk)];
        if self.received.len() == total_len {
            events.push(AssemblerEvent::ByteStreamComplete(total_len));
        } else if self.received.len() > total_len {
            self.dead = true;
            events = vec![AssemblerEvent::ByteStreamError("fragment overran declared total length".into())];
        }
        events
    }

    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    pub fn is_complete(&self) -> bool {
        self.total_len.is_some_and(|t| self.received.len() == t)
    }
}

fn field_i32(fields: &[Field], id: u16) -> Option<i32> {
    fields.iter().find(|f| f.id == id).and_then(|f| match f.value {
        WireValue::I32(v) => Some(v),
        WireValue::I64(v) => Some(v as i32),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fids() -> ByteStreamFids {
        ByteStreamFids { offset: 1, total_len: 2, num_fld: 3, payload_start: 9 }
    }

    fn msg(offset: i32, total_len: i32, payload: &[&[u8]]) -> Vec<Field> {
        let mut fields = vec![
            Field::new(1, WireValue::I32(offset)),
            Field::new(2, WireValue::I32(total_len)),
            Field::new(3, WireValue::I32(payload.len() as i32)),
        ];
        for (i, chunk) in payload.iter().enumerate() {
            fields.push(Field::new(9 + i as u16, WireValue::ByteStreamRef(chunk.to_vec())));
        }
        fields
    }

    #[test]
    fn reassembles_three_chunks_in_order() {
        let mut asm = ByteStreamAssembler::new(fids());
        let e1 = asm.feed(&msg(0, 12, &[b"abcd"]));
        assert_eq!(e1, vec![AssemblerEvent::ByteStreamData(b"abcd".to_vec())]);
        let e2 = asm.feed(&msg(4, 12, &[b"efgh"]));
        assert_eq!(e2, vec![AssemblerEvent::ByteStreamData(b"efgh".to_vec())]);
        let e3 = asm.feed(&msg(8, 12, &[b"ijkl"]));
        assert_eq!(
            e3,
            vec![AssemblerEvent::ByteStreamData(b"ijkl".to_vec()), AssemblerEvent::ByteStreamComplete(12)]
        );
        assert!(asm.is_complete());
    }

    #[test]
    fn gap_in_offset_sequence_reports_error_not_truncated_complete() {
        let mut asm = ByteStreamAssembler::new(fids());
        asm.feed(&msg(0, 12, &[b"abcd"]));
        let events = asm.feed(&msg(8, 12, &[b"ijkl"])); // skipped the middle fragment
        assert!(matches!(events.as_slice(), [AssemblerEvent::ByteStreamError(_)]));
        assert!(!asm.is_complete());
    }
}
