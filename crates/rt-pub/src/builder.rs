//! Update builder and the structured-family helpers (§4.9): chain links
//! and vectors on top of the same field-list model, plus byte-stream
//! segmentation (§4.9 "Byte-stream publication").

use rt_protocol::{Field, WireValue};

/// `Init(ticker, tag, is_image) -> builder`, `AddField(...)`, `Publish()`
/// (§4.9). `Publish()` itself lives on `PublishChannel` since it needs the
/// channel's socket and packed-mode state; this type only accumulates the
/// field list.
pub struct UpdateBuilder {
    pub ticker: String,
    pub tag: u64,
    pub is_image: bool,
    fields: Vec<Field>,
}

impl UpdateBuilder {
    pub fn init(ticker: impl Into<String>, tag: u64, is_image: bool) -> Self {
        Self { ticker: ticker.into(), tag, is_image, fields: Vec::new() }
    }

    pub fn add_field(mut self, id: u16, value: WireValue) -> Self {
        self.fields.push(Field::new(id, value));
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}

/// Maximum member tickers per chain link (§4.9: "each link carries up to a
/// fixed number of member tickers"). Field ids `CHAIN_MEMBER_FID_BASE..
/// CHAIN_MEMBER_FID_BASE+CHAIN_MAX_MEMBERS` carry the member names;
/// `CHAIN_FINAL_FID` carries the final-link flag.
pub const CHAIN_MAX_MEMBERS: usize = 20;
pub const CHAIN_MEMBER_FID_BASE: u16 = 100;
pub const CHAIN_FINAL_FID: u16 = 99;

/// The `<n>#<name>` link identifier (§4.9: "An identifier `<n>#<name>`
/// addresses link `n` of a named chain").
pub fn chain_link_ticker(name: &str, link: u32) -> String {
    format!("{link}#{name}")
}

/// Build the field list for one chain link publish. `members` beyond
/// [`CHAIN_MAX_MEMBERS`] are dropped — callers needing more must publish
/// additional links.
pub fn pub_chain_link(name: &str, link: u32, tag: u64, members: &[String], is_final: bool) -> UpdateBuilder {
    let mut b = UpdateBuilder::init(chain_link_ticker(name, link), tag, true);
    for (i, member) in members.iter().take(CHAIN_MAX_MEMBERS).enumerate() {
        b = b.add_field(CHAIN_MEMBER_FID_BASE + i as u16, WireValue::Str(member.clone().into_bytes()));
    }
    b.add_field(CHAIN_FINAL_FID, WireValue::I8(is_final as i8))
}

/// Full-image vector publish (§4.12: "full-image replacement").
pub fn pub_vector_image(fid: u16, precision: u8, values: &[f64]) -> Field {
    Field::new(fid, WireValue::VectorDouble { precision, values: values.to_vec() })
}

/// Sparse index-addressed vector update (§4.12: "index-addressed partial
/// updates" / "`vector<(index,value)>` update"). We reuse the
/// [`WireValue::VectorTimed`] wire shape with the parallel-array slot
/// carrying indices instead of timestamps — the wire already has a
/// parallel-int-array-plus-doubles shape and a dedicated sparse-update tag
/// would duplicate it.
pub fn pub_vector_update(fid: u16, precision: u8, updates: &[(u32, f64)]) -> Field {
    let times = updates.iter().map(|(idx, _)| *idx as i64).collect();
    let values = updates.iter().map(|(_, v)| *v).collect();
    Field::new(fid, WireValue::VectorTimed { precision, times, values })
}

/// The byte-stream header quartet's field ids (§4.9): offset, total
/// length, field count in this message, and the first field id the
/// payload fields occupy.
#[derive(Debug, Clone, Copy)]
pub struct ByteStreamFids {
    pub offset: u16,
    pub total_len: u16,
    pub num_fld: u16,
    pub payload_start: u16,
}

/// Segments an opaque payload into one or more messages, each carrying the
/// header quartet followed by up to `fields_per_msg` contiguous byte-stream
/// fields of up to `field_payload_cap` bytes (§4.9). The receiver
/// reconstructs by offset and detects completion when
/// `offset + length == total_length` (Scenario E).
pub struct ByteStreamPublisher {
    fids: ByteStreamFids,
    field_payload_cap: usize,
    fields_per_msg: usize,
}

impl ByteStreamPublisher {
    pub fn new(fids: ByteStreamFids, field_payload_cap: usize, fields_per_msg: usize) -> Self {
        Self { fids, field_payload_cap: field_payload_cap.max(1), fields_per_msg: fields_per_msg.max(1) }
    }

    pub fn segment(&self, payload: &[u8]) -> Vec<Vec<Field>> {
        let chunk_size = self.field_payload_cap * self.fields_per_msg;
        let total = payload.len();
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let end = (offset + chunk_size).min(total);
            let chunk = &payload[offset..end];
            let mut payload_fields = Vec::new();
            let mut pos = 0usize;
            while pos < chunk.len() {
                let len = self.field_payload_cap.min(chunk.len() - pos);
                payload_fields.push(Field::new(
                    self.fids.payload_start + payload_fields.len() as u16,
                    WireValue::ByteStreamRef(chunk[pos..pos + len].to_vec()),
                ));
                pos += len;
            }
            let mut fields = vec![
                Field::new(self.fids.offset, WireValue::I32(offset as i32)),
                Field::new(self.fids.total_len, WireValue::I32(total as i32)),
                Field::new(self.fids.num_fld, WireValue::I32(payload_fields.len() as i32)),
            ];
            fields.extend(payload_fields);
            out.push(fields);
            offset = end;
            if offset >= total {
                break;
            }
        }
        if out.is_empty() {
            out.push(vec![
                Field::new(self.fids.offset, WireValue::I32(0)),
                Field::new(self.fids.total_len, WireValue::I32(0)),
                Field::new(self.fids.num_fld, WireValue::I32(0)),
            ]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fids() -> ByteStreamFids {
        ByteStreamFids { offset: 1, total_len: 2, num_fld: 3, payload_start: 9 }
    }

    #[test]
    fn chain_link_ticker_matches_n_hash_name_format() {
        assert_eq!(chain_link_ticker("0#", 0), "0#0#");
        assert_eq!(chain_link_ticker("MYCHAIN", 3), "3#MYCHAIN");
    }

    #[test]
    fn chain_link_caps_member_count() {
        let members: Vec<String> = (0..50).map(|i| format!("T{i}")).collect();
        let b = pub_chain_link("CHAIN", 0, 7, &members, true);
        let member_fields = b.fields().iter().filter(|f| f.id >= CHAIN_MEMBER_FID_BASE && f.id < CHAIN_FINAL_FID).count();
        assert_eq!(member_fields, CHAIN_MAX_MEMBERS);
    }

    #[test]
    fn chain_link_final_flag_is_set() {
        let b = pub_chain_link("CHAIN", 1, 1, &["A".into()], true);
        let final_field = b.fields().iter().find(|f| f.id == CHAIN_FINAL_FID).unwrap();
        assert_eq!(final_field.value, WireValue::I8(1));
    }

    #[test]
    fn vector_image_carries_full_array() {
        let f = pub_vector_image(5, 2, &[1.0, 2.0, 3.0]);
        match f.value {
            WireValue::VectorDouble { values, .. } => assert_eq!(values, vec![1.0, 2.0, 3.0]),
            _ => panic!("expected VectorDouble"),
        }
    }

    #[test]
    fn vector_update_carries_only_touched_indices() {
        let f = pub_vector_update(5, 2, &[(3, 9.5), (7, 1.25)]);
        match f.value {
            WireValue::VectorTimed { times, values, .. } => {
                assert_eq!(times, vec![3, 7]);
                assert_eq!(values, vec![9.5, 1.25]);
            }
            _ => panic!("expected VectorTimed"),
        }
    }

    #[test]
    fn bytestream_segments_reassemble_to_original_payload() {
        let payload: Vec<u8> = (0..10_240u32).map(|i| (i % 251) as u8).collect();
        let publisher = ByteStreamPublisher::new(fids(), 64, 2); // 128 bytes/msg -> 80 msgs
        let msgs = publisher.segment(&payload);
        assert!(msgs.len() > 1);

        let mut reassembled = vec![0u8; payload.len()];
        let mut total_len = None;
        for msg in &msgs {
            let offset = msg.iter().find(|f| f.id == 1).unwrap();
            let off = match offset.value {
                WireValue::I32(v) => v as usize,
                _ => panic!(),
            };
            let total = msg.iter().find(|f| f.id == 2).unwrap();
            total_len = Some(match total.value {
                WireValue::I32(v) => v as usize,
                _ => panic!(),
            });
            let mut pos = off;
            for f in msg.iter().filter(|f| f.id >= 9) {
                if let WireValue::ByteStreamRef(bytes) = &f.value {
                    reassembled[pos..pos + bytes.len()].copy_from_slice(bytes);
                    pos += bytes.len();
                }
            }
        }
        assert_eq!(total_len, Some(payload.len()));
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn bytestream_empty_payload_emits_single_zero_length_message() {
        let publisher = ByteStreamPublisher::new(fids(), 64, 2);
        let msgs = publisher.segment(&[]);
        assert_eq!(msgs.len(), 1);
    }
}
