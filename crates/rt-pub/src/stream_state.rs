//! Per-published-stream state (§4.9 "Per-stream state"): the last
//! published field snapshot (enables packed mode), a monotonic record-level
//! sequence counter, and the hop-count attribute used for loop detection in
//! multi-hop topologies (carried over from `examples/original_source/librtEdge`'s
//! `EdgChannel.h`, per `SPEC_FULL.md`'s supplemented-features list).

use std::collections::HashMap;

use rt_protocol::Field;

/// Maximum hop count before a publish is refused as a likely topology loop.
pub const MAX_HOPS: u8 = 16;

#[derive(Default)]
pub struct StreamState {
    last_snapshot: HashMap<u16, Field>,
    seq: u64,
    pub hop_count: u8,
    pub interactive_open: bool,
    /// Vector-publication state machine (§4.12): `true` once a full image
    /// has gone out for this stream, so subsequent `PubVector` calls emit
    /// `(index,value)` partial updates instead of a full image.
    pub vector_image_sent: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Compute which of `fields` changed since the last published snapshot
    /// (packed mode's field filter), then commit `fields` as the new
    /// snapshot. For an image (or the first publish on this stream) every
    /// field counts as changed.
    pub fn diff_and_commit(&mut self, fields: &[Field], is_image: bool) -> Vec<Field> {
        let mut changed = Vec::with_capacity(fields.len());
        for field in fields {
            let is_new = match self.last_snapshot.get(&field.id) {
                Some(prev) if !is_image => !Field::value_eq(&prev.value, &field.value),
                _ => true,
            };
            if is_new {
                changed.push(field.clone());
            }
        }
        for field in fields {
            self.last_snapshot.insert(field.id, field.clone());
        }
        changed
    }

    pub fn bump_hop(&mut self) -> Result<(), u8> {
        if self.hop_count >= MAX_HOPS {
            return Err(self.hop_count);
        }
        self.hop_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_protocol::WireValue;

    #[test]
    fn image_always_reports_every_field_as_changed() {
        let mut st = StreamState::new();
        let fields = vec![Field::new(1, WireValue::F64(1.0)), Field::new(2, WireValue::F64(2.0))];
        let changed = st.diff_and_commit(&fields, true);
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn update_reports_only_changed_fields_against_last_snapshot() {
        let mut st = StreamState::new();
        st.diff_and_commit(
            &[Field::new(6, WireValue::F64(1.0)), Field::new(7, WireValue::F64(2.0)), Field::new(8, WireValue::F64(3.0))],
            true,
        );
        let changed = st.diff_and_commit(&[Field::new(7, WireValue::F64(2.5))], false);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, 7);
    }

    #[test]
    fn hop_count_refuses_past_the_max() {
        let mut st = StreamState::new();
        st.hop_count = MAX_HOPS;
        assert!(st.bump_hop().is_err());
    }

    #[test]
    fn sequence_counter_is_monotonic() {
        let mut st = StreamState::new();
        assert_eq!(st.next_seq(), 1);
        assert_eq!(st.next_seq(), 2);
    }
}
