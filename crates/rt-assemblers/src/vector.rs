//! Vector consumer (§4.12): a sparse-then-dense double array that accepts
//! either a full-image replacement or index-addressed partial updates,
//! matching whichever the publisher's per-stream state machine emits
//! (`rt_pub::stream_state::StreamState::vector_image_sent`).

use std::collections::HashMap;

use rt_protocol::{Field, WireValue};

use crate::event::AssemblerEvent;

/// Before the first image arrives, updates land in a sparse map (the
/// publisher may address indices beyond any size we've been told yet);
/// once an image establishes the array's extent, storage is promoted to a
/// dense `Vec<f64>` for O(1) index access.
pub struct VectorAssembler {
    dense: Option<Vec<f64>>,
    sparse: HashMap<u32, f64>,
}

impl VectorAssembler {
    pub fn new() -> Self {
        Self { dense: None, sparse: HashMap::new() }
    }

    /// Feed one field carrying either a `VectorDouble` (image) or
    /// `VectorTimed` (reused as a sparse index/value pair list, matching
    /// `rt_pub::builder::pub_vector_update`) wire value.
    pub fn feed(&mut self, field: &Field) -> Vec<AssemblerEvent> {
        match &field.value {
            WireValue::VectorDouble { values, .. } => {
                self.dense = Some(values.clone());
                self.sparse.clear();
                vec![AssemblerEvent::VectorImage(values.clone())]
            }
            WireValue::VectorTimed { times, values, .. } => {
                let mut updates = Vec::with_capacity(times.len());
                for (&idx, &v) in times.iter().zip(values.iter()) {
                    let idx = idx as u32;
                    match &mut self.dense {
                        Some(d) => {
                            if idx as usize >= d.len() {
                                d.resize(idx as usize + 1, 0.0);
                            }
                            d[idx as usize] = v;
                        }
                        None => {
                            self.sparse.insert(idx, v);
                        }
                    }
                    updates.push((idx, v));
                }
                vec![AssemblerEvent::VectorUpdate(updates)]
            }
            _ => Vec::new(),
        }
    }

    /// The current array as a dense snapshot: the image (if any) with every
    /// pre-image sparse update applied on top in arrival order is not
    /// reconstructable once dense (sparse entries are consumed into it
    /// eagerly), so this simply returns the materialized state.
    pub fn snapshot(&self) -> Vec<f64> {
        if let Some(d) = &self.dense {
            return d.clone();
        }
        if self.sparse.is_empty() {
            return Vec::new();
        }
        let max_idx = *self.sparse.keys().max().unwrap();
        let mut out = vec![0.0; max_idx as usize + 1];
        for (&idx, &v) in &self.sparse {
            out[idx as usize] = v;
        }
        out
    }
}

impl Default for VectorAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_then_partial_update_materializes_correctly() {
        let mut asm = VectorAssembler::new();
        asm.feed(&Field::new(1, WireValue::VectorDouble { precision: 2, values: vec![1.0, 2.0, 3.0] }));
        asm.feed(&Field::new(1, WireValue::VectorTimed { precision: 2, times: vec![1], values: vec![9.5] }));
        assert_eq!(asm.snapshot(), vec![1.0, 9.5, 3.0]);
    }

    #[test]
    fn sparse_updates_before_any_image_grow_on_demand() {
        let mut asm = VectorAssembler::new();
        let events = asm.feed(&Field::new(1, WireValue::VectorTimed { precision: 0, times: vec![4], values: vec![7.0] }));
        assert_eq!(events, vec![AssemblerEvent::VectorUpdate(vec![(4, 7.0)])]);
        assert_eq!(asm.snapshot(), vec![0.0, 0.0, 0.0, 0.0, 7.0]);
    }

    #[test]
    fn dense_array_grows_when_update_index_exceeds_image_size() {
        let mut asm = VectorAssembler::new();
        asm.feed(&Field::new(1, WireValue::VectorDouble { precision: 0, values: vec![1.0] }));
        asm.feed(&Field::new(1, WireValue::VectorTimed { precision: 0, times: vec![3], values: vec![5.0] }));
        assert_eq!(asm.snapshot(), vec![1.0, 0.0, 0.0, 5.0]);
    }
}
