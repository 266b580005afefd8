//! Surface consumer (§4.12): a two-dimensional extension of the vector
//! family — one [`VectorAssembler`] per row, addressed by a row index
//! carried alongside the field.

use std::collections::HashMap;

use rt_protocol::Field;

use crate::event::AssemblerEvent;
use crate::vector::VectorAssembler;

#[derive(Default)]
pub struct SurfaceAssembler {
    rows: HashMap<u32, VectorAssembler>,
}

impl SurfaceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, row: u32, field: &Field) -> Vec<AssemblerEvent> {
        let row_events = self.rows.entry(row).or_default().feed(field);
        row_events
            .into_iter()
            .map(|evt| match evt {
                AssemblerEvent::VectorImage(values) => AssemblerEvent::SurfaceRowImage { row, values },
                AssemblerEvent::VectorUpdate(updates) => AssemblerEvent::SurfaceRowUpdate { row, updates },
                other => other,
            })
            .collect()
    }

    pub fn row_snapshot(&self, row: u32) -> Vec<f64> {
        self.rows.get(&row).map(VectorAssembler::snapshot).unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
