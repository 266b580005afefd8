//! Multi-message reconstruction on top of records (§4.12).
//!
//! §9's "inheritance trees for ByteStream/Chain/Vector in the source become
//! small tagged variants of an Assembler trait" becomes, in Rust, one enum
//! with a variant per stream kind: the channel matches on stream kind once
//! at subscribe/registration time and stores the right variant, so the hot
//! decode loop never pays for virtual dispatch — it just calls
//! `Assembler::feed` on whichever variant it already picked.

pub mod byte_stream;
pub mod chain;
pub mod event;
pub mod surface;
pub mod vector;

pub use byte_stream::{ByteStreamAssembler, ByteStreamFids};
pub use chain::{CHAIN_FINAL_FID, CHAIN_MEMBER_FID_BASE, ChainAssembler, chain_link_ticker};
pub use event::AssemblerEvent;
pub use surface::SurfaceAssembler;
pub use vector::VectorAssembler;

use rt_protocol::Field;

/// One assembler per subscribed stream, picked by kind at registration
/// time (§9). `Surface`/`Vector` feed a single field at a time since their
/// wire representation is one field per message; `ByteStream`/`Chain` feed
/// the whole field list of a message.
pub enum Assembler {
    ByteStream(ByteStreamAssembler),
    Chain(ChainAssembler),
    Vector(VectorAssembler),
    Surface(SurfaceAssembler),
}

impl Assembler {
    /// Feed a full message's fields. For `Vector`/`Surface` this looks up
    /// `field_id` among `fields`; for `ByteStream`/`Chain` the whole list is
    /// handed to the underlying assembler.
    pub fn feed(&mut self, fields: &[Field], field_id: u16, row: u32) -> Vec<AssemblerEvent> {
        match self {
            Assembler::ByteStream(a) => a.feed(fields),
            Assembler::Chain(a) => a.feed(fields),
            Assembler::Vector(a) => fields.iter().find(|f| f.id == field_id).map(|f| a.feed(f)).unwrap_or_default(),
            Assembler::Surface(a) => {
                fields.iter().find(|f| f.id == field_id).map(|f| a.feed(row, f)).unwrap_or_default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_protocol::WireValue;

    #[test]
    fn dispatch_by_kind_reaches_the_right_variant() {
        let mut asm = Assembler::Vector(VectorAssembler::new());
        let fields = vec![Field::new(5, WireValue::VectorDouble { precision: 0, values: vec![1.0, 2.0] })];
        let events = asm.feed(&fields, 5, 0);
        assert_eq!(events, vec![AssemblerEvent::VectorImage(vec![1.0, 2.0])]);
    }
}
