//! Events an [`crate::Assembler`] hands back to its caller (§4.12). One sum
//! type across all four families, per §9's "multiple callback mixins
//! collapse into a single event sum type" guidance.

#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerEvent {
    /// A reassembled fragment, in offset order (§4.12 "`OnData(chunk)` per
    /// fragment").
    ByteStreamData(Vec<u8>),
    /// The full payload has been received; carries its total length.
    ByteStreamComplete(usize),
    /// Decode failure or a gap in the fragment sequence (§4.12 "`OnError`
    /// on decode failure or stream dead").
    ByteStreamError(String),
    /// One member ticker of the chain, in link-then-member order.
    ChainMember(String),
    /// The link carrying `final=true` has been consumed.
    ChainDone,
    /// Full-image replacement (§4.12 "vector<double> image").
    VectorImage(Vec<f64>),
    /// Index-addressed partial update (§4.12 "vector<(index,value)> update").
    VectorUpdate(Vec<(u32, f64)>),
    SurfaceRowImage { row: u32, values: Vec<f64> },
    SurfaceRowUpdate { row: u32, updates: Vec<(u32, f64)> },
}
