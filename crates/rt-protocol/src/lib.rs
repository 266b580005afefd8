//! Wire framing and protocol dispatch (§4.5): three interchangeable wire
//! encodings sharing one message envelope and one field-value model.
//!
//! This crate is deliberately protocol-agnostic about transport — it only
//! turns bytes into [`Envelope`]s and back. `rt-socket` owns the actual
//! read/write loop and hands this crate whatever bytes it has buffered.

pub mod codec;
pub mod envelope;
pub mod field;

pub use codec::{BinaryCodec, CodecError, DecodeOutcome, MfCodec, WireCodec, XmlCodec, codec_for};
pub use envelope::{Envelope, MessageType, Protocol};
pub use field::{Field, WireTag, WireValue};
