//! The three interchangeable wire encodings (§4.5), all implementing
//! [`WireCodec`] against the shared [`Envelope`](crate::envelope::Envelope)
//! model so the channel can negotiate one protocol per session and never
//! special-case the others again.

pub mod binary;
pub mod mf;
pub mod xml;

use crate::envelope::Envelope;

pub use binary::BinaryCodec;
pub use mf::MfCodec;
pub use xml::XmlCodec;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("buffer ended mid-frame")]
    Truncated,
}

/// Result of attempting to decode one frame from the front of an inbound
/// buffer. `Incomplete` means "retained in the inbound buffer, try again
/// once more bytes arrive" (§4.5 failure semantics) — never an error.
#[derive(Debug)]
pub enum DecodeOutcome {
    Message { envelope: Envelope, consumed: usize },
    Incomplete,
}

/// A wire encoding: encode one envelope to bytes, decode the first complete
/// frame (if any) from the front of a buffer. A decoder must produce the
/// same field-list semantics regardless of which of the three encodings
/// produced it (§4.5 invariant) — only the bytes differ.
pub trait WireCodec {
    fn encode(&self, env: &Envelope) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, buf: &[u8]) -> Result<DecodeOutcome, CodecError>;
}

/// Which protocol a session negotiated, resolved to its codec implementation.
pub fn codec_for(protocol: crate::envelope::Protocol) -> Box<dyn WireCodec + Send + Sync> {
    match protocol {
        crate::envelope::Protocol::Binary => Box::new(BinaryCodec::default()),
        crate::envelope::Protocol::Mf => Box::new(MfCodec),
        crate::envelope::Protocol::Xml => Box::new(XmlCodec),
    }
}
