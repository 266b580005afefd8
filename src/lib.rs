//! `rtedge`: the bindings surface (§4.14) — a thin handle-based facade over
//! the workspace's internal `rt-*` crates, the seam a managed-language or
//! scripted front end (not part of this core) would call through.
//!
//! This crate does not add behavior of its own; it re-exports each internal
//! crate's public handle types under one namespace so an application only
//! needs one `Cargo.toml` dependency to drive a session, read an LVC file,
//! or replay a tape. Reach for the internal crates directly (`rt_sub`,
//! `rt_pub`, `rt_lvc`, `rt_tape`, ...) when you want their error types by
//! name; `rtedge` is the convenience surface.

/// Subscribe-side channel: `rtedge::sub::SubscriptionChannel`.
pub mod sub {
    pub use rt_sub::{Callbacks, Event, SubError, SubscriptionChannel, Tag};
}

/// Publish-side channel: `rtedge::pub_::PublishChannel`. Named `pub_` since
/// `pub` is a reserved word.
pub mod pub_ {
    pub use rt_pub::{
        ByteStreamFids, ByteStreamPublisher, CHAIN_FINAL_FID, CHAIN_MAX_MEMBERS, CHAIN_MEMBER_FID_BASE, Callbacks,
        Event, PubError, PublishChannel, UpdateBuilder, chain_link_ticker, pub_chain_link, pub_vector_image,
        pub_vector_update,
    };
}

/// Memory-mapped last-value cache reader.
pub mod lvc {
    pub use rt_lvc::{Filter, LvcError, LvcReader, RecordView, SnapResult, Stats, VIEW_RETRY_BUDGET};
}

/// Memory-mapped tape reader.
pub mod tape {
    pub use rt_tape::{Direction, SeekTarget, TapeError, TapeMessage, TapeReader};
}

/// Field/schema/record data model shared by every channel and reader.
pub mod model {
    pub use rt_cache::{CacheError, Record, RecordCache};
    pub use rt_protocol::{Envelope, Field, MessageType, Protocol, WireTag, WireValue};
    pub use rt_schema::{FieldDef, FieldType, Schema, SchemaError};
}

/// Multi-message assemblers (byte-stream, chain, vector, surface) layered
/// on top of a subscribed record.
pub mod assemblers {
    pub use rt_assemblers::{
        Assembler, AssemblerEvent, ByteStreamAssembler, ByteStreamFids, CHAIN_FINAL_FID, CHAIN_MEMBER_FID_BASE,
        ChainAssembler, SurfaceAssembler, VectorAssembler, chain_link_ticker,
    };
}

/// The XML admin cockpit channel (§4.13).
pub mod cockpit {
    pub use rt_cockpit::{BoundedLock, CockpitChannel, CockpitError, CockpitRequest, CockpitResponse, RequestKind};
}

/// Transport and framing primitives an application only touches when
/// tuning socket/buffer behavior directly instead of through a channel.
pub mod transport {
    pub use rt_buffer::{Buffer, BufferError, CircularBuffer, RawLog};
    pub use rt_socket::{Socket, SocketError, WatermarkEvent};
}

#[cfg(test)]
mod tests {
    #[test]
    fn facade_modules_reexport_the_handle_types_applications_construct() {
        let _sub = crate::sub::SubscriptionChannel::with_pump(4);
        let _pub_ = crate::pub_::PublishChannel::with_pump(4);
        let _schema = crate::model::Schema::new();
    }
}
