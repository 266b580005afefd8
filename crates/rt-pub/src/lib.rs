//! Publish path (§4.9): interactive open/close, per-stream image/update
//! generation with packed-mode diffing, BDS, chain and byte-stream helpers.

pub mod builder;
pub mod channel;
pub mod event;
pub mod pump;
pub mod stream_state;

pub use builder::{
    ByteStreamFids, ByteStreamPublisher, UpdateBuilder, CHAIN_FINAL_FID, CHAIN_MAX_MEMBERS, CHAIN_MEMBER_FID_BASE,
    chain_link_ticker, pub_chain_link, pub_vector_image, pub_vector_update,
};
pub use channel::{PubError, PublishChannel, SinkHandle};
pub use event::{Callbacks, Event};
pub use pump::EventPump;
pub use stream_state::{MAX_HOPS, StreamState};
