//! The administrative cockpit channel (§4.13): ADD/DEL/REFRESH/BDS
//! request/response traffic on a connection separate from the subscribe
//! and publish data channels, with a bounded lock to coordinate with the
//! LVC reader without letting a stuck admin peer stall it.

pub mod channel;
pub mod lock;
pub mod protocol;

pub use channel::{CockpitChannel, CockpitError};
pub use lock::BoundedLock;
pub use protocol::{CockpitCodecError, CockpitRequest, CockpitResponse, RequestKind};
