//! The subscribe-side channel (§4.8): subscribe/unsubscribe/BDS, push and
//! pull consumption, all driven by one dedicated channel thread.
//!
//! [`SubscriptionChannel`] owns a [`rt_cache::RecordCache`] and a
//! [`rt_schema::Schema`] behind a single mutex (§5: "protected by a single
//! channel mutex held only for the duration of map lookups and dirty-list
//! manipulation, never across I/O or user callbacks"), and drives the
//! session socket on a dedicated OS thread via `rt-loop`. Events reach the
//! application either as [`event::Callbacks`] invocations (push) or through
//! an [`pump::EventPump`] drained with [`SubscriptionChannel::read`] (pull)
//! — §9: "choose one model per binding; the core offers both".

pub mod channel;
pub mod event;
pub mod pump;

pub use channel::{SinkHandle, SubError, SubscriptionChannel};
pub use event::{Callbacks, Event, Tag};
pub use pump::EventPump;
