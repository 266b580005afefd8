//! The application-visible event sum type (§9 design notes: "multiple
//! callback mixins collapse into a single event sum type consumed either by
//! a callback vtable or by an event pump"). [`crate::channel::SubscriptionChannel`]
//! produces exactly one of these per notable occurrence and either hands it
//! straight to a [`Callbacks`] impl (push mode) or pushes it onto the
//! [`crate::pump::EventPump`] (pull mode) — never both for the same
//! occurrence.

use rt_protocol::Field;

/// Opaque application token (§9: "do not interpret"), returned on every
/// event for the stream it was supplied at `subscribe`/`open_bds` time.
pub type Tag = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connection state transition. Precedes any `Schema`/`Data` for a
    /// session (§5 ordering guarantee).
    Connect { up: bool },
    /// A service status transition, announced exactly once per transition
    /// (§3.4).
    Service { name: String, up: bool },
    /// The schema was (re)installed this session.
    Schema { field_count: usize },
    Data {
        tag: Tag,
        service: String,
        ticker: String,
        is_image: bool,
        fields: Vec<Field>,
    },
    Dead {
        tag: Tag,
        service: String,
        ticker: String,
        reason: String,
    },
    Stale {
        tag: Tag,
        service: String,
        ticker: String,
    },
    Recovering {
        tag: Tag,
        service: String,
        ticker: String,
    },
    StreamDone {
        tag: Tag,
        service: String,
        ticker: String,
    },
    /// A BDS membership announcement: one new ticker added to a broadcast
    /// data stream (§4.8 `OpenBDS`).
    Symbol {
        tag: Tag,
        msg: String,
        err: Option<String>,
    },
    Idle,
    Error { fatal: bool, reason: String },
}

impl Event {
    /// The (service,ticker) identity this event belongs to, if any —
    /// used by [`crate::pump::EventPump::close_stream`] to purge pending
    /// entries for an unsubscribed record (§4.8: "`Close(record)` removes
    /// all pending entries referring to that record").
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Event::Data { tag, .. }
            | Event::Dead { tag, .. }
            | Event::Stale { tag, .. }
            | Event::Recovering { tag, .. }
            | Event::StreamDone { tag, .. }
            | Event::Symbol { tag, .. } => Some(*tag),
            _ => None,
        }
    }
}

/// Push-mode callbacks (§4.8), fired on the channel thread and never
/// re-entrant. Every method defaults to a no-op so a binding only overrides
/// what it cares about.
pub trait Callbacks: Send {
    fn on_connect(&mut self, _up: bool) {}
    fn on_service(&mut self, _name: &str, _up: bool) {}
    fn on_schema(&mut self, _field_count: usize) {}
    fn on_data(&mut self, _service: &str, _ticker: &str, _tag: Tag, _is_image: bool, _fields: &[Field]) {}
    fn on_dead(&mut self, _service: &str, _ticker: &str, _tag: Tag, _reason: &str) {}
    fn on_stale(&mut self, _service: &str, _ticker: &str, _tag: Tag) {}
    fn on_recovering(&mut self, _service: &str, _ticker: &str, _tag: Tag) {}
    fn on_stream_done(&mut self, _service: &str, _ticker: &str, _tag: Tag) {}
    fn on_symbol(&mut self, _msg: &str, _err: Option<&str>) {}
    fn on_idle(&mut self) {}
    fn on_error(&mut self, _fatal: bool, _reason: &str) {}
}

/// Dispatch one [`Event`] to a [`Callbacks`] impl — the push-mode delivery
/// path `SubscriptionChannel` uses when no event pump is configured.
pub fn dispatch(evt: &Event, cb: &mut dyn Callbacks) {
    match evt {
        Event::Connect { up } => cb.on_connect(*up),
        Event::Service { name, up } => cb.on_service(name, *up),
        Event::Schema { field_count } => cb.on_schema(*field_count),
        Event::Data { service, ticker, tag, is_image, fields } => {
            cb.on_data(service, ticker, *tag, *is_image, fields)
        }
        Event::Dead { service, ticker, tag, reason } => cb.on_dead(service, ticker, *tag, reason),
        Event::Stale { service, ticker, tag } => cb.on_stale(service, ticker, *tag),
        Event::Recovering { service, ticker, tag } => cb.on_recovering(service, ticker, *tag),
        Event::StreamDone { service, ticker, tag } => cb.on_stream_done(service, ticker, *tag),
        Event::Symbol { msg, err, .. } => cb.on_symbol(msg, err.as_deref()),
        Event::Idle => cb.on_idle(),
        Event::Error { fatal, reason } => cb.on_error(*fatal, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl Callbacks for Recorder {
        fn on_connect(&mut self, up: bool) {
            self.seen.push(format!("connect({up})"));
        }
        fn on_data(&mut self, service: &str, ticker: &str, _tag: Tag, is_image: bool, _fields: &[Field]) {
            self.seen.push(format!("data({service},{ticker},{is_image})"));
        }
    }

    #[test]
    fn dispatch_routes_to_matching_callback() {
        let mut rec = Recorder::default();
        dispatch(&Event::Connect { up: true }, &mut rec);
        dispatch(
            &Event::Data { tag: 1, service: "BB".into(), ticker: "IBM".into(), is_image: true, fields: vec![] },
            &mut rec,
        );
        assert_eq!(rec.seen, vec!["connect(true)", "data(BB,IBM,true)"]);
    }

    #[test]
    fn event_tag_is_none_for_session_level_events() {
        assert_eq!(Event::Connect { up: true }.tag(), None);
        assert_eq!(Event::Idle.tag(), None);
        assert_eq!(Event::Stale { tag: 7, service: "A".into(), ticker: "B".into() }.tag(), Some(7));
    }
}
