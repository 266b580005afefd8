//! The pull-mode event pump (§4.8): a bounded FIFO an application thread
//! drains with [`EventPump::wait`] while the channel thread feeds it with
//! [`EventPump::push`]. Coalescing (a record is never present twice) is the
//! caller's job — `SubscriptionChannel` consults `Record::mark_queued`
//! before pushing a `Data`/status event, exactly as §4.7's conflation
//! contract requires; this pump only provides the bounded-FIFO-plus-condvar
//! mechanics and the `close_stream` purge.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::event::{Event, Tag};

/// Default FIFO depth before `push` starts dropping the oldest entry. The
/// source does not document an exact number; we pick a generous depth and
/// surface drops via an internal counter rather than blocking the channel
/// thread (which must never block on application consumption, §5).
pub const DEFAULT_CAPACITY: usize = 16_384;

struct Inner {
    queue: VecDeque<Event>,
    dropped: u64,
}

pub struct EventPump {
    inner: Mutex<Inner>,
    cvar: Condvar,
    capacity: usize,
}

impl EventPump {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { queue: VecDeque::new(), dropped: 0 }),
            cvar: Condvar::new(),
            capacity,
        }
    }

    /// Push an event, waking one waiter. If the pump is at capacity the
    /// oldest entry is dropped to make room — a stalled pull consumer must
    /// not be able to block the channel thread's I/O loop.
    pub fn push(&self, evt: Event) {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
        }
        inner.queue.push_back(evt);
        self.cvar.notify_one();
    }

    /// Block the calling thread for up to `timeout`, returning the next
    /// event or `None` on timeout (§4.8 `Read(timeout)`).
    pub fn wait(&self, timeout: Duration) -> Option<Event> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(evt) = inner.queue.pop_front() {
            return Some(evt);
        }
        let (mut guard, result) = self
            .cvar
            .wait_timeout_while(inner, timeout, |i| i.queue.is_empty())
            .unwrap();
        if result.timed_out() {
            return None;
        }
        guard.queue.pop_front()
    }

    /// Remove every pending entry addressed to `tag` (§4.8 `Close(record)`),
    /// called when a stream is unsubscribed so a late-drained pull consumer
    /// never sees events for a record it already closed.
    pub fn close_stream(&self, tag: Tag) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.retain(|evt| evt.tag() != Some(tag));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }
}

impl Default for EventPump {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_when_already_queued() {
        let pump = EventPump::default();
        pump.push(Event::Idle);
        assert_eq!(pump.wait(Duration::from_millis(10)), Some(Event::Idle));
    }

    #[test]
    fn wait_times_out_on_empty_queue() {
        let pump = EventPump::default();
        assert_eq!(pump.wait(Duration::from_millis(5)), None);
    }

    #[test]
    fn wait_wakes_on_push_from_another_thread() {
        let pump = Arc::new(EventPump::default());
        let pump2 = pump.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pump2.push(Event::Idle);
        });
        let evt = pump.wait(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(evt, Some(Event::Idle));
    }

    #[test]
    fn close_stream_purges_only_matching_tag() {
        let pump = EventPump::default();
        pump.push(Event::Stale { tag: 1, service: "A".into(), ticker: "X".into() });
        pump.push(Event::Stale { tag: 2, service: "A".into(), ticker: "Y".into() });
        pump.close_stream(1);
        assert_eq!(pump.len(), 1);
        assert_eq!(pump.wait(Duration::from_millis(10)).unwrap().tag(), Some(2));
    }

    #[test]
    fn push_drops_oldest_entry_once_at_capacity() {
        let pump = EventPump::new(2);
        pump.push(Event::Stale { tag: 1, service: "A".into(), ticker: "X".into() });
        pump.push(Event::Stale { tag: 2, service: "A".into(), ticker: "X".into() });
        pump.push(Event::Stale { tag: 3, service: "A".into(), ticker: "X".into() });
        assert_eq!(pump.len(), 2);
        assert_eq!(pump.dropped(), 1);
        assert_eq!(pump.wait(Duration::from_millis(10)).unwrap().tag(), Some(2));
    }
}
