//! The pull-mode event pump for the publish side: a bounded FIFO an
//! application thread drains with [`EventPump::wait`] while the channel
//! thread feeds it with [`EventPump::push`] (mirrors `rt_sub::pump`, minus
//! the per-stream `close_stream` purge — publish events aren't addressed to
//! a subscription the application can tear down independently).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::event::Event;

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

    pub fn push(&self, evt: Event) {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
        }
        inner.queue.push_back(evt);
        self.cvar.notify_one();
    }

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
    fn push_drops_oldest_entry_once_at_capacity() {
        let pump = EventPump::new(2);
        pump.push(Event::Overflow);
        pump.push(Event::Idle);
        pump.push(Event::PubClose { ticker: "X".into() });
        assert_eq!(pump.len(), 2);
        assert_eq!(pump.dropped(), 1);
        assert_eq!(pump.wait(Duration::from_millis(10)), Some(Event::Idle));
    }
}
