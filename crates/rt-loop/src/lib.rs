//! The per-channel poll/timer substrate (§4.3).
//!
//! The source's single-threaded FD-readiness loop becomes, per
//! `SPEC_FULL.md`'s concurrency substrate note, one dedicated OS thread per
//! channel running a single-threaded (`current_thread`) Tokio runtime. This
//! crate supplies the pieces that are common to every channel's loop body —
//! the 1-second timer table, the process-ordered idle-callback table, and
//! the cross-thread work queue used by `Send()`/`Stop()` — while the actual
//! `tokio::select!` arm that waits on socket readiness lives with the socket
//! (`rt-socket`) since that's the one thing that differs per channel.
//!
//! This is the `Runtime` value from §9's design notes: the source's implicit
//! global thread pool becomes an explicit value the application (here, the
//! `rt-sub`/`rt-pub` channel) owns one of per channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A unit of cross-thread work enqueued onto a channel's loop: either an
/// arbitrary closure to run on the channel thread (how `Send()`-style calls
/// reach the owning thread without taking its mutex across I/O) or a request
/// to stop the loop.
pub enum WorkItem {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Stop,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItem::Run(_) => f.write_str("WorkItem::Run(..)"),
            WorkItem::Stop => f.write_str("WorkItem::Stop"),
        }
    }
}

/// A registered periodic callback. Timers fire in registration order
/// (§4.3: "timers fire in registration order").
struct TimerEntry {
    id: u64,
    handler: Box<dyn FnMut() + Send>,
}

/// 1-second timer table. Handlers must not block (§4.3) — the loop is
/// single-threaded per channel and timer handlers run inline with I/O
/// dispatch, never re-entrantly.
#[derive(Default)]
pub struct TimerTable {
    next_id: u64,
    entries: Vec<TimerEntry>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl FnMut() + Send + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(TimerEntry { id, handler: Box::new(handler) });
        id
    }

    pub fn unregister(&mut self, id: u64) {
        self.entries.retain(|e| e.id != id);
    }

    /// Fire every registered timer, in registration order.
    pub fn fire_all(&mut self) {
        for entry in &mut self.entries {
            (entry.handler)();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-ordered idle-callback table (§4.3: "idle callbacks are
/// process-ordered"), fired alongside timers once per tick after I/O
/// dispatch.
#[derive(Default)]
pub struct IdleTable {
    next_id: u64,
    entries: Vec<TimerEntry>,
}

impl IdleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl FnMut() + Send + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(TimerEntry { id, handler: Box::new(handler) });
        id
    }

    pub fn unregister(&mut self, id: u64) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn fire_all(&mut self) {
        for entry in &mut self.entries {
            (entry.handler)();
        }
    }
}

/// Drives the "after I/O, if >= 1s elapsed since last tick, fire all
/// timers and idle callbacks" rule from §4.3 step 5. Owned by the loop
/// body running on the channel thread; not `Send` across the tick boundary
/// by design (timer/idle handlers run on the channel thread only).
pub struct TickClock {
    last_tick: Instant,
}

impl TickClock {
    pub fn new() -> Self {
        Self { last_tick: Instant::now() }
    }

    /// Returns `true` (and resets the clock) if at least [`TICK_INTERVAL`]
    /// has elapsed since the last fire.
    pub fn due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_tick) >= TICK_INTERVAL {
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    /// Deadline for the next tick, for use in a `tokio::select!`/readiness
    /// wait's timeout arm (§4.3 step 2: "next-wake deadline = min(remaining
    /// idle interval, next timer tick)").
    pub fn next_deadline(&self) -> Instant {
        self.last_tick + TICK_INTERVAL
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a running channel thread: lets other application threads
/// enqueue work and request a stop. `Stop()` is idempotent (§5).
pub struct ChannelThread {
    work_tx: mpsc::UnboundedSender<WorkItem>,
    stopped: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

/// What a loop body receives when it's spawned: the receiving end of the
/// work queue and a flag to check for cooperative shutdown.
pub struct LoopContext {
    pub work_rx: mpsc::UnboundedReceiver<WorkItem>,
    pub stopped: Arc<AtomicBool>,
}

impl ChannelThread {
    /// Spawn a dedicated OS thread running a single-threaded Tokio runtime,
    /// and hand `body` the work-queue receiver. `body` owns the actual
    /// `tokio::select!` loop (socket readiness + timer tick + work queue)
    /// since the socket type differs per caller; it runs to completion on a
    /// `LocalSet` so it's free to use `!Send` futures.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(LoopContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let ctx = LoopContext { work_rx, stopped: stopped.clone() };
        let name = name.into();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("build current_thread runtime");
                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, body(ctx));
                debug!(thread = %name, "channel loop exited");
            })
            .expect("spawn channel thread");
        Self { work_tx, stopped, join: Some(join) }
    }

    /// Enqueue a closure to run on the channel thread.
    pub fn run(&self, f: impl FnOnce() + Send + 'static) -> Result<(), LoopError> {
        self.work_tx.send(WorkItem::Run(Box::new(f))).map_err(|_| LoopError::Closed)
    }

    /// Request the loop to stop; idempotent. Does not block on thread exit
    /// — call `join` for that.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.work_tx.send(WorkItem::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Join the channel thread, blocking the caller. Safe to call after
    /// `stop()`; a no-op if already joined.
    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            if let Err(e) = handle.join() {
                warn!(?e, "channel thread panicked");
            }
        }
    }
}

impl Drop for ChannelThread {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("channel loop is no longer accepting work")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn timer_table_fires_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut timers = TimerTable::new();
        for i in 0..3 {
            let order = order.clone();
            timers.register(move || order.lock().unwrap().push(i));
        }
        timers.fire_all();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn timer_table_unregister_stops_future_fires() {
        let count = Arc::new(Mutex::new(0));
        let mut timers = TimerTable::new();
        let c = count.clone();
        let id = timers.register(move || *c.lock().unwrap() += 1);
        timers.fire_all();
        timers.unregister(id);
        timers.fire_all();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn idle_table_is_process_ordered() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut idle = IdleTable::new();
        for i in 0..3 {
            let order = order.clone();
            idle.register(move || order.lock().unwrap().push(i));
        }
        idle.fire_all();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn tick_clock_is_not_due_immediately() {
        let clock = TickClock::new();
        assert!(clock.next_deadline() > Instant::now());
    }

    #[test]
    fn tick_clock_becomes_due_after_interval() {
        let mut clock = TickClock::new();
        let future = Instant::now() + TICK_INTERVAL + Duration::from_millis(10);
        assert!(clock.due(future));
    }

    #[test]
    fn channel_thread_runs_enqueued_work_and_stops_idempotently() {
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        let mut thread = ChannelThread::spawn("test-loop", move |mut ctx| async move {
            loop {
                match ctx.work_rx.recv().await {
                    Some(WorkItem::Run(f)) => f(),
                    Some(WorkItem::Stop) | None => break,
                }
            }
        });
        thread.run(move || seen2.store(true, Ordering::SeqCst)).unwrap();
        thread.stop();
        thread.stop(); // idempotent
        thread.join();
        assert!(seen.load(Ordering::SeqCst));
    }
}
