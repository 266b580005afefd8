//! [`SubscriptionChannel`]: the public contract of §4.8 — subscribe/
//! unsubscribe, BDS, push and pull consumption, all driven by one dedicated
//! channel thread (`rt-loop`) running the session loop below.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rt_cache::RecordCache;
use rt_loop::{ChannelThread, LoopContext, TickClock, WorkItem};
use rt_protocol::{DecodeOutcome, Envelope, Field, MessageType, Protocol, WireCodec, WireValue, codec_for};
use rt_schema::Schema;
use rt_socket::Socket;
use tracing::{debug, info, warn};

use crate::event::{Callbacks, Event, Tag, dispatch};
use crate::pump::EventPump;

#[derive(Debug, thiserror::Error)]
pub enum SubError {
    #[error("socket error: {0}")]
    Socket(#[from] rt_socket::SocketError),
    #[error("channel already started")]
    AlreadyStarted,
    #[error("re-entrant call from the channel's own callback thread was ignored")]
    Reentrant,
}

thread_local! {
    /// Set while a `Callbacks` method is executing on the channel thread
    /// (§5: "the library detects reentrant lock attempts by the same
    /// thread and treats them as no-ops"). `Subscribe`/`Unsubscribe`/
    /// `OpenBDS` check this before touching the shared mutex.
    static IN_CALLBACK: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

struct SubEntry {
    tag: Tag,
    is_snapshot: bool,
}

struct SharedState {
    cache: RecordCache,
    schema: Schema,
    subs: HashMap<(String, String), SubEntry>,
    stream_tags: HashMap<u32, Tag>,
    services: HashMap<String, bool>,
    caching_enabled: bool,
    /// (service,ticker) pairs whose currently-queued pump entry should
    /// report `is_image = true` once drained — an image resets the record's
    /// counters, but the pump only materializes the cumulative dirty state
    /// at drain time (§4.7's "on drain" rule), so we remember separately
    /// whether any image arrived during the pending burst.
    pending_image: HashSet<(String, String)>,
    bds: HashMap<String, Tag>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            cache: RecordCache::new(),
            schema: Schema::new(),
            subs: HashMap::new(),
            stream_tags: HashMap::new(),
            services: HashMap::new(),
            caching_enabled: true,
            pending_image: HashSet::new(),
            bds: HashMap::new(),
        }
    }
}

enum Sink {
    Callback(Box<dyn Callbacks>),
    Pump(Arc<EventPump>),
}

impl Sink {
    fn emit(&mut self, evt: Event) {
        match self {
            Sink::Callback(cb) => {
                IN_CALLBACK.with(|f| f.set(true));
                dispatch(&evt, cb.as_mut());
                IN_CALLBACK.with(|f| f.set(false));
            }
            Sink::Pump(pump) => pump.push(evt),
        }
    }

    fn is_pump(&self) -> bool {
        matches!(self, Sink::Pump(_))
    }
}

/// Subscribe/unsubscribe/BDS handle over a channel thread driving one
/// session (§4.8). Construct with [`SubscriptionChannel::with_callbacks`]
/// for push mode or [`SubscriptionChannel::with_pump`] for pull mode.
pub struct SubscriptionChannel {
    state: Arc<Mutex<SharedState>>,
    pump: Option<Arc<EventPump>>,
    sink_handle: Option<SinkHandle>,
    thread: Option<ChannelThread>,
    protocol: Protocol,
}

impl SubscriptionChannel {
    /// Push mode: events are dispatched to `cb` on the channel thread.
    pub fn with_callbacks(cb: impl Callbacks + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(SharedState::new())),
            pump: None,
            sink_handle: Some(SinkHandle::Callback(Box::new(cb))),
            thread: None,
            protocol: Protocol::Binary,
        }
    }

    /// Pull mode: events are enqueued onto an [`EventPump`] the application
    /// drains with [`Self::read`].
    pub fn with_pump(capacity: usize) -> Self {
        let pump = Arc::new(EventPump::new(capacity));
        Self {
            state: Arc::new(Mutex::new(SharedState::new())),
            pump: Some(pump.clone()),
            sink_handle: Some(SinkHandle::Pump(pump)),
            thread: None,
            protocol: Protocol::Binary,
        }
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    /// Bring the session up (§4.8 `Start`). `hosts` is the §6.1 endpoint
    /// string; `user` is the plaintext session username (§1: "no TLS or
    /// authentication beyond a plaintext username/session handshake").
    pub fn start(&mut self, hosts: impl Into<String>, user: impl Into<String>) -> Result<(), SubError> {
        if self.thread.is_some() {
            return Err(SubError::AlreadyStarted);
        }
        let sink = match self.sink_handle.take() {
            Some(SinkHandle::Callback(cb)) => Sink::Callback(cb),
            Some(SinkHandle::Pump(pump)) => Sink::Pump(pump),
            None => return Err(SubError::AlreadyStarted),
        };
        let hosts = hosts.into();
        let user = user.into();
        let state = self.state.clone();
        let protocol = self.protocol;
        self.thread = Some(ChannelThread::spawn("rt-sub", move |ctx| {
            run_session(ctx, hosts, user, state, sink, protocol)
        }));
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut t) = self.thread.take() {
            t.stop();
            t.join();
        }
    }

    /// Register interest in (service,ticker); `tag` is returned on every
    /// subsequent event for this stream (§4.8). Returns the assigned
    /// stream id once the peer has granted one (0 before the first image).
    pub fn subscribe(&self, service: &str, ticker: &str, tag: Tag) -> Result<(), SubError> {
        if IN_CALLBACK.with(|f| f.get()) {
            warn!("reentrant Subscribe() from channel callback ignored");
            return Err(SubError::Reentrant);
        }
        let mut st = self.state.lock().unwrap();
        st.cache.get_or_create(service, ticker).inc_ref();
        st.subs
            .entry((service.to_owned(), ticker.to_owned()))
            .or_insert(SubEntry { tag, is_snapshot: false });
        Ok(())
    }

    /// One-shot snapshot subscribe (§4.8 `IsSnapshot`): the peer delivers a
    /// single image and no further updates.
    pub fn subscribe_snapshot(&self, service: &str, ticker: &str, tag: Tag) -> Result<(), SubError> {
        if IN_CALLBACK.with(|f| f.get()) {
            return Err(SubError::Reentrant);
        }
        let mut st = self.state.lock().unwrap();
        st.cache.get_or_create(service, ticker).inc_ref();
        st.subs
            .entry((service.to_owned(), ticker.to_owned()))
            .or_insert(SubEntry { tag, is_snapshot: true });
        Ok(())
    }

    pub fn unsubscribe(&self, service: &str, ticker: &str) -> Result<(), SubError> {
        if IN_CALLBACK.with(|f| f.get()) {
            return Err(SubError::Reentrant);
        }
        let mut st = self.state.lock().unwrap();
        let key = (service.to_owned(), ticker.to_owned());
        let tag = st.subs.get(&key).map(|e| e.tag);
        if let Some(rec) = st.cache.get_mut(service, ticker) {
            rec.dec_ref();
        }
        let evicted = st.cache.evict_if_unreferenced(service, ticker);
        if evicted {
            st.subs.remove(&key);
        }
        drop(st);
        if let (Some(pump), Some(tag)) = (&self.pump, tag) {
            pump.close_stream(tag);
        }
        Ok(())
    }

    pub fn open_bds(&self, _service: &str, bds_name: &str, tag: Tag) -> Result<(), SubError> {
        if IN_CALLBACK.with(|f| f.get()) {
            return Err(SubError::Reentrant);
        }
        let mut st = self.state.lock().unwrap();
        st.bds.insert(bds_name.to_owned(), tag);
        Ok(())
    }

    pub fn set_cache(&self, enabled: bool) {
        self.state.lock().unwrap().caching_enabled = enabled;
    }

    pub fn is_snapshot(&self, service: &str, ticker: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .subs
            .get(&(service.to_owned(), ticker.to_owned()))
            .is_some_and(|e| e.is_snapshot)
    }

    /// Pull-mode `Read(timeout)` (§4.8). For a `Data` event this is where
    /// conflation is actually finalized: the record's dirty list is drained
    /// and its queued flag cleared inside the same critical section
    /// (§4.7's "on drain" rule), not at enqueue time.
    pub fn read(&self, timeout: Duration) -> Option<Event> {
        let pump = self.pump.as_ref()?;
        let evt = pump.wait(timeout)?;
        Some(self.finalize(evt))
    }

    fn finalize(&self, evt: Event) -> Event {
        if let Event::Data { tag, service, ticker, is_image: _, fields } = &evt {
            if fields.is_empty() {
                let mut st = self.state.lock().unwrap();
                let is_image = st.pending_image.remove(&(service.clone(), ticker.clone()));
                let drained = st
                    .cache
                    .get_mut(service, ticker)
                    .map(|rec| {
                        rec.clear_queued();
                        rec.drain_dirty()
                    })
                    .unwrap_or_default();
                return Event::Data {
                    tag: *tag,
                    service: service.clone(),
                    ticker: ticker.clone(),
                    is_image,
                    fields: drained,
                };
            }
        }
        evt
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().cache.len()
    }
}

impl Drop for SubscriptionChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The sink a `SubscriptionChannel` constructed via `with_callbacks` hands
/// back for the caller to pass into `start_with_sink` once ready — needed
/// because the callback object must move into the channel thread at start
/// time, not construction time (so `Start` can be deferred).
pub enum SinkHandle {
    Callback(Box<dyn Callbacks>),
    Pump(Arc<EventPump>),
}

fn mark_schema(state: &Arc<Mutex<SharedState>>, blob: &str) -> usize {
    match Schema::parse(blob) {
        Ok(schema) => {
            let len = schema.len();
            state.lock().unwrap().schema = schema;
            len
        }
        Err(e) => {
            warn!(error = %e, "malformed schema blob from peer");
            0
        }
    }
}

/// Apply one decoded envelope to shared state and emit the corresponding
/// event(s). Runs on the channel thread only.
fn handle_envelope(state: &Arc<Mutex<SharedState>>, sink: &mut Sink, env: Envelope) {
    match env.msg_type {
        MessageType::Mount => {
            let blob = env.fields.first().map(|f| f.value.to_text()).unwrap_or_default();
            let n = mark_schema(state, &blob);
            sink.emit(Event::Schema { field_count: n });
        }
        MessageType::Image | MessageType::Update => {
            let is_image = env.msg_type == MessageType::Image;
            let key = (env.svc.clone(), env.tkr.clone());
            let mut st = state.lock().unwrap();
            if !st.subs.contains_key(&key) {
                return; // unsolicited message for a stream we don't hold
            }
            let tag = st.subs[&key].tag;
            if env.stream_id != 0 {
                st.cache.assign_stream_id(&env.svc, &env.tkr, env.stream_id);
                st.stream_tags.insert(env.stream_id, tag);
            }
            let caching_enabled = st.caching_enabled;
            if caching_enabled {
                if let Some(rec) = st.cache.get_mut(&env.svc, &env.tkr) {
                    rec.apply(&env.fields, is_image);
                }
            }
            if sink.is_pump() {
                if is_image {
                    st.pending_image.insert(key.clone());
                }
                let should_push = if caching_enabled {
                    st.cache.get_mut(&env.svc, &env.tkr).is_some_and(|rec| rec.mark_queued())
                } else {
                    true
                };
                drop(st);
                if should_push {
                    // Placeholder entry: `SubscriptionChannel::read` drains
                    // the record's cumulative dirty state at pop time.
                    sink.emit(Event::Data {
                        tag,
                        service: env.svc,
                        ticker: env.tkr,
                        is_image,
                        fields: Vec::new(),
                    });
                }
            } else {
                drop(st);
                sink.emit(Event::Data { tag, service: env.svc, ticker: env.tkr, is_image, fields: env.fields });
            }
        }
        MessageType::StatusDead => {
            let st = state.lock().unwrap();
            if let Some(entry) = st.subs.get(&(env.svc.clone(), env.tkr.clone())) {
                let tag = entry.tag;
                let reason = env.fields.first().map(|f| f.value.to_text()).unwrap_or_default();
                drop(st);
                sink.emit(Event::Dead { tag, service: env.svc, ticker: env.tkr, reason });
            }
        }
        MessageType::StatusStale => {
            let st = state.lock().unwrap();
            if let Some(entry) = st.subs.get(&(env.svc.clone(), env.tkr.clone())) {
                let tag = entry.tag;
                drop(st);
                sink.emit(Event::Stale { tag, service: env.svc, ticker: env.tkr });
            }
        }
        MessageType::StatusRecovering => {
            let st = state.lock().unwrap();
            if let Some(entry) = st.subs.get(&(env.svc.clone(), env.tkr.clone())) {
                let tag = entry.tag;
                drop(st);
                sink.emit(Event::Recovering { tag, service: env.svc, ticker: env.tkr });
            }
        }
        MessageType::StreamDone => {
            let st = state.lock().unwrap();
            if let Some(entry) = st.subs.get(&(env.svc.clone(), env.tkr.clone())) {
                let tag = entry.tag;
                drop(st);
                sink.emit(Event::StreamDone { tag, service: env.svc, ticker: env.tkr });
            }
        }
        MessageType::Bds => {
            let st = state.lock().unwrap();
            if let Some(&tag) = st.bds.get(&env.tkr) {
                drop(st);
                for field in &env.fields {
                    sink.emit(Event::Symbol { tag, msg: field.value.to_text(), err: None });
                }
            }
        }
        MessageType::GlobalStatus => {
            let up = env.fields.first().is_some_and(|f| f.value.to_text() == "UP");
            let mut st = state.lock().unwrap();
            let was_up = st.services.get(&env.svc).copied();
            if was_up != Some(up) {
                st.services.insert(env.svc.clone(), up);
                drop(st);
                sink.emit(Event::Service { name: env.svc, up });
            }
        }
        _ => debug!(?env.msg_type, "unhandled message type in subscription channel"),
    }
}

/// Mark every currently-held record stale and re-announce it for resubscribe
/// on the next connect (§4.8 failure semantics: "transient peer flap: ...
/// marks every subscribed record stale... on reconnect re-sends all
/// subscribes").
fn mark_all_stale(state: &Arc<Mutex<SharedState>>, sink: &mut Sink) {
    let st = state.lock().unwrap();
    let entries: Vec<(String, String, Tag)> =
        st.subs.iter().map(|((s, t), e)| (s.clone(), t.clone(), e.tag)).collect();
    drop(st);
    for (service, ticker, tag) in entries {
        sink.emit(Event::Stale { tag, service, ticker });
    }
}

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 64 * 1024;

async fn run_session(
    mut ctx: LoopContext,
    hosts: String,
    user: String,
    state: Arc<Mutex<SharedState>>,
    mut sink: Sink,
    protocol: Protocol,
) {
    let codec = codec_for(protocol);

    loop {
        if ctx.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut socket = match Socket::new(&hosts, 16 * 1024 * 1024, 4 * 1024 * 1024, "rt-sub") {
            Ok(s) => s,
            Err(e) => {
                sink.emit(Event::Error { fatal: true, reason: e.to_string() });
                return;
            }
        };
        if socket.connect().await.is_err() {
            sink.emit(Event::Connect { up: false });
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        }
        sink.emit(Event::Connect { up: true });
        info!("rt-sub session connected");

        let open_env = Envelope::new(MessageType::Open, "", "", 0)
            .with_fields(vec![Field::new(0, WireValue::Str(user.clone().into_bytes()))]);
        if let Ok(bytes) = codec.encode(&open_env) {
            let _ = socket.enqueue(&bytes);
        }
        {
            let st = state.lock().unwrap();
            for (service, ticker) in st.subs.keys() {
                let env = Envelope::new(MessageType::Mount, service.clone(), ticker.clone(), 0);
                if let Ok(bytes) = codec.encode(&env) {
                    let _ = socket.enqueue(&bytes);
                }
            }
        }

        let mut tick = TickClock::new();
        loop {
            if ctx.stopped.load(Ordering::SeqCst) {
                socket.disconnect();
                return;
            }
            tokio::select! {
                biased;
                work = ctx.work_rx.recv() => {
                    match work {
                        Some(WorkItem::Stop) | None => { socket.disconnect(); return; }
                        Some(WorkItem::Run(f)) => f(),
                    }
                }
                result = socket.read_some(READ_CHUNK) => {
                    match result {
                        Ok(0) => {
                            sink.emit(Event::Connect { up: false });
                            mark_all_stale(&state, &mut sink);
                            break;
                        }
                        Ok(_) => {
                            loop {
                                let snapshot = socket.inbound.bytes().to_vec();
                                if snapshot.is_empty() {
                                    break;
                                }
                                match codec.decode(&snapshot) {
                                    Ok(DecodeOutcome::Message { envelope, consumed }) => {
                                        let _ = socket.inbound.consume(0, consumed);
                                        handle_envelope(&state, &mut sink, envelope);
                                    }
                                    Ok(DecodeOutcome::Incomplete) => break,
                                    Err(e) => {
                                        sink.emit(Event::Error { fatal: true, reason: e.to_string() });
                                        socket.disconnect();
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "read error, treating as disconnect");
                            sink.emit(Event::Connect { up: false });
                            mark_all_stale(&state, &mut sink);
                            break;
                        }
                    }
                }
                _ = socket.write_some(READ_CHUNK), if socket.outbound.filled() > 0 => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {
                    if tick.due(std::time::Instant::now()) {
                        sink.emit(Event::Idle);
                    }
                }
            }
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_increments_refcount_and_unsubscribe_evicts() {
        let chan = SubscriptionChannel::with_pump(16);
        chan.subscribe("BB", "IBM", 42).unwrap();
        assert_eq!(chan.record_count(), 1);
        chan.unsubscribe("BB", "IBM").unwrap();
        assert_eq!(chan.record_count(), 0);
    }

    #[test]
    fn reentrant_subscribe_from_callback_thread_is_a_no_op() {
        let chan = SubscriptionChannel::with_pump(16);
        IN_CALLBACK.with(|f| f.set(true));
        let result = chan.subscribe("BB", "IBM", 1);
        IN_CALLBACK.with(|f| f.set(false));
        assert!(matches!(result, Err(SubError::Reentrant)));
        assert_eq!(chan.record_count(), 0);
    }

    #[test]
    fn snapshot_subscription_reports_is_snapshot() {
        let chan = SubscriptionChannel::with_pump(16);
        chan.subscribe_snapshot("BB", "IBM", 1).unwrap();
        assert!(chan.is_snapshot("BB", "IBM"));
        chan.subscribe("BB", "MSFT", 2).unwrap();
        assert!(!chan.is_snapshot("BB", "MSFT"));
    }

    #[test]
    fn set_cache_toggle_is_stored() {
        let chan = SubscriptionChannel::with_pump(16);
        chan.set_cache(false);
        assert!(!chan.state.lock().unwrap().caching_enabled);
    }

    #[test]
    fn handle_envelope_schema_then_image_then_update_emits_in_order() {
        let state = Arc::new(Mutex::new(SharedState::new()));
        state.lock().unwrap().subs.insert(
            ("BB".into(), "IBM".into()),
            SubEntry { tag: 42, is_snapshot: false },
        );
        let mut events = Vec::new();
        let pump = Arc::new(EventPump::new(16));
        let mut sink = Sink::Pump(pump.clone());

        let schema_env = Envelope::new(MessageType::Mount, "", "", 0)
            .with_fields(vec![Field::new(0, WireValue::Str(b"BID 22 PRICE 12|ASK 25 PRICE 12".to_vec()))]);
        handle_envelope(&state, &mut sink, schema_env);

        let image_env = Envelope::new(MessageType::Image, "BB", "IBM", 7).with_fields(vec![
            Field::new(22, WireValue::F64(100.25)),
            Field::new(25, WireValue::F64(100.75)),
        ]);
        handle_envelope(&state, &mut sink, image_env);

        let update_env =
            Envelope::new(MessageType::Update, "BB", "IBM", 7).with_fields(vec![Field::new(22, WireValue::F64(100.30))]);
        handle_envelope(&state, &mut sink, update_env);

        while let Some(evt) = pump.wait(Duration::from_millis(1)) {
            events.push(evt);
        }
        assert!(matches!(events[0], Event::Schema { field_count: 2 }));
        assert!(matches!(events[1], Event::Data { is_image: true, tag: 42, .. }));
    }

    #[test]
    fn unsubscribe_purges_pending_pump_entries() {
        let chan = SubscriptionChannel::with_pump(16);
        chan.subscribe("BB", "IBM", 5).unwrap();
        chan.pump.as_ref().unwrap().push(Event::Stale { tag: 5, service: "BB".into(), ticker: "IBM".into() });
        chan.unsubscribe("BB", "IBM").unwrap();
        assert!(chan.pump.as_ref().unwrap().is_empty());
    }
}
