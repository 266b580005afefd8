//! [`PublishChannel`]: the public contract of §4.9 — interactive open/close,
//! update publish, BDS, packed-mode diffing — driven by one dedicated
//! channel thread (mirrors `rt_sub::channel`'s session loop).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rt_protocol::{DecodeOutcome, Envelope, Field, MessageType, Protocol, WireCodec, WireValue, codec_for};
use rt_socket::{Socket, WatermarkEvent};
use rt_loop::{ChannelThread, LoopContext, TickClock, WorkItem};
use tracing::{debug, info, warn};

use crate::builder::UpdateBuilder;
use crate::event::{Callbacks, Event, dispatch};
use crate::stream_state::StreamState;

#[derive(Debug, thiserror::Error)]
pub enum PubError {
    #[error("socket error: {0}")]
    Socket(#[from] rt_socket::SocketError),
    #[error("channel already started")]
    AlreadyStarted,
    #[error("channel not started")]
    NotStarted,
    #[error("re-entrant call from the channel's own callback thread was ignored")]
    Reentrant,
    #[error("hop count {0} exceeds the configured loop-detection limit")]
    HopLimitExceeded(u8),
    #[error("wire encode failed: {0}")]
    Encode(#[from] rt_protocol::CodecError),
}

thread_local! {
    static IN_CALLBACK: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

struct SharedState {
    streams: HashMap<String, StreamState>,
    packed: bool,
    user_pub_msg_ty: Option<MessageType>,
    perms_enabled: bool,
    /// Tickers the peer has granted an interactive open for but that
    /// haven't yet received their first image (§4.9 "Interactive mode").
    awaiting_open: HashSet<String>,
    /// Wire-encoded messages handed off from `publish()` (an application
    /// thread) for the channel thread to drain onto the socket, matching
    /// §5's "`Send(...)` calls... take the channel mutex briefly to append
    /// to the outbound buffer; actual drain is done on the channel thread".
    pending_out: VecDeque<Vec<u8>>,
    bds: HashMap<String, Vec<String>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            streams: HashMap::new(),
            packed: true,
            user_pub_msg_ty: None,
            perms_enabled: false,
            awaiting_open: HashSet::new(),
            pending_out: VecDeque::new(),
            bds: HashMap::new(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending_out.is_empty()
    }
}

enum Sink {
    Callback(Box<dyn Callbacks>),
    Pump(Arc<crate::pump::EventPump>),
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
}

pub enum SinkHandle {
    Callback(Box<dyn Callbacks>),
    Pump(Arc<crate::pump::EventPump>),
}

/// Publish-side handle over a channel thread driving one session (§4.9).
/// Construct with [`PublishChannel::with_callbacks`] for push mode or
/// [`PublishChannel::with_pump`] for pull mode.
pub struct PublishChannel {
    state: Arc<Mutex<SharedState>>,
    pump: Option<Arc<crate::pump::EventPump>>,
    sink_handle: Option<SinkHandle>,
    thread: Option<ChannelThread>,
    protocol: Protocol,
}

impl PublishChannel {
    pub fn with_callbacks(cb: impl Callbacks + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(SharedState::new())),
            pump: None,
            sink_handle: Some(SinkHandle::Callback(Box::new(cb))),
            thread: None,
            protocol: Protocol::Binary,
        }
    }

    pub fn with_pump(capacity: usize) -> Self {
        let pump = Arc::new(crate::pump::EventPump::new(capacity));
        Self {
            state: Arc::new(Mutex::new(SharedState::new())),
            pump: Some(pump.clone()),
            sink_handle: Some(SinkHandle::Pump(pump)),
            thread: None,
            protocol: Protocol::Binary,
        }
    }

    /// `SetBinary(bool)` (§4.9): binary wire vs the ASCII market-feed wire.
    pub fn set_binary(&mut self, binary: bool) {
        self.protocol = if binary { Protocol::Binary } else { Protocol::Mf };
    }

    /// `SetUnPacked(bool)` (§4.9): unpacked mode emits every field on every
    /// update instead of only the ones that changed (§4.5 packed mode).
    pub fn set_unpacked(&self, unpacked: bool) {
        self.state.lock().unwrap().packed = !unpacked;
    }

    /// `SetUserPubMsgTy(bool)` (§4.9): when set, plain (non-image) updates
    /// are announced under this message type instead of `Update`.
    pub fn set_user_pub_msg_ty(&self, ty: Option<MessageType>) {
        self.state.lock().unwrap().user_pub_msg_ty = ty;
    }

    /// `SetPerms(bool)` (§4.9): whether permission tags are enforced/sent
    /// at handshake.
    pub fn set_perms(&self, enabled: bool) {
        self.state.lock().unwrap().perms_enabled = enabled;
    }

    pub fn start(&mut self, hosts: impl Into<String>, user: impl Into<String>) -> Result<(), PubError> {
        if self.thread.is_some() {
            return Err(PubError::AlreadyStarted);
        }
        let sink = match self.sink_handle.take() {
            Some(SinkHandle::Callback(cb)) => Sink::Callback(cb),
            Some(SinkHandle::Pump(pump)) => Sink::Pump(pump),
            None => return Err(PubError::AlreadyStarted),
        };
        let hosts = hosts.into();
        let user = user.into();
        let state = self.state.clone();
        let protocol = self.protocol;
        self.thread = Some(ChannelThread::spawn("rt-pub", move |ctx| {
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

    /// `Init/AddField/.../Publish()` (§4.9) collapsed into one call: encode
    /// `builder`'s fields (after packed-mode diffing against the stream's
    /// last snapshot) and hand the wire bytes to the channel thread.
    pub fn publish(&self, builder: UpdateBuilder) -> Result<(), PubError> {
        if IN_CALLBACK.with(|f| f.get()) {
            return Err(PubError::Reentrant);
        }
        if self.thread.is_none() {
            return Err(PubError::NotStarted);
        }
        let mut st = self.state.lock().unwrap();
        let msg_type = if builder.is_image {
            MessageType::Image
        } else {
            st.user_pub_msg_ty.unwrap_or(MessageType::Update)
        };
        let packed = st.packed;
        let ticker = builder.ticker.clone();
        let tag = builder.tag;
        let is_image = builder.is_image;
        let fields = builder.into_fields();
        let stream = st.streams.entry(ticker.clone()).or_insert_with(StreamState::new);
        let out_fields = if packed { stream.diff_and_commit(&fields, is_image) } else { fields };
        stream.next_seq();
        if is_image {
            st.awaiting_open.remove(&ticker);
        }

        let env = Envelope::new(msg_type, "", ticker, tag as u32).with_fields(out_fields);
        let codec = codec_for(self.protocol);
        let bytes = codec.encode(&env)?;
        st.pending_out.push_back(bytes);
        Ok(())
    }

    /// `PubError(err)` (§4.9 "Interactive mode"): reject an `OnPubOpen`
    /// request instead of publishing an image for it.
    pub fn pub_error(&self, ticker: &str, reason: &str) -> Result<(), PubError> {
        if self.thread.is_none() {
            return Err(PubError::NotStarted);
        }
        let mut st = self.state.lock().unwrap();
        st.awaiting_open.remove(ticker);
        let env = Envelope::new(MessageType::StatusDead, "", ticker, 0)
            .with_fields(vec![Field::new(0, WireValue::Str(reason.as_bytes().to_vec()))]);
        let codec = codec_for(self.protocol);
        let bytes = codec.encode(&env)?;
        st.pending_out.push_back(bytes);
        Ok(())
    }

    /// `PublishBDS(bds_name, stream_id, list_of_tickers)` (§4.9).
    pub fn publish_bds(&self, bds_name: &str, tag: u64, members: Vec<String>) -> Result<(), PubError> {
        if self.thread.is_none() {
            return Err(PubError::NotStarted);
        }
        let mut st = self.state.lock().unwrap();
        st.bds.insert(bds_name.to_owned(), members.clone());
        let fields = members
            .into_iter()
            .enumerate()
            .map(|(i, m)| Field::new(i as u16, WireValue::Str(m.into_bytes())))
            .collect();
        let env = Envelope::new(MessageType::Bds, "", bds_name, tag as u32).with_fields(fields);
        let codec = codec_for(self.protocol);
        let bytes = codec.encode(&env)?;
        st.pending_out.push_back(bytes);
        Ok(())
    }

    /// Byte-stream publication (§4.9): segments `payload` via
    /// [`crate::builder::ByteStreamPublisher`] and publishes one update per
    /// resulting message, in order, under `ticker`/`tag`.
    pub fn publish_bytestream(
        &self,
        ticker: &str,
        tag: u64,
        payload: &[u8],
        fids: crate::builder::ByteStreamFids,
        field_payload_cap: usize,
        fields_per_msg: usize,
    ) -> Result<(), PubError> {
        let publisher = crate::builder::ByteStreamPublisher::new(fids, field_payload_cap, fields_per_msg);
        for (i, fields) in publisher.segment(payload).into_iter().enumerate() {
            let mut builder = UpdateBuilder::init(ticker, tag, i == 0);
            for field in fields {
                builder = builder.add_field(field.id, field.value);
            }
            self.publish(builder)?;
        }
        Ok(())
    }

    /// Re-publish of data that arrived through a multi-hop topology: bumps
    /// and checks the per-stream hop count before handing off to
    /// [`Self::publish`] (§9 supplemented hop-count loop detection).
    pub fn republish_relayed(&self, builder: UpdateBuilder) -> Result<(), PubError> {
        {
            let mut st = self.state.lock().unwrap();
            let stream = st.streams.entry(builder.ticker.clone()).or_insert_with(StreamState::new);
            stream.bump_hop().map_err(PubError::HopLimitExceeded)?;
        }
        self.publish(builder)
    }

    pub fn pump(&self) -> Option<&Arc<crate::pump::EventPump>> {
        self.pump.as_ref()
    }

    pub fn read(&self, timeout: Duration) -> Option<Event> {
        self.pump.as_ref()?.wait(timeout)
    }
}

impl Drop for PublishChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Apply one decoded envelope from the peer and emit the corresponding
/// event(s). Runs on the channel thread only.
fn handle_envelope(state: &Arc<Mutex<SharedState>>, sink: &mut Sink, env: Envelope) {
    match env.msg_type {
        MessageType::Open | MessageType::Query => {
            let tag = env.stream_id as u64;
            state.lock().unwrap().awaiting_open.insert(env.tkr.clone());
            sink.emit(Event::PubOpen { ticker: env.tkr, tag });
        }
        MessageType::Close => {
            state.lock().unwrap().streams.remove(&env.tkr);
            sink.emit(Event::PubClose { ticker: env.tkr });
        }
        MessageType::Control => {
            let n = env
                .fields
                .first()
                .and_then(|f| match f.value {
                    WireValue::I32(v) => Some(v as u32),
                    WireValue::I64(v) => Some(v as u32),
                    _ => None,
                })
                .unwrap_or(0);
            sink.emit(Event::SymListQuery { n });
        }
        MessageType::PermQuery => {
            let tag = env.stream_id as u64;
            sink.emit(Event::RefreshImage { ticker: env.tkr, tag });
        }
        _ => debug!(?env.msg_type, "unhandled message type in publish channel"),
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
        let mut socket = match Socket::new(&hosts, 4 * 1024 * 1024, 16 * 1024 * 1024, "rt-pub") {
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
        info!("rt-pub session connected");

        let open_env = Envelope::new(MessageType::Open, "", "", 0)
            .with_fields(vec![Field::new(0, WireValue::Str(user.clone().into_bytes()))]);
        if let Ok(bytes) = codec.encode(&open_env) {
            let _ = socket.enqueue(&bytes);
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
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(5)), if state.lock().unwrap().has_pending() => {
                    let drained: Vec<Vec<u8>> = {
                        let mut st = state.lock().unwrap();
                        st.pending_out.drain(..).collect()
                    };
                    for bytes in drained {
                        match socket.enqueue(&bytes) {
                            Ok(Some(WatermarkEvent::Hi)) => sink.emit(Event::Overflow),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "failed to enqueue publish payload"),
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
    use crate::builder::UpdateBuilder;

    #[test]
    fn publish_before_start_is_rejected() {
        let chan = PublishChannel::with_pump(16);
        let result = chan.publish(UpdateBuilder::init("IBM", 1, true));
        assert!(matches!(result, Err(PubError::NotStarted)));
    }

    #[test]
    fn set_unpacked_flips_packed_flag() {
        let chan = PublishChannel::with_pump(16);
        assert!(chan.state.lock().unwrap().packed);
        chan.set_unpacked(true);
        assert!(!chan.state.lock().unwrap().packed);
    }

    #[test]
    fn handle_envelope_open_then_close_emits_pub_open_and_pub_close() {
        let state = Arc::new(Mutex::new(SharedState::new()));
        let pump = Arc::new(crate::pump::EventPump::new(16));
        let mut sink = Sink::Pump(pump.clone());

        let open_env = Envelope::new(MessageType::Open, "", "IBM", 7);
        handle_envelope(&state, &mut sink, open_env);
        assert!(state.lock().unwrap().awaiting_open.contains("IBM"));

        let close_env = Envelope::new(MessageType::Close, "", "IBM", 7);
        handle_envelope(&state, &mut sink, close_env);

        let first = pump.wait(Duration::from_millis(1)).unwrap();
        assert!(matches!(first, Event::PubOpen { tag: 7, .. }));
        let second = pump.wait(Duration::from_millis(1)).unwrap();
        assert!(matches!(second, Event::PubClose { .. }));
    }

    #[test]
    fn republish_relayed_refuses_past_hop_limit() {
        let chan = PublishChannel::with_pump(16);
        {
            let mut st = chan.state.lock().unwrap();
            let stream = st.streams.entry("IBM".into()).or_insert_with(StreamState::new);
            stream.hop_count = crate::stream_state::MAX_HOPS;
        }
        // republish_relayed requires a started channel only for `publish`'s
        // NotStarted check after the hop check passes/fails; here the hop
        // check itself fails first so Start() is never reached.
        let result = chan.republish_relayed(UpdateBuilder::init("IBM", 1, true));
        assert!(matches!(result, Err(PubError::HopLimitExceeded(_))));
    }
}
