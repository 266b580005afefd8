//! The cockpit admin channel (§4.13): a parallel, request/response-only
//! connection for ADD/DEL/REFRESH/BDS administrative traffic, separate
//! from the data channel's subscribe/publish streams.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rt_loop::{ChannelThread, LoopContext, WorkItem};
use rt_socket::Socket;
use tracing::{debug, info, warn};

use crate::protocol::{
    CockpitRequest, CockpitResponse, DecodeOutcome, RequestKind, decode_response, encode_request,
};

#[derive(Debug, thiserror::Error)]
pub enum CockpitError {
    #[error("socket error: {0}")]
    Socket(#[from] rt_socket::SocketError),
    #[error("channel already started")]
    AlreadyStarted,
    #[error("channel not started")]
    NotStarted,
    #[error("no response received within the timeout")]
    Timeout,
}

struct SharedState {
    pending_out: VecDeque<Vec<u8>>,
    responses: HashMap<(String, String), CockpitResponse>,
}

impl SharedState {
    fn new() -> Self {
        Self { pending_out: VecDeque::new(), responses: HashMap::new() }
    }

    fn has_pending(&self) -> bool {
        !self.pending_out.is_empty()
    }
}

/// Request/response client over a dedicated channel thread (§4.13). Every
/// `add`/`del`/`refresh`/`bds` call blocks the calling application thread,
/// up to a timeout, for the peer's echoed ACK/NAK — there is no push mode
/// here, unlike the subscribe/publish channels.
pub struct CockpitChannel {
    state: Arc<Mutex<SharedState>>,
    condvar: Arc<Condvar>,
    thread: Option<ChannelThread>,
}

impl CockpitChannel {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(SharedState::new())), condvar: Arc::new(Condvar::new()), thread: None }
    }

    pub fn start(&mut self, hosts: impl Into<String>) -> Result<(), CockpitError> {
        if self.thread.is_some() {
            return Err(CockpitError::AlreadyStarted);
        }
        let hosts = hosts.into();
        let state = self.state.clone();
        let condvar = self.condvar.clone();
        self.thread = Some(ChannelThread::spawn("rt-cockpit", move |ctx| run_session(ctx, hosts, state, condvar)));
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut t) = self.thread.take() {
            t.stop();
            t.join();
        }
    }

    fn request(&self, req: CockpitRequest, timeout: Duration) -> Result<CockpitResponse, CockpitError> {
        if self.thread.is_none() {
            return Err(CockpitError::NotStarted);
        }
        let key = (req.service.clone(), req.name.clone());
        {
            let mut st = self.state.lock().unwrap();
            st.responses.remove(&key);
            st.pending_out.push_back(encode_request(&req));
        }
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();
        loop {
            if let Some(resp) = st.responses.remove(&key) {
                return Ok(resp);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CockpitError::Timeout);
            }
            let (guard, timeout_result) = self.condvar.wait_timeout(st, remaining).unwrap();
            st = guard;
            if timeout_result.timed_out() && !st.responses.contains_key(&key) {
                return Err(CockpitError::Timeout);
            }
        }
    }

    pub fn add(&self, service: &str, name: &str, timeout: Duration) -> Result<CockpitResponse, CockpitError> {
        self.request(CockpitRequest { kind: RequestKind::Add, service: service.to_owned(), name: name.to_owned() }, timeout)
    }

    pub fn del(&self, service: &str, name: &str, timeout: Duration) -> Result<CockpitResponse, CockpitError> {
        self.request(CockpitRequest { kind: RequestKind::Del, service: service.to_owned(), name: name.to_owned() }, timeout)
    }

    pub fn refresh(&self, service: &str, name: &str, timeout: Duration) -> Result<CockpitResponse, CockpitError> {
        self.request(CockpitRequest { kind: RequestKind::Refresh, service: service.to_owned(), name: name.to_owned() }, timeout)
    }

    pub fn bds(&self, service: &str, name: &str, timeout: Duration) -> Result<CockpitResponse, CockpitError> {
        self.request(CockpitRequest { kind: RequestKind::Bds, service: service.to_owned(), name: name.to_owned() }, timeout)
    }
}

impl Default for CockpitChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CockpitChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 16 * 1024;

async fn run_session(mut ctx: LoopContext, hosts: String, state: Arc<Mutex<SharedState>>, condvar: Arc<Condvar>) {
    loop {
        if ctx.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut socket = match Socket::new(&hosts, 1024 * 1024, 256 * 1024, "rt-cockpit") {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "rt-cockpit could not construct socket");
                return;
            }
        };
        if socket.connect().await.is_err() {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        }
        info!("rt-cockpit session connected");

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
                        Ok(0) => break,
                        Ok(_) => drain_responses(&mut socket, &state, &condvar),
                        Err(e) => {
                            warn!(error = %e, "rt-cockpit read error, treating as disconnect");
                            break;
                        }
                    }
                }
                _ = socket.write_some(READ_CHUNK), if socket.outbound.filled() > 0 => {}
                _ = tokio::time::sleep(Duration::from_millis(5)), if state.lock().unwrap().has_pending() => {
                    let bytes: Vec<Vec<u8>> = {
                        let mut st = state.lock().unwrap();
                        st.pending_out.drain(..).collect()
                    };
                    for b in bytes {
                        let _ = socket.enqueue(&b);
                    }
                }
            }
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

fn drain_responses(socket: &mut Socket, state: &Arc<Mutex<SharedState>>, condvar: &Arc<Condvar>) {
    loop {
        let snapshot = socket.inbound.bytes().to_vec();
        if snapshot.is_empty() {
            break;
        }
        match decode_response(&snapshot) {
            Ok(DecodeOutcome::Message { value, consumed }) => {
                let _ = socket.inbound.consume(0, consumed);
                let mut st = state.lock().unwrap();
                st.responses.insert((value.service.clone(), value.name.clone()), value);
                drop(st);
                condvar.notify_all();
            }
            Ok(DecodeOutcome::Incomplete) => break,
            Err(e) => {
                debug!(error = %e, "malformed cockpit response, dropping buffered bytes");
                let _ = socket.inbound.consume(0, snapshot.len());
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_before_start_is_rejected() {
        let chan = CockpitChannel::new();
        let result = chan.add("BB", "IBM", Duration::from_millis(10));
        assert!(matches!(result, Err(CockpitError::NotStarted)));
    }

    #[test]
    fn unmatched_request_times_out() {
        // Nothing ever answers this request — request() must still return
        // promptly once the timeout elapses, not hang forever.
        let state = Arc::new(Mutex::new(SharedState::new()));
        let condvar = Arc::new(Condvar::new());
        let chan = CockpitChannel { state, condvar, thread: Some(fake_thread()) };
        let start = Instant::now();
        let result = chan.add("BB", "IBM", Duration::from_millis(20));
        assert!(matches!(result, Err(CockpitError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn response_delivered_to_waiting_request_unblocks_it() {
        let state = Arc::new(Mutex::new(SharedState::new()));
        let condvar = Arc::new(Condvar::new());
        state.lock().unwrap().responses.insert(
            ("BB".into(), "IBM".into()),
            CockpitResponse { ack: true, service: "BB".into(), name: "IBM".into(), reason: None },
        );
        let chan = CockpitChannel { state, condvar, thread: Some(fake_thread()) };
        let resp = chan.add("BB", "IBM", Duration::from_millis(50)).unwrap();
        assert!(resp.ack);
    }

    fn fake_thread() -> ChannelThread {
        ChannelThread::spawn("rt-cockpit-test", |mut ctx| async move {
            let _ = ctx.work_rx.recv().await;
        })
    }
}
