//! A loopback peer that speaks the wire protocol over a real `TcpListener`,
//! generalized from the teacher's `rt-test-utils::mock_ws_server` (a scripted
//! WebSocket peer for forwarder/receiver tests) to this workspace's
//! binary/MF/XML wire codecs. Used only by integration tests and the
//! round-trip self-test mentioned in `SPEC_FULL.md`'s "Supplemented
//! features" — never by the library itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rt_protocol::{DecodeOutcome, Envelope, Field, MessageType, Protocol, WireCodec, WireValue, codec_for};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock peer does once a client connects and sends its `Open`.
pub enum Role {
    /// Plays the data-cache side of a `SubscriptionChannel` session: once a
    /// `Mount` (subscribe) arrives for a scripted `(service, ticker)`, sends
    /// the schema mount (once per connection) followed by that key's
    /// scripted envelopes in order. If `flap_after_first` is set, the
    /// *first* accepted connection closes right after replaying its scripts
    /// (simulating §4.8's "transient peer flap"); later connections play
    /// through without flapping, so a reconnecting `SubscriptionChannel`
    /// observes a normal resubscribe-and-replay.
    Subscribe {
        schema_blob: String,
        scripts: HashMap<(String, String), Vec<Envelope>>,
        flap_after_first: bool,
    },
    /// Plays the data-cache side of a `PublishChannel` session: sends
    /// nothing unsolicited, just decodes and records every envelope the
    /// publisher sends, for the test to assert against.
    Capture { captured: Arc<Mutex<Vec<Envelope>>> },
}

pub struct MockPeer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockPeer {
    pub async fn start(protocol: Protocol, role: Role) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock peer listener");
        let addr = listener.local_addr().expect("local_addr");
        let role = Arc::new(role);
        let connection_no = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else { break };
                let role = role.clone();
                let n = connection_no.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, protocol, role, n).await {
                        tracing::debug!(error = %e, "mock peer connection ended");
                    }
                });
            }
        });
        Self { addr, _task: task }
    }

    /// The `host:port` string a `SubscriptionChannel`/`PublishChannel`
    /// `start()` call can use directly as its endpoint (§6.1 syntax).
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.addr.ip(), self.addr.port())
    }
}

async fn read_one(stream: &mut TcpStream, codec: &dyn WireCodec, buf: &mut Vec<u8>) -> std::io::Result<Option<Envelope>> {
    loop {
        match codec.decode(buf) {
            Ok(DecodeOutcome::Message { envelope, consumed }) => {
                buf.drain(0..consumed);
                return Ok(Some(envelope));
            }
            Ok(DecodeOutcome::Incomplete) => {}
            Err(_) => return Ok(None),
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    protocol: Protocol,
    role: Arc<Role>,
    connection_no: usize,
) -> std::io::Result<()> {
    let codec = codec_for(protocol);
    let mut inbound = Vec::new();

    // First message on every session is `Open` (both channel kinds send it
    // unconditionally in `run_session`).
    let Some(open) = read_one(&mut stream, codec.as_ref(), &mut inbound).await? else { return Ok(()) };
    if open.msg_type != MessageType::Open {
        return Ok(());
    }

    match role.as_ref() {
        Role::Subscribe { schema_blob, scripts, flap_after_first } => {
            let mut schema_sent = false;
            loop {
                let Some(env) = read_one(&mut stream, codec.as_ref(), &mut inbound).await? else { return Ok(()) };
                if env.msg_type != MessageType::Mount {
                    continue;
                }
                let key = (env.svc.clone(), env.tkr.clone());
                let Some(script) = scripts.get(&key) else { continue };
                if !schema_sent {
                    let schema_env = Envelope::new(MessageType::Mount, "", "", 0)
                        .with_fields(vec![Field::new(0, WireValue::Str(schema_blob.clone().into_bytes()))]);
                    let bytes = codec.encode(&schema_env).expect("encode schema mount");
                    stream.write_all(&bytes).await?;
                    schema_sent = true;
                }
                for scripted in script {
                    let bytes = codec.encode(scripted).expect("encode scripted envelope");
                    stream.write_all(&bytes).await?;
                    // Give the client a chance to decode each message
                    // separately rather than coalescing the whole script
                    // into one TCP read.
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                if *flap_after_first && connection_no == 0 {
                    return Ok(());
                }
            }
        }
        Role::Capture { captured } => loop {
            let Some(env) = read_one(&mut stream, codec.as_ref(), &mut inbound).await? else { return Ok(()) };
            captured.lock().unwrap().push(env);
        },
    }
}

/// Round-trip self-test mode (§"Supplemented features": generalized from
/// `librtEdge/cpp/RoundTrip.cpp`): accepts a subscribe-style session, and as
/// soon as a Mount arrives, immediately re-publishes back (as an `Update`)
/// whatever fields a prior `Image` carried for that key — i.e. it echoes
/// its own last image as an update, proving a full subscribe -> cache ->
/// republish loop closes without a live exchange peer.
pub struct RoundTripPeer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl RoundTripPeer {
    pub async fn start(protocol: Protocol, schema_blob: String, image: Envelope) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind round-trip listener");
        let addr = listener.local_addr().expect("local_addr");
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else { break };
                let schema_blob = schema_blob.clone();
                let image = image.clone();
                tokio::spawn(async move {
                    let _ = run_round_trip(stream, protocol, schema_blob, image).await;
                });
            }
        });
        Self { addr, _task: task }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.addr.ip(), self.addr.port())
    }
}

async fn run_round_trip(mut stream: TcpStream, protocol: Protocol, schema_blob: String, image: Envelope) -> std::io::Result<()> {
    let codec = codec_for(protocol);
    let mut inbound = Vec::new();
    let Some(open) = read_one(&mut stream, codec.as_ref(), &mut inbound).await? else { return Ok(()) };
    if open.msg_type != MessageType::Open {
        return Ok(());
    }
    let Some(mount) = read_one(&mut stream, codec.as_ref(), &mut inbound).await? else { return Ok(()) };
    if mount.msg_type != MessageType::Mount {
        return Ok(());
    }
    let schema_env = Envelope::new(MessageType::Mount, "", "", 0)
        .with_fields(vec![Field::new(0, WireValue::Str(schema_blob.into_bytes()))]);
    stream.write_all(&codec.encode(&schema_env).unwrap()).await?;
    stream.write_all(&codec.encode(&image).unwrap()).await?;
    let update = Envelope::new(MessageType::Update, image.svc.clone(), image.tkr.clone(), image.stream_id)
        .with_fields(image.fields.clone());
    tokio::time::sleep(Duration::from_millis(5)).await;
    stream.write_all(&codec.encode(&update).unwrap()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_role_replays_schema_image_update() {
        let mut scripts = HashMap::new();
        scripts.insert(
            ("BB".to_string(), "IBM".to_string()),
            vec![
                Envelope::new(MessageType::Image, "BB", "IBM", 7)
                    .with_fields(vec![Field::new(22, WireValue::F64(100.25))]),
                Envelope::new(MessageType::Update, "BB", "IBM", 7)
                    .with_fields(vec![Field::new(22, WireValue::F64(100.30))]),
            ],
        );
        let peer = MockPeer::start(
            Protocol::Binary,
            Role::Subscribe { schema_blob: "BID 22 PRICE 12".into(), scripts, flap_after_first: false },
        )
        .await;

        let mut stream = TcpStream::connect(peer.addr).await.unwrap();
        let codec = codec_for(Protocol::Binary);
        let open = Envelope::new(MessageType::Open, "", "", 0).with_fields(vec![Field::new(0, WireValue::Str(b"u".to_vec()))]);
        stream.write_all(&codec.encode(&open).unwrap()).await.unwrap();
        let mount = Envelope::new(MessageType::Mount, "BB", "IBM", 0);
        stream.write_all(&codec.encode(&mount).unwrap()).await.unwrap();

        let mut buf = Vec::new();
        let schema = read_one(&mut stream, codec.as_ref(), &mut buf).await.unwrap().unwrap();
        assert_eq!(schema.msg_type, MessageType::Mount);
        let image = read_one(&mut stream, codec.as_ref(), &mut buf).await.unwrap().unwrap();
        assert_eq!(image.msg_type, MessageType::Image);
        let update = read_one(&mut stream, codec.as_ref(), &mut buf).await.unwrap().unwrap();
        assert_eq!(update.msg_type, MessageType::Update);
    }
}
