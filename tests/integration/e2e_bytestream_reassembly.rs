//! End-to-end: a `SubscriptionChannel` receives a byte-stream split across
//! three wire messages via push-mode callbacks (so every message's full
//! field list is delivered, bypassing conflation), and feeding each call's
//! fields into a `ByteStreamAssembler` reconstructs the original payload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mock_peer::{MockPeer, Role};
use rtedge::model::{Envelope, Field, MessageType, Protocol, WireValue};
use rtedge::sub::{Callbacks, SubscriptionChannel, Tag};

const OFFSET: u16 = 1;
const TOTAL_LEN: u16 = 2;
const NUM_FLD: u16 = 3;
const PAYLOAD_START: u16 = 9;

fn fragment(offset: i32, total_len: i32, chunk: &[u8]) -> Vec<Field> {
    vec![
        Field::new(OFFSET, WireValue::I32(offset)),
        Field::new(TOTAL_LEN, WireValue::I32(total_len)),
        Field::new(NUM_FLD, WireValue::I32(1)),
        Field::new(PAYLOAD_START, WireValue::ByteStreamRef(chunk.to_vec())),
    ]
}

#[derive(Default)]
struct Captured {
    messages: Mutex<Vec<Vec<Field>>>,
}

struct Collector(Arc<Captured>);

impl Callbacks for Collector {
    fn on_data(&mut self, _service: &str, _ticker: &str, _tag: Tag, _is_image: bool, fields: &[Field]) {
        self.0.messages.lock().unwrap().push(fields.to_vec());
    }
}

#[tokio::test]
async fn three_fragments_reassemble_into_the_original_payload() {
    let payload = b"hello byte-stream world, this is more than one chunk long!".to_vec();
    let chunks: Vec<&[u8]> = payload.chunks(8).collect();
    let total_len = payload.len() as i32;

    let mut scripted = Vec::new();
    let mut offset = 0i32;
    for chunk in &chunks {
        scripted.push(Envelope::new(MessageType::Update, "BB", "DOCS", 3).with_fields(fragment(offset, total_len, chunk)));
        offset += chunk.len() as i32;
    }

    let mut scripts = HashMap::new();
    scripts.insert(("BB".to_string(), "DOCS".to_string()), scripted);
    let peer = MockPeer::start(
        Protocol::Binary,
        Role::Subscribe { schema_blob: "BID 22 PRICE 12".into(), scripts, flap_after_first: false },
    )
    .await;

    let captured = Arc::new(Captured::default());
    let mut channel = SubscriptionChannel::with_callbacks(Collector(captured.clone()));
    channel.subscribe("BB", "DOCS", 9).unwrap();
    channel.start(peer.endpoint(), "itest").unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        if captured.messages.lock().unwrap().len() >= chunks.len() {
            break;
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for all {} fragments", chunks.len());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    channel.stop();

    let mut asm = rtedge::assemblers::ByteStreamAssembler::new(rtedge::assemblers::ByteStreamFids {
        offset: OFFSET,
        total_len: TOTAL_LEN,
        num_fld: NUM_FLD,
        payload_start: PAYLOAD_START,
    });
    let mut reassembled = Vec::new();
    let mut complete = false;
    for fields in captured.messages.lock().unwrap().iter() {
        for ev in asm.feed(fields) {
            match ev {
                rtedge::assemblers::AssemblerEvent::ByteStreamData(chunk) => reassembled.extend_from_slice(&chunk),
                rtedge::assemblers::AssemblerEvent::ByteStreamComplete(len) => {
                    assert_eq!(len, payload.len());
                    complete = true;
                }
                other => panic!("unexpected assembler event: {other:?}"),
            }
        }
    }

    assert!(complete, "byte-stream assembly never completed");
    assert_eq!(reassembled, payload);
}
