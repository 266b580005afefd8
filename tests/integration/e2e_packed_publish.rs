//! End-to-end: a `PublishChannel` in packed mode only sends the fields that
//! changed since the stream's last snapshot, captured off the real wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mock_peer::{MockPeer, Role};
use rtedge::model::{MessageType, Protocol, WireValue};
use rtedge::pub_::{PublishChannel, UpdateBuilder};

fn wait_for(captured: &Arc<Mutex<Vec<rtedge::model::Envelope>>>, n: usize) -> Vec<rtedge::model::Envelope> {
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        {
            let guard = captured.lock().unwrap();
            if guard.len() >= n {
                return guard.clone();
            }
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for {n} captured envelope(s)");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[tokio::test]
async fn packed_mode_diffs_successive_publishes() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let peer = MockPeer::start(Protocol::Binary, Role::Capture { captured: captured.clone() }).await;

    let mut channel = PublishChannel::with_pump(16);
    channel.start(peer.endpoint(), "itest-pub").unwrap();

    let image = UpdateBuilder::init("IBM", 1, true)
        .add_field(22, WireValue::F64(100.0))
        .add_field(25, WireValue::F64(100.5));
    channel.publish(image).unwrap();

    let update = UpdateBuilder::init("IBM", 1, false)
        .add_field(22, WireValue::F64(100.0)) // unchanged: should be diffed away
        .add_field(25, WireValue::F64(101.0)); // changed: should survive
    channel.publish(update).unwrap();

    let envs = wait_for(&captured, 3); // Open, Image, (diffed) Update
    assert_eq!(envs[0].msg_type, MessageType::Open);
    assert_eq!(envs[1].msg_type, MessageType::Image);
    assert_eq!(envs[1].fields.len(), 2);
    assert_eq!(envs[2].msg_type, MessageType::Update);
    assert_eq!(envs[2].fields.len(), 1, "packed mode drops the unchanged BID field");
    assert_eq!(envs[2].fields[0].id, 25);

    channel.stop();
}
