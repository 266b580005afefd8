//! End-to-end: when the peer drops the connection after the first
//! replay (§4.8's "transient peer flap"), the channel marks outstanding
//! records stale, reconnects, resubscribes, and resumes normal delivery.

use std::collections::HashMap;
use std::time::Duration;

use mock_peer::{MockPeer, Role};
use rtedge::model::{Envelope, Field, MessageType, Protocol, WireValue};
use rtedge::sub::{Event, SubscriptionChannel};

#[tokio::test]
async fn flap_marks_stale_then_reconnect_resubscribe_recovers() {
    let mut scripts = HashMap::new();
    scripts.insert(
        ("BB".to_string(), "IBM".to_string()),
        vec![Envelope::new(MessageType::Image, "BB", "IBM", 7).with_fields(vec![Field::new(22, WireValue::F64(100.0))])],
    );
    let peer = MockPeer::start(
        Protocol::Binary,
        Role::Subscribe { schema_blob: "BID 22 PRICE 12".into(), scripts, flap_after_first: true },
    )
    .await;

    let mut channel = SubscriptionChannel::with_pump(32);
    channel.subscribe("BB", "IBM", 7).unwrap();
    channel.start(peer.endpoint(), "itest").unwrap();

    let mut saw_first_connect = false;
    let mut saw_first_image = false;
    let mut saw_stale_or_disconnect = false;
    let mut saw_second_connect = false;
    let mut saw_second_image = false;

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline && !saw_second_image {
        let Some(evt) = channel.read(Duration::from_millis(200)) else { continue };
        match evt {
            Event::Connect { up: true } if !saw_first_connect => saw_first_connect = true,
            Event::Connect { up: true } if saw_first_connect => saw_second_connect = true,
            Event::Connect { up: false } => saw_stale_or_disconnect = true,
            Event::Stale { .. } => saw_stale_or_disconnect = true,
            Event::Data { is_image: true, .. } if !saw_first_image => saw_first_image = true,
            Event::Data { is_image: true, .. } if saw_second_connect => saw_second_image = true,
            _ => {}
        }
    }

    assert!(saw_first_connect, "never observed the initial connect");
    assert!(saw_first_image, "never observed the first replayed image");
    assert!(saw_stale_or_disconnect, "flap should surface as a disconnect or a stale status");
    assert!(saw_second_connect, "channel never reconnected after the flap");
    assert!(saw_second_image, "resubscribe after reconnect never replayed the image again");

    channel.stop();
}
