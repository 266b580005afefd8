//! End-to-end: a `SubscriptionChannel` connects to a scripted peer, mounts
//! the schema, and sees an image followed by an update, in order.

use std::collections::HashMap;
use std::time::Duration;

use mock_peer::{MockPeer, Role};
use rtedge::model::{Envelope, Field, MessageType, Protocol, WireValue};
use rtedge::sub::{Event, SubscriptionChannel};

#[tokio::test]
async fn subscribe_sees_schema_then_image_then_update() {
    let mut scripts = HashMap::new();
    scripts.insert(
        ("BB".to_string(), "IBM".to_string()),
        vec![
            Envelope::new(MessageType::Image, "BB", "IBM", 7)
                .with_fields(vec![Field::new(22, WireValue::F64(100.25)), Field::new(25, WireValue::F64(100.75))]),
            Envelope::new(MessageType::Update, "BB", "IBM", 7)
                .with_fields(vec![Field::new(22, WireValue::F64(100.30))]),
        ],
    );
    let peer = MockPeer::start(
        Protocol::Binary,
        Role::Subscribe { schema_blob: "BID 22 PRICE 12|ASK 25 PRICE 12".into(), scripts, flap_after_first: false },
    )
    .await;

    let mut channel = SubscriptionChannel::with_pump(16);
    channel.subscribe("BB", "IBM", 42).unwrap();
    channel.start(peer.endpoint(), "itest").unwrap();

    let connect = channel.read(Duration::from_secs(2)).expect("connect event");
    assert!(matches!(connect, Event::Connect { up: true }));

    let schema = channel.read(Duration::from_secs(2)).expect("schema event");
    assert!(matches!(schema, Event::Schema { field_count: 2 }));

    let image = channel.read(Duration::from_secs(2)).expect("image event");
    match image {
        Event::Data { tag, service, ticker, is_image, fields } => {
            assert_eq!(tag, 42);
            assert_eq!(service, "BB");
            assert_eq!(ticker, "IBM");
            assert!(is_image);
            assert_eq!(fields.len(), 2);
        }
        other => panic!("expected image data event, got {other:?}"),
    }

    let update = channel.read(Duration::from_secs(2)).expect("update event");
    match update {
        Event::Data { is_image, fields, .. } => {
            assert!(!is_image);
            assert_eq!(fields.len(), 1);
            assert!(matches!(fields[0].value, WireValue::F64(v) if (v - 100.30).abs() < 1e-9));
        }
        other => panic!("expected update data event, got {other:?}"),
    }

    channel.stop();
}
