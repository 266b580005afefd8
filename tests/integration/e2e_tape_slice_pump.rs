//! End-to-end: pumping a time-sliced window of a tape file, and replaying
//! one ticker's chain end to end, against a fixture written on disk.

use rtedge::model::{Envelope, Field, MessageType, WireValue};
use rtedge::tape::TapeReader;
use rt_tape::fixture::{FixtureMessage, write_tape_file};

fn msg(service: &str, ticker: &str, ts: i64, price: f64) -> FixtureMessage {
    FixtureMessage {
        service: service.into(),
        ticker: ticker.into(),
        timestamp_ns: ts,
        envelope: Envelope::new(MessageType::Update, service, ticker, 1)
            .with_fields(vec![Field::new(22, WireValue::F64(price))]),
    }
}

#[test]
fn slice_pump_delivers_only_the_requested_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotes.tape");
    let messages = vec![
        msg("BB", "IBM", 1_000_000_000, 100.0),
        msg("BB", "IBM", 2_000_000_000, 100.5),
        msg("BB", "IBM", 3_000_000_000, 101.0),
        msg("BB", "MSFT", 2_500_000_000, 200.0),
    ];
    write_tape_file(&path, &messages);

    let mut reader = TapeReader::open(&path).unwrap();
    let mut delivered = Vec::new();
    let n = reader.pump_tape_slice(1_500_000_000, 2_800_000_000, |m| delivered.push(m.timestamp_ns)).unwrap();

    assert_eq!(n, 2, "the 2s and 2.5s messages fall inside [1.5s, 2.8s]");
    assert!(delivered.contains(&2_000_000_000));
    assert!(delivered.contains(&2_500_000_000));
    assert!(!delivered.contains(&1_000_000_000));
    assert!(!delivered.contains(&3_000_000_000));
}

#[test]
fn pump_ticker_replays_one_records_chain_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotes.tape");
    let messages = vec![
        msg("BB", "IBM", 1_000_000_000, 100.0),
        msg("BB", "MSFT", 1_500_000_000, 200.0),
        msg("BB", "IBM", 2_000_000_000, 100.5),
        msg("BB", "IBM", 3_000_000_000, 101.0),
    ];
    write_tape_file(&path, &messages);

    let mut reader = TapeReader::open(&path).unwrap();
    let mut prices = Vec::new();
    let n = reader
        .pump_ticker("BB", "IBM", |m| {
            if let WireValue::F64(v) = m.envelope.fields[0].value {
                prices.push(v);
            }
        })
        .unwrap();

    assert_eq!(n, 3);
    assert_eq!(prices, vec![100.0, 100.5, 101.0], "BB.IBM's own chain in timestamp order, MSFT excluded");
}
