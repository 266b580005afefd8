//! End-to-end: a filtered `LvcReader::view_all` over an on-disk last-value
//! cache file returns only the services/fields a `Filter` allows.

use std::collections::HashSet;

use rtedge::lvc::LvcReader;
use rtedge::model::WireValue;
use rt_lvc::fixture::{FixtureRecord, write_lvc_file};

fn schema() -> &'static str {
    "BID 1 PRICE 12|ASK 2 PRICE 12|SYM 3 ALPHANUMERIC 8|VOL 4 INTEGER 4"
}

fn records() -> Vec<FixtureRecord> {
    let mut out = Vec::new();
    for (svc, tkr, bid) in [("BB", "IBM", 100.0), ("BB", "MSFT", 200.0), ("RIC", "IBM.N", 101.0)] {
        out.push(FixtureRecord {
            service: svc.into(),
            ticker: tkr.into(),
            fields: vec![
                (1, WireValue::F64(bid)),
                (2, WireValue::F64(bid + 0.5)),
                (3, WireValue::Str(tkr.as_bytes().to_vec())),
                (4, WireValue::I32(1000)),
            ],
            update_count: 1,
            last_msg_time: 1_700_000_000,
        });
    }
    out
}

#[test]
fn filter_restricts_service_and_field_axes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotes.lvc");
    write_lvc_file(&path, schema(), &records());

    let mut reader = LvcReader::open(&path).unwrap();
    assert_eq!(reader.get_schema().len(), 4);

    let services: HashSet<String> = ["BB".to_string()].into_iter().collect();
    let fields: HashSet<String> = ["BID".to_string()].into_iter().collect();
    reader.set_filter(Some(fields), Some(services));

    let views = reader.view_all().unwrap();
    assert_eq!(views.len(), 2, "only the two BB records pass the service filter");
    for view in &views {
        assert_eq!(view.service, "BB");
        assert_eq!(view.fields.len(), 1, "only BID should survive the field filter");
        assert_eq!(view.fields[0].id, 1);
    }

    let ibm = reader.view("BB", "IBM").unwrap().expect("BB.IBM present");
    assert!(matches!(ibm.fields[0].value, WireValue::F64(v) if (v - 100.0).abs() < 1e-9));

    assert!(reader.view("RIC", "IBM.N").unwrap().is_none(), "service filter excludes RIC");
}

#[test]
fn stats_reports_record_and_schema_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotes.lvc");
    write_lvc_file(&path, schema(), &records());

    let reader = LvcReader::open(&path).unwrap();
    let stats = reader.stats().unwrap();
    assert_eq!(stats.record_count, 3);
    assert_eq!(stats.schema_field_count, 4);
}
