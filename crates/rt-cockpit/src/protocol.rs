//! The admin wire grammar (§4.13): tagged, self-closing XML elements —
//! distinct from the data channel's `<MSG>/<FLD>` envelope (§6.1) since the
//! source's admin channel never carries a field list, only an identity.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum CockpitCodecError {
    #[error("malformed cockpit element: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Add,
    Del,
    Refresh,
    Bds,
}

impl RequestKind {
    fn tag(self) -> &'static str {
        match self {
            RequestKind::Add => "ADD",
            RequestKind::Del => "DEL",
            RequestKind::Refresh => "REFRESH",
            RequestKind::Bds => "BDS",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "ADD" => RequestKind::Add,
            "DEL" => RequestKind::Del,
            "REFRESH" => RequestKind::Refresh,
            "BDS" => RequestKind::Bds,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CockpitRequest {
    pub kind: RequestKind,
    pub service: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CockpitResponse {
    pub ack: bool,
    pub service: String,
    pub name: String,
    pub reason: Option<String>,
}

pub enum DecodeOutcome<T> {
    Message { value: T, consumed: usize },
    Incomplete,
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"").replace("&amp;", "&")
}

pub fn encode_request(req: &CockpitRequest) -> Vec<u8> {
    format!(
        "<{} Service=\"{}\" Name=\"{}\"/>",
        req.kind.tag(),
        escape(&req.service),
        escape(&req.name)
    )
    .into_bytes()
}

pub fn encode_response(resp: &CockpitResponse) -> Vec<u8> {
    let tag = if resp.ack { "ACK" } else { "NAK" };
    let reason = resp
        .reason
        .as_ref()
        .map(|r| format!(" Reason=\"{}\"", escape(r)))
        .unwrap_or_default();
    format!(
        "<{} Service=\"{}\" Name=\"{}\"{}/>",
        tag,
        escape(&resp.service),
        escape(&resp.name),
        reason
    )
    .into_bytes()
}

/// Parses the first complete self-closing `<TAG attr="v" .../>` element at
/// the front of `buf`. Returns `Incomplete` if `/>` hasn't arrived yet,
/// mirroring the data channel's "retained in the inbound buffer" rule.
fn parse_element(buf: &[u8]) -> Result<DecodeOutcome<(String, HashMap<String, String>)>, CockpitCodecError> {
    let text = std::str::from_utf8(buf).map_err(|_| CockpitCodecError::Malformed("not utf8".into()))?;
    let Some(end) = text.find("/>") else {
        return Ok(DecodeOutcome::Incomplete);
    };
    let consumed = end + 2;
    let element = &text[..end];
    let Some(start) = element.find('<') else {
        return Err(CockpitCodecError::Malformed("missing '<'".into()));
    };
    let inner = element[start + 1..].trim();
    let tag_end = inner.find(char::is_whitespace).unwrap_or(inner.len());
    let tag = inner[..tag_end].to_owned();
    let attrs = parse_attrs(&inner[tag_end..])?;
    Ok(DecodeOutcome::Message { value: (tag, attrs), consumed })
}

fn parse_attrs(rest: &str) -> Result<HashMap<String, String>, CockpitCodecError> {
    let mut attrs = HashMap::new();
    let mut rest = rest.trim_start();
    while let Some(eq_pos) = rest.find('=') {
        let name = rest[..eq_pos].trim();
        if name.is_empty() {
            break;
        }
        let after_eq = rest[eq_pos + 1..].trim_start();
        if !after_eq.starts_with('"') {
            return Err(CockpitCodecError::Malformed("attribute value missing quote".into()));
        }
        let Some(end_quote) = after_eq[1..].find('"') else {
            return Err(CockpitCodecError::Malformed("unterminated attribute value".into()));
        };
        attrs.insert(name.to_owned(), unescape(&after_eq[1..1 + end_quote]));
        rest = after_eq[1 + end_quote + 1..].trim_start();
    }
    Ok(attrs)
}

pub fn decode_request(buf: &[u8]) -> Result<DecodeOutcome<CockpitRequest>, CockpitCodecError> {
    match parse_element(buf)? {
        DecodeOutcome::Incomplete => Ok(DecodeOutcome::Incomplete),
        DecodeOutcome::Message { value: (tag, attrs), consumed } => {
            let kind = RequestKind::from_tag(&tag)
                .ok_or_else(|| CockpitCodecError::Malformed(format!("unknown request tag {tag:?}")))?;
            let service = attrs.get("Service").cloned().unwrap_or_default();
            let name = attrs.get("Name").cloned().unwrap_or_default();
            Ok(DecodeOutcome::Message { value: CockpitRequest { kind, service, name }, consumed })
        }
    }
}

pub fn decode_response(buf: &[u8]) -> Result<DecodeOutcome<CockpitResponse>, CockpitCodecError> {
    match parse_element(buf)? {
        DecodeOutcome::Incomplete => Ok(DecodeOutcome::Incomplete),
        DecodeOutcome::Message { value: (tag, attrs), consumed } => {
            let ack = match tag.as_str() {
                "ACK" => true,
                "NAK" => false,
                _ => return Err(CockpitCodecError::Malformed(format!("unknown response tag {tag:?}"))),
            };
            let service = attrs.get("Service").cloned().unwrap_or_default();
            let name = attrs.get("Name").cloned().unwrap_or_default();
            let reason = attrs.get("Reason").cloned();
            Ok(DecodeOutcome::Message { value: CockpitResponse { ack, service, name, reason }, consumed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_for_every_kind() {
        for kind in [RequestKind::Add, RequestKind::Del, RequestKind::Refresh, RequestKind::Bds] {
            let req = CockpitRequest { kind, service: "BB".into(), name: "IBM".into() };
            let bytes = encode_request(&req);
            match decode_request(&bytes).unwrap() {
                DecodeOutcome::Message { value, consumed } => {
                    assert_eq!(consumed, bytes.len());
                    assert_eq!(value, req);
                }
                DecodeOutcome::Incomplete => panic!("expected complete"),
            }
        }
    }

    #[test]
    fn ack_and_nak_roundtrip() {
        let ack = CockpitResponse { ack: true, service: "BB".into(), name: "IBM".into(), reason: None };
        let bytes = encode_response(&ack);
        match decode_response(&bytes).unwrap() {
            DecodeOutcome::Message { value, .. } => assert_eq!(value, ack),
            DecodeOutcome::Incomplete => panic!("expected complete"),
        }

        let nak = CockpitResponse { ack: false, service: "BB".into(), name: "IBM".into(), reason: Some("no such ticker".into()) };
        let bytes = encode_response(&nak);
        match decode_response(&bytes).unwrap() {
            DecodeOutcome::Message { value, .. } => assert_eq!(value, nak),
            DecodeOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn incomplete_without_self_closing_marker() {
        let partial = br#"<ADD Service="BB" Name="IB"#.to_vec();
        assert!(matches!(decode_request(&partial).unwrap(), DecodeOutcome::Incomplete));
    }

    #[test]
    fn escapes_special_characters_in_identity() {
        let req = CockpitRequest { kind: RequestKind::Add, service: "S&P".into(), name: "A<B>".into() };
        let bytes = encode_request(&req);
        match decode_request(&bytes).unwrap() {
            DecodeOutcome::Message { value, .. } => assert_eq!(value, req),
            DecodeOutcome::Incomplete => panic!("expected complete"),
        }
    }
}
