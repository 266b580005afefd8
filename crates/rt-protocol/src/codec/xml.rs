//! XML encoding (§6.1): a single top-level `<MSG>` element with `<FLD>`
//! children, one message per element, no nesting beyond that. Hand-rolled
//! rather than pulled from a general-purpose XML crate — the grammar is
//! deliberately this constrained, the same call the original wire-protocol
//! library made for its own admin/XML channel.
//!
//! ```xml
//! <MSG type="UPDATE" svc="SVC" tkr="TICK" tag="42"><FLD fid="1">100.25</FLD></MSG>
//! ```

use crate::codec::{CodecError, DecodeOutcome, WireCodec};
use crate::envelope::{Envelope, MessageType};
use crate::field::{Field, WireValue};

#[derive(Default)]
pub struct XmlCodec;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

impl WireCodec for XmlCodec {
    fn encode(&self, env: &Envelope) -> Result<Vec<u8>, CodecError> {
        let mut out = String::new();
        out.push_str(&format!(
            "<MSG type=\"{}\" svc=\"{}\" tkr=\"{}\" tag=\"{}\">",
            env.msg_type.to_tag(),
            escape(&env.svc),
            escape(&env.tkr),
            env.stream_id
        ));
        for field in &env.fields {
            out.push_str(&format!(
                "<FLD fid=\"{}\">{}</FLD>",
                field.id,
                escape(&field.value.to_text())
            ));
        }
        out.push_str("</MSG>");
        Ok(out.into_bytes())
    }

    fn decode(&self, buf: &[u8]) -> Result<DecodeOutcome, CodecError> {
        let text = std::str::from_utf8(buf).map_err(|_| CodecError::MalformedEnvelope("xml not utf8".into()))?;
        let Some(msg_end) = find_closing(text, "MSG") else {
            return Ok(DecodeOutcome::Incomplete);
        };
        let consumed = msg_end;
        let msg_slice = &text[..msg_end];

        let open_end = msg_slice
            .find('>')
            .ok_or_else(|| CodecError::MalformedEnvelope("unterminated <MSG> open tag".into()))?;
        let open_tag = &msg_slice[..open_end];
        let attrs = parse_attrs(open_tag)?;

        let msg_type_str = attrs
            .get("type")
            .ok_or_else(|| CodecError::MalformedEnvelope("<MSG> missing type attribute".into()))?;
        let msg_type = MessageType::from_tag(msg_type_str)
            .ok_or_else(|| CodecError::MalformedEnvelope(format!("unknown message type {msg_type_str:?}")))?;
        let svc = attrs.get("svc").cloned().unwrap_or_default();
        let tkr = attrs.get("tkr").cloned().unwrap_or_default();
        let stream_id: u32 = attrs
            .get("tag")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CodecError::MalformedEnvelope("<MSG> missing/invalid tag attribute".into()))?;

        let body = &msg_slice[open_end + 1..];
        let mut fields = Vec::new();
        let mut rest = body;
        while let Some(fld_start) = rest.find("<FLD") {
            let after_start = &rest[fld_start..];
            let tag_end = after_start
                .find('>')
                .ok_or_else(|| CodecError::MalformedEnvelope("unterminated <FLD> tag".into()))?;
            let open_tag = &after_start[..tag_end];
            let fld_attrs = parse_attrs(open_tag)?;
            let fid: u16 = fld_attrs
                .get("fid")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| CodecError::MalformedEnvelope("<FLD> missing/invalid fid".into()))?;
            let content_start = tag_end + 1;
            let close_rel = after_start[content_start..]
                .find("</FLD>")
                .ok_or_else(|| CodecError::MalformedEnvelope("unterminated <FLD> close tag".into()))?;
            let value_text = unescape(&after_start[content_start..content_start + close_rel]);
            fields.push(Field::new(fid, WireValue::Str(value_text.into_bytes())));
            rest = &after_start[content_start + close_rel + "</FLD>".len()..];
        }

        let env = Envelope::new(msg_type, svc, tkr, stream_id).with_fields(fields);
        Ok(DecodeOutcome::Message { envelope: env, consumed })
    }
}

/// Find the end (exclusive) of the first `<tag ...>...</tag>` element,
/// returning the byte offset just past `</tag>`, or `None` if the closing
/// tag hasn't arrived yet (partial message, per §4.5 retained-in-buffer
/// semantics).
fn find_closing(text: &str, tag: &str) -> Option<usize> {
    let close = format!("</{tag}>");
    text.find(&close).map(|pos| pos + close.len())
}

fn parse_attrs(open_tag: &str) -> Result<std::collections::HashMap<String, String>, CodecError> {
    let mut attrs = std::collections::HashMap::new();
    // skip the element name token
    let after_name = open_tag
        .find(char::is_whitespace)
        .map(|i| &open_tag[i..])
        .unwrap_or("");
    let mut rest = after_name.trim_start();
    while let Some(eq_pos) = rest.find('=') {
        let name = rest[..eq_pos].trim();
        if name.is_empty() {
            break;
        }
        let after_eq = rest[eq_pos + 1..].trim_start();
        if !after_eq.starts_with('"') {
            return Err(CodecError::MalformedEnvelope("attribute value missing quote".into()));
        }
        let value_start = 1;
        let Some(end_quote) = after_eq[value_start..].find('"') else {
            return Err(CodecError::MalformedEnvelope("unterminated attribute value".into()));
        };
        let value = unescape(&after_eq[value_start..value_start + end_quote]);
        attrs.insert(name.to_owned(), value);
        rest = after_eq[value_start + end_quote + 1..].trim_start();
    }
    Ok(attrs)
}
