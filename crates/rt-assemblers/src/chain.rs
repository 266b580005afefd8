//! Chain consumer (§4.12): walks link 0 first, then follows `next_link`
//! until `final`, emitting each member as if it were a discrete ticker.

use rt_protocol::{Field, WireValue};

use crate::event::AssemblerEvent;

/// Field ids agreed with the publish side's chain-link wire format
/// (`rt_pub::builder`, §4.9): member tickers start at
/// [`CHAIN_MEMBER_FID_BASE`], the final-link flag lives at
/// [`CHAIN_FINAL_FID`].
pub const CHAIN_MEMBER_FID_BASE: u16 = 100;
pub const CHAIN_FINAL_FID: u16 = 99;

/// The `<n>#<name>` ticker to subscribe to for link `n` of chain `name`.
pub fn chain_link_ticker(name: &str, link: u32) -> String {
    format!("{link}#{name}")
}

pub struct ChainAssembler {
    name: String,
    next_link: u32,
    done: bool,
}

impl ChainAssembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), next_link: 0, done: false }
    }

    /// The ticker to (re-)subscribe to in order to receive the next link,
    /// or `None` once the chain is fully walked.
    pub fn next_link_ticker(&self) -> Option<String> {
        if self.done {
            None
        } else {
            Some(chain_link_ticker(&self.name, self.next_link))
        }
    }

    /// Feed one chain-link message's fields. Emits one `ChainMember` per
    /// member ticker in field-id order, followed by `ChainDone` if this was
    /// the final link.
    pub fn feed(&mut self, fields: &[Field]) -> Vec<AssemblerEvent> {
        if self.done {
            return Vec::new();
        }
        let mut events = Vec::new();
        let mut members: Vec<(u16, &Field)> =
            fields.iter().filter(|f| f.id >= CHAIN_MEMBER_FID_BASE && f.id < CHAIN_FINAL_FID).map(|f| (f.id, f)).collect();
        members.sort_by_key(|(id, _)| *id);
        for (_, field) in members {
            if let WireValue::Str(bytes) = &field.value {
                events.push(AssemblerEvent::ChainMember(String::from_utf8_lossy(bytes).into_owned()));
            }
        }
        let is_final = fields
            .iter()
            .find(|f| f.id == CHAIN_FINAL_FID)
            .is_some_and(|f| matches!(f.value, WireValue::I8(v) if v != 0));
        self.next_link += 1;
        if is_final {
            self.done = true;
            events.push(AssemblerEvent::ChainDone);
        }
        events
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(members: &[&str], is_final: bool) -> Vec<Field> {
        let mut fields: Vec<Field> = members
            .iter()
            .enumerate()
            .map(|(i, m)| Field::new(CHAIN_MEMBER_FID_BASE + i as u16, WireValue::Str(m.as_bytes().to_vec())))
            .collect();
        fields.push(Field::new(CHAIN_FINAL_FID, WireValue::I8(is_final as i8)));
        fields
    }

    #[test]
    fn walks_two_links_then_emits_done_on_final() {
        let mut asm = ChainAssembler::new("SP500");
        assert_eq!(asm.next_link_ticker().as_deref(), Some("0#SP500"));

        let e1 = asm.feed(&link(&["AAPL", "MSFT"], false));
        assert_eq!(e1, vec![AssemblerEvent::ChainMember("AAPL".into()), AssemblerEvent::ChainMember("MSFT".into())]);
        assert_eq!(asm.next_link_ticker().as_deref(), Some("1#SP500"));

        let e2 = asm.feed(&link(&["GOOG"], true));
        assert_eq!(e2, vec![AssemblerEvent::ChainMember("GOOG".into()), AssemblerEvent::ChainDone]);
        assert!(asm.is_done());
        assert_eq!(asm.next_link_ticker(), None);
    }

    #[test]
    fn feed_after_done_is_a_no_op() {
        let mut asm = ChainAssembler::new("X");
        asm.feed(&link(&["A"], true));
        assert_eq!(asm.feed(&link(&["B"], true)), Vec::new());
    }
}
