//! The message envelope shared by all three wire encodings (§4.5, §6.1).

use crate::field::Field;

/// Which of the three interchangeable wire encodings a session negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Binary,
    Mf,
    Xml,
}

/// The envelope message kind (§4.5 message catalogue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Image,
    Update,
    StatusDead,
    StatusStale,
    StatusRecovering,
    Mount,
    Ping,
    Control,
    Open,
    Close,
    Query,
    InsertAck,
    GlobalStatus,
    History,
    DbQuery,
    DbTable,
    StreamDone,
    PermQuery,
    Bds,
}

impl MessageType {
    /// The single-byte tag used on the binary wire.
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Image => 1,
            MessageType::Update => 2,
            MessageType::StatusDead => 3,
            MessageType::StatusStale => 4,
            MessageType::StatusRecovering => 5,
            MessageType::Mount => 6,
            MessageType::Ping => 7,
            MessageType::Control => 8,
            MessageType::Open => 9,
            MessageType::Close => 10,
            MessageType::Query => 11,
            MessageType::InsertAck => 12,
            MessageType::GlobalStatus => 13,
            MessageType::History => 14,
            MessageType::DbQuery => 15,
            MessageType::DbTable => 16,
            MessageType::StreamDone => 17,
            MessageType::PermQuery => 18,
            MessageType::Bds => 19,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => MessageType::Image,
            2 => MessageType::Update,
            3 => MessageType::StatusDead,
            4 => MessageType::StatusStale,
            5 => MessageType::StatusRecovering,
            6 => MessageType::Mount,
            7 => MessageType::Ping,
            8 => MessageType::Control,
            9 => MessageType::Open,
            10 => MessageType::Close,
            11 => MessageType::Query,
            12 => MessageType::InsertAck,
            13 => MessageType::GlobalStatus,
            14 => MessageType::History,
            15 => MessageType::DbQuery,
            16 => MessageType::DbTable,
            17 => MessageType::StreamDone,
            18 => MessageType::PermQuery,
            19 => MessageType::Bds,
            _ => return None,
        })
    }

    /// The MF/XML textual tag name for this message kind.
    pub fn to_tag(self) -> &'static str {
        match self {
            MessageType::Image => "IMAGE",
            MessageType::Update => "UPDATE",
            MessageType::StatusDead => "DEAD",
            MessageType::StatusStale => "STALE",
            MessageType::StatusRecovering => "RECOVERING",
            MessageType::Mount => "MOUNT",
            MessageType::Ping => "PING",
            MessageType::Control => "CONTROL",
            MessageType::Open => "OPEN",
            MessageType::Close => "CLOSE",
            MessageType::Query => "QUERY",
            MessageType::InsertAck => "INSERT_ACK",
            MessageType::GlobalStatus => "GLOBAL_STATUS",
            MessageType::History => "HISTORY",
            MessageType::DbQuery => "DB_QUERY",
            MessageType::DbTable => "DB_TABLE",
            MessageType::StreamDone => "STREAM_DONE",
            MessageType::PermQuery => "PERM_QUERY",
            MessageType::Bds => "BDS",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "IMAGE" => MessageType::Image,
            "UPDATE" => MessageType::Update,
            "DEAD" => MessageType::StatusDead,
            "STALE" => MessageType::StatusStale,
            "RECOVERING" => MessageType::StatusRecovering,
            "MOUNT" => MessageType::Mount,
            "PING" => MessageType::Ping,
            "CONTROL" => MessageType::Control,
            "OPEN" => MessageType::Open,
            "CLOSE" => MessageType::Close,
            "QUERY" => MessageType::Query,
            "INSERT_ACK" => MessageType::InsertAck,
            "GLOBAL_STATUS" => MessageType::GlobalStatus,
            "HISTORY" => MessageType::History,
            "DB_QUERY" => MessageType::DbQuery,
            "DB_TABLE" => MessageType::DbTable,
            "STREAM_DONE" => MessageType::StreamDone,
            "PERM_QUERY" => MessageType::PermQuery,
            "BDS" => MessageType::Bds,
            _ => return None,
        })
    }
}

/// One decoded (or to-be-encoded) message: envelope metadata plus its field
/// list. `stream_id` carries the per-subscription tag a peer echoes back on
/// every message belonging to that stream (§4.2); `svc`/`tkr` address the
/// record by service and ticker name.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub svc: String,
    pub tkr: String,
    pub stream_id: u32,
    pub fields: Vec<Field>,
}

impl Envelope {
    pub fn new(msg_type: MessageType, svc: impl Into<String>, tkr: impl Into<String>, stream_id: u32) -> Self {
        Self {
            msg_type,
            svc: svc.into(),
            tkr: tkr.into(),
            stream_id,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_byte_roundtrip_covers_all_variants() {
        let all = [
            MessageType::Image,
            MessageType::Update,
            MessageType::StatusDead,
            MessageType::StatusStale,
            MessageType::StatusRecovering,
            MessageType::Mount,
            MessageType::Ping,
            MessageType::Control,
            MessageType::Open,
            MessageType::Close,
            MessageType::Query,
            MessageType::InsertAck,
            MessageType::GlobalStatus,
            MessageType::History,
            MessageType::DbQuery,
            MessageType::DbTable,
            MessageType::StreamDone,
            MessageType::PermQuery,
            MessageType::Bds,
        ];
        for mt in all {
            assert_eq!(MessageType::from_byte(mt.to_byte()), Some(mt));
            assert_eq!(MessageType::from_tag(mt.to_tag()), Some(mt));
        }
    }

    #[test]
    fn unknown_byte_and_tag_are_rejected() {
        assert!(MessageType::from_byte(0).is_none());
        assert!(MessageType::from_tag("NOT_A_TAG").is_none());
    }
}
