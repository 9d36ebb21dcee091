//! Wire messages
//!
//! Protobuf messages exchanged between peers and persisted in the store.
//! Field tags are part of the wire format and MUST NOT change.

#![allow(missing_docs)]

/// Possibly-relative muid; zero timestamp/medallion mean "same as context".
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct MuidBuilder {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(int64, tag = "2")]
    pub medallion: i64,
    #[prost(int32, tag = "3")]
    pub offset: i32,
}

/// User key (int, string, or bytes).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyBuilder {
    #[prost(oneof = "key_builder::Key", tags = "1, 2, 3")]
    pub key: Option<key_builder::Key>,
}

/// Nested types for [`KeyBuilder`].
pub mod key_builder {
    /// Key payload
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Key {
        #[prost(string, tag = "1")]
        Characters(String),
        #[prost(sint64, tag = "2")]
        Number(i64),
        #[prost(bytes = "vec", tag = "3")]
        Octets(Vec<u8>),
    }
}

/// User value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueBuilder {
    #[prost(oneof = "value_builder::Value", tags = "1, 2, 3, 4, 6, 7, 8, 9")]
    pub value: Option<value_builder::Value>,
}

/// Nested types for [`ValueBuilder`].
pub mod value_builder {
    /// Value payload
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        Characters(String),
        #[prost(bytes = "vec", tag = "2")]
        Octets(Vec<u8>),
        #[prost(double, tag = "3")]
        Doubled(f64),
        #[prost(sint64, tag = "4")]
        Integer(i64),
        #[prost(int32, tag = "6")]
        Special(i32),
        #[prost(message, tag = "7")]
        Tuple(super::TupleBuilder),
        #[prost(message, tag = "8")]
        Document(super::DocumentBuilder),
        #[prost(sint64, tag = "9")]
        Timestamp(i64),
    }

    /// Codes carried by [`Value::Special`].
    pub mod special {
        pub const MISSING: i32 = 0;
        pub const TRUE: i32 = 1;
        pub const FALSE: i32 = 2;
        pub const NULL: i32 = 3;
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TupleBuilder {
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<ValueBuilder>,
}

/// Parallel key/value lists; order is insertion order.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DocumentBuilder {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<KeyBuilder>,
    #[prost(message, repeated, tag = "2")]
    pub values: Vec<ValueBuilder>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PairBuilder {
    #[prost(message, optional, tag = "1")]
    pub left: Option<MuidBuilder>,
    #[prost(message, optional, tag = "2")]
    pub rite: Option<MuidBuilder>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntryBuilder {
    #[prost(int32, tag = "1")]
    pub behavior: i32,
    #[prost(message, optional, tag = "2")]
    pub container: Option<MuidBuilder>,
    #[prost(message, optional, tag = "3")]
    pub key: Option<KeyBuilder>,
    #[prost(message, optional, tag = "4")]
    pub describing: Option<MuidBuilder>,
    #[prost(message, optional, tag = "5")]
    pub pair: Option<PairBuilder>,
    #[prost(message, optional, tag = "6")]
    pub value: Option<ValueBuilder>,
    #[prost(message, optional, tag = "7")]
    pub pointee: Option<MuidBuilder>,
    #[prost(bool, tag = "8")]
    pub deletion: bool,
    #[prost(int64, tag = "9")]
    pub effective: i64,
    #[prost(int64, tag = "10")]
    pub expiry: i64,
    #[prost(bool, tag = "11")]
    pub purge: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ContainerBuilder {
    #[prost(int32, tag = "1")]
    pub behavior: i32,
}

/// Moves (`dest != 0`) or removes (`dest == 0`) an entry.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct MovementBuilder {
    #[prost(message, optional, tag = "1")]
    pub container: Option<MuidBuilder>,
    #[prost(message, optional, tag = "2")]
    pub entry: Option<MuidBuilder>,
    #[prost(int64, tag = "3")]
    pub dest: i64,
    #[prost(bool, tag = "4")]
    pub purge: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ClearanceBuilder {
    #[prost(message, optional, tag = "1")]
    pub container: Option<MuidBuilder>,
    #[prost(bool, tag = "2")]
    pub purge: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChangeBuilder {
    #[prost(oneof = "change_builder::Change", tags = "1, 2, 3, 4")]
    pub change: Option<change_builder::Change>,
}

/// Nested types for [`ChangeBuilder`].
pub mod change_builder {
    /// Change payload
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Change {
        #[prost(message, tag = "1")]
        Container(super::ContainerBuilder),
        #[prost(message, tag = "2")]
        Entry(super::EntryBuilder),
        #[prost(message, tag = "3")]
        Movement(super::MovementBuilder),
        #[prost(message, tag = "4")]
        Clearance(super::ClearanceBuilder),
    }
}

impl ChangeBuilder {
    /// Wrap an entry.
    pub fn entry(entry: EntryBuilder) -> Self {
        Self {
            change: Some(change_builder::Change::Entry(entry)),
        }
    }

    /// Wrap a movement.
    pub fn movement(movement: MovementBuilder) -> Self {
        Self {
            change: Some(change_builder::Change::Movement(movement)),
        }
    }

    /// Wrap a clearance.
    pub fn clearance(clearance: ClearanceBuilder) -> Self {
        Self {
            change: Some(change_builder::Change::Clearance(clearance)),
        }
    }

    /// Wrap a container definition.
    pub fn container(container: ContainerBuilder) -> Self {
        Self {
            change: Some(change_builder::Change::Container(container)),
        }
    }
}

/// Body of a signed bundle.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BundleBuilder {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(int64, tag = "2")]
    pub medallion: i64,
    #[prost(int64, tag = "3")]
    pub chain_start: i64,
    #[prost(int64, tag = "4")]
    pub previous: i64,
    #[prost(string, tag = "5")]
    pub comment: String,
    #[prost(bytes = "vec", tag = "6")]
    pub prior_hash: Vec<u8>,
    #[prost(string, optional, tag = "7")]
    pub identity: Option<String>,
    #[prost(bytes = "vec", tag = "8")]
    pub verify_key: Vec<u8>,
    #[prost(uint64, optional, tag = "9")]
    pub key_id: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "10")]
    pub encrypted: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "11")]
    pub changes: Vec<ChangeBuilder>,
}

/// Record that this process owns a chain.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ClaimBuilder {
    #[prost(int64, tag = "1")]
    pub medallion: i64,
    #[prost(int64, tag = "2")]
    pub chain_start: i64,
    #[prost(int64, tag = "3")]
    pub process_id: i64,
    #[prost(int64, tag = "4")]
    pub claim_time: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncMessage {
    #[prost(oneof = "sync_message::Contents", tags = "1, 2, 3")]
    pub contents: Option<sync_message::Contents>,
}

/// Nested types for [`SyncMessage`].
pub mod sync_message {
    /// Message payload
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Contents {
        #[prost(bytes = "vec", tag = "1")]
        Bundle(Vec<u8>),
        #[prost(message, tag = "2")]
        Greeting(super::Greeting),
        #[prost(message, tag = "3")]
        Ack(super::Ack),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Greeting {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<GreetingEntry>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GreetingEntry {
    #[prost(int64, tag = "1")]
    pub medallion: i64,
    #[prost(int64, tag = "2")]
    pub chain_start: i64,
    #[prost(int64, tag = "3")]
    pub seen_through: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(int64, tag = "1")]
    pub medallion: i64,
    #[prost(int64, tag = "2")]
    pub chain_start: i64,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(int64, tag = "4")]
    pub previous: i64,
}

/// First frame a client sends: the requested path plus opaque credentials.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bytes = "vec", tag = "2")]
    pub auth_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_sync_message_bundle_roundtrip() {
        let msg = SyncMessage {
            contents: Some(sync_message::Contents::Bundle(vec![1, 2, 3])),
        };
        let decoded = SyncMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_entry_defaults_are_empty() {
        let entry = EntryBuilder::default();
        assert!(entry.encode_to_vec().is_empty());
        assert!(!entry.deletion);
        assert!(entry.container.is_none());
    }
}
