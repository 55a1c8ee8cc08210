//! Module containing definitions of protocol messages,
//! including encoding and decoding of headers and message payloads.

use super::pb;

use bytes::Bytes;
use prost::Message;
use restate_sdk_types::identifiers::EntryIndex;
use restate_sdk_types::journal::raw::RawEntry;
use restate_sdk_types::journal::{Completion, CompletionResult};

mod encoding;
mod header;

pub use encoding::{Decoder, Encoder, EncodingError};
pub use header::{MessageHeader, MessageKind, MessageType, UnknownMessageType};

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    // Core
    Start(pb::StartMessage),
    Completion(pb::CompletionMessage),
    Suspension(pb::SuspensionMessage),
    End(pb::EndMessage),
    Ack(pb::AckMessage),

    // Entries are not parsed at this point
    UnparsedEntry(RawEntry),
}

impl ProtocolMessage {
    pub fn new_start_message(
        id: Bytes,
        debug_id: String,
        known_entries: u32,
        key: Bytes,
        partial_state: bool,
        state_map_entries: impl IntoIterator<Item = (Bytes, Bytes)>,
    ) -> Self {
        Self::Start(pb::StartMessage {
            id,
            debug_id,
            known_entries,
            key,
            partial_state,
            state_map: state_map_entries
                .into_iter()
                .map(|(key, value)| pb::start_message::StateEntry { key, value })
                .collect(),
        })
    }

    pub fn new_suspension(entry_indexes: impl IntoIterator<Item = EntryIndex>) -> Self {
        Self::Suspension(pb::SuspensionMessage {
            entry_indexes: entry_indexes.into_iter().collect(),
        })
    }

    pub fn new_end() -> Self {
        Self::End(pb::EndMessage {})
    }

    pub fn new_ack(entry_index: EntryIndex) -> Self {
        Self::Ack(pb::AckMessage { entry_index })
    }

    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            ProtocolMessage::Start(m) => m.encoded_len(),
            ProtocolMessage::Completion(m) => m.encoded_len(),
            ProtocolMessage::Suspension(m) => m.encoded_len(),
            ProtocolMessage::End(m) => m.encoded_len(),
            ProtocolMessage::Ack(m) => m.encoded_len(),
            ProtocolMessage::UnparsedEntry(entry) => entry.entry.len(),
        }
    }
}

impl From<Completion> for ProtocolMessage {
    fn from(completion: Completion) -> Self {
        ProtocolMessage::Completion(pb::CompletionMessage {
            entry_index: completion.entry_index,
            result: match completion.result {
                CompletionResult::Ack => None,
                CompletionResult::Empty => Some(pb::completion_message::Result::Empty(())),
                CompletionResult::Success(b) => Some(pb::completion_message::Result::Value(b)),
                CompletionResult::Failure(code, message) => {
                    Some(pb::completion_message::Result::Failure(pb::Failure {
                        code: code.into(),
                        message: message.to_string(),
                    }))
                }
            },
        })
    }
}

impl From<pb::CompletionMessage> for Completion {
    fn from(message: pb::CompletionMessage) -> Self {
        Completion {
            entry_index: message.entry_index,
            result: match message.result {
                None => CompletionResult::Ack,
                Some(pb::completion_message::Result::Empty(())) => CompletionResult::Empty,
                Some(pb::completion_message::Result::Value(b)) => CompletionResult::Success(b),
                Some(pb::completion_message::Result::Failure(pb::Failure { code, message })) => {
                    CompletionResult::Failure(code.into(), message.into())
                }
            },
        }
    }
}

impl From<RawEntry> for ProtocolMessage {
    fn from(value: RawEntry) -> Self {
        Self::UnparsedEntry(value)
    }
}
