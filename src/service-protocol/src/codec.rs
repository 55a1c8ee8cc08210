use super::pb;

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use restate_sdk_types::journal::raw::{RawEntry, RawEntryCodec, RawEntryHeader};
use restate_sdk_types::journal::{CompletableEntry, CompletionResult, Entry, EntryType};
use std::mem;

#[derive(Debug, thiserror::Error)]
#[error("cannot decode {ty:?}. {kind:?}")]
pub struct Error {
    ty: EntryType,
    kind: ErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
    #[error("field '{0}' is missing")]
    MissingField(&'static str),
}

/// This macro generates the pattern matching with arms per entry.
/// For each entry it first executes `Message#decode` and then `try_into()`.
/// It expects that for each `{...}Entry` there is a valid `TryFrom<{...}Message>` implementation with `Error = &'static str`.
/// These implementations are available in [`super::pb_into`].
macro_rules! match_decode {
    ($ty:expr, $buf:expr, { $($variant:ident),* }) => {
        match $ty {
              $(EntryType::$variant => paste::paste! {
                  pb::[<$variant EntryMessage>]::decode($buf)
                    .map_err(|e| Error { ty: $ty, kind: ErrorKind::Decode(e) })
                    .and_then(|msg| msg.try_into().map_err(|f| Error { ty: $ty, kind: ErrorKind::MissingField(f) }))
              },)*
        }
    };
}

#[derive(Debug, Default, Copy, Clone)]
pub struct ProtobufRawEntryCodec;

impl ProtobufRawEntryCodec {
    fn serialize_entry_body(entry: Entry) -> Bytes {
        match entry {
            Entry::Input(e) => pb::InputEntryMessage::from(e).encode_to_vec(),
            Entry::Output(e) => pb::OutputEntryMessage::from(e).encode_to_vec(),
            Entry::GetState(e) => pb::GetStateEntryMessage::from(e).encode_to_vec(),
            Entry::SetState(e) => pb::SetStateEntryMessage::from(e).encode_to_vec(),
            Entry::ClearState(e) => pb::ClearStateEntryMessage::from(e).encode_to_vec(),
            Entry::ClearAllState => pb::ClearAllStateEntryMessage {}.encode_to_vec(),
            Entry::GetStateKeys(e) => pb::GetStateKeysEntryMessage::from(e).encode_to_vec(),
            Entry::Sleep(e) => pb::SleepEntryMessage::from(e).encode_to_vec(),
            Entry::Invoke(e) => pb::InvokeEntryMessage::from(e).encode_to_vec(),
            Entry::BackgroundInvoke(e) => {
                pb::BackgroundInvokeEntryMessage::from(e).encode_to_vec()
            }
            Entry::Awakeable(e) => pb::AwakeableEntryMessage::from(e).encode_to_vec(),
            Entry::ResolveAwakeable(e) => pb::ResolveAwakeableEntryMessage::from(e).encode_to_vec(),
            Entry::RejectAwakeable(e) => pb::RejectAwakeableEntryMessage::from(e).encode_to_vec(),
            Entry::SideEffect(e) => pb::SideEffectEntryMessage::from(e).encode_to_vec(),
        }
        .into()
    }

    fn header_for(entry: &Entry) -> RawEntryHeader {
        match entry {
            // The runtime always ships the input completed, and so do we
            Entry::Input(_) => RawEntryHeader::Input { is_completed: true },
            Entry::Output(_) => RawEntryHeader::Output,
            Entry::GetState(e) => RawEntryHeader::GetState {
                is_completed: e.is_completed(),
            },
            Entry::SetState(_) => RawEntryHeader::SetState,
            Entry::ClearState(_) => RawEntryHeader::ClearState,
            Entry::ClearAllState => RawEntryHeader::ClearAllState,
            Entry::GetStateKeys(e) => RawEntryHeader::GetStateKeys {
                is_completed: e.is_completed(),
            },
            Entry::Sleep(e) => RawEntryHeader::Sleep {
                is_completed: e.is_completed(),
            },
            Entry::Invoke(e) => RawEntryHeader::Invoke {
                is_completed: e.is_completed(),
            },
            Entry::BackgroundInvoke(_) => RawEntryHeader::BackgroundInvoke,
            Entry::Awakeable(e) => RawEntryHeader::Awakeable {
                is_completed: e.is_completed(),
            },
            Entry::ResolveAwakeable(_) => RawEntryHeader::ResolveAwakeable,
            Entry::RejectAwakeable(_) => RawEntryHeader::RejectAwakeable,
            Entry::SideEffect(_) => RawEntryHeader::SideEffect {
                requires_ack: false,
            },
        }
    }
}

impl RawEntryCodec for ProtobufRawEntryCodec {
    type Error = Error;

    fn serialize(entry: Entry) -> RawEntry {
        let header = Self::header_for(&entry);
        RawEntry::new(header, Self::serialize_entry_body(entry))
    }

    fn deserialize(entry: &RawEntry) -> Result<Entry, Self::Error> {
        // We clone the entry Bytes here to ensure that the generated Message::decode
        // invocation reuses the same underlying byte array.
        match_decode!(entry.header.ty(), entry.entry.clone(), {
            Input,
            Output,
            GetState,
            SetState,
            ClearState,
            ClearAllState,
            GetStateKeys,
            Sleep,
            Invoke,
            BackgroundInvoke,
            Awakeable,
            ResolveAwakeable,
            RejectAwakeable,
            SideEffect
        })
    }

    fn write_completion(
        entry: &mut RawEntry,
        completion_result: CompletionResult,
    ) -> Result<(), Self::Error> {
        debug_assert_eq!(entry.header.is_completed(), Some(false));

        // Prepare the result to serialize in protobuf
        let completion_result_message = match completion_result {
            CompletionResult::Ack => {
                // For acks we simply flag the entry as completed and return
                entry.header.mark_completed();
                return Ok(());
            }
            CompletionResult::Empty => pb::completion_message::Result::Empty(()),
            CompletionResult::Success(b) => pb::completion_message::Result::Value(b),
            CompletionResult::Failure(code, message) => {
                pb::completion_message::Result::Failure(pb::Failure {
                    code: code.into(),
                    message: message.to_string(),
                })
            }
        };

        // Prepare a buffer for the result
        let len = entry.entry.len() + completion_result_message.encoded_len();
        let mut result_buf = BytesMut::with_capacity(len);

        // Concatenate entry + result.
        // The reason why encoding completion_message_result works is that by convention the tags
        // of completion message result are the same used by completable entries.
        // See https://protobuf.dev/programming-guides/encoding/#last-one-wins
        result_buf.put(mem::take(&mut entry.entry));
        completion_result_message.encode(&mut result_buf);

        // Write back to the entry the new buffer and the completed flag
        entry.entry = result_buf.freeze();
        entry.header.mark_completed();

        Ok(())
    }
}
