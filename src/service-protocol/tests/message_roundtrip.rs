//! Property tests of the wire codec: decoding an encoded message always
//! yields the message back, for every variant and any chunking.

use bytes::Bytes;
use proptest::prelude::*;
use restate_sdk_service_protocol::codec::ProtobufRawEntryCodec;
use restate_sdk_service_protocol::message::{Decoder, Encoder, ProtocolMessage};
use restate_sdk_types::errors::InvocationErrorCode;
use restate_sdk_types::journal::raw::{RawEntryCodec, RawEntryHeader};
use restate_sdk_types::journal::{
    Completion, CompletionResult, Entry, EntryResult, GetStateKeysResult, GetStateResult,
    InvokeRequest, SleepResult,
};

fn arb_bytes() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..64).prop_map(Bytes::from)
}

fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_.]{0,24}"
}

fn arb_code() -> impl Strategy<Value = InvocationErrorCode> {
    any::<u16>().prop_map(InvocationErrorCode::from)
}

fn arb_entry_result() -> impl Strategy<Value = EntryResult> {
    prop_oneof![
        arb_bytes().prop_map(EntryResult::Success),
        (arb_code(), any::<String>())
            .prop_map(|(code, message)| EntryResult::Failure(code, message.into())),
    ]
}

fn arb_invoke_request() -> impl Strategy<Value = InvokeRequest> {
    (arb_name(), arb_name(), arb_bytes())
        .prop_map(|(service, method, parameter)| InvokeRequest::new(service, method, parameter))
}

fn arb_entry() -> impl Strategy<Value = Entry> {
    prop_oneof![
        arb_bytes().prop_map(Entry::input),
        arb_entry_result().prop_map(Entry::output),
        (
            arb_bytes(),
            prop::option::of(prop_oneof![
                Just(GetStateResult::Empty),
                arb_bytes().prop_map(GetStateResult::Result),
                (arb_code(), any::<String>())
                    .prop_map(|(c, m)| GetStateResult::Failure(c, m.into())),
            ])
        )
            .prop_map(|(key, value)| Entry::get_state(key, value)),
        (arb_bytes(), arb_bytes()).prop_map(|(key, value)| Entry::set_state(key, value)),
        arb_bytes().prop_map(Entry::clear_state),
        Just(Entry::ClearAllState),
        prop::option::of(prop_oneof![
            prop::collection::vec(arb_bytes(), 0..8).prop_map(GetStateKeysResult::Result),
            (arb_code(), any::<String>())
                .prop_map(|(c, m)| GetStateKeysResult::Failure(c, m.into())),
        ])
        .prop_map(Entry::get_state_keys),
        (
            any::<u64>(),
            prop::option::of(prop_oneof![
                Just(SleepResult::Fired),
                (arb_code(), any::<String>()).prop_map(|(c, m)| SleepResult::Failure(c, m.into())),
            ])
        )
            .prop_map(|(wake_up_time, result)| Entry::sleep(wake_up_time, result)),
        (arb_invoke_request(), prop::option::of(arb_entry_result()))
            .prop_map(|(request, result)| Entry::invoke(request, result)),
        (arb_invoke_request(), any::<u64>())
            .prop_map(|(request, invoke_time)| Entry::background_invoke(request, invoke_time)),
        prop::option::of(arb_entry_result()).prop_map(Entry::awakeable),
        (arb_name(), arb_bytes()).prop_map(|(id, value)| Entry::resolve_awakeable(id, value)),
        (arb_name(), arb_code(), any::<String>())
            .prop_map(|(id, code, message)| Entry::reject_awakeable(id, code, message)),
        arb_entry_result().prop_map(Entry::side_effect),
    ]
}

fn arb_completion_result() -> impl Strategy<Value = CompletionResult> {
    prop_oneof![
        Just(CompletionResult::Ack),
        Just(CompletionResult::Empty),
        arb_bytes().prop_map(CompletionResult::Success),
        (arb_code(), any::<String>())
            .prop_map(|(code, message)| CompletionResult::Failure(code, message.into())),
    ]
}

fn arb_message() -> impl Strategy<Value = ProtocolMessage> {
    prop_oneof![
        (
            arb_bytes(),
            any::<String>(),
            any::<u32>(),
            arb_bytes(),
            any::<bool>(),
            prop::collection::vec((arb_bytes(), arb_bytes()), 0..4)
        )
            .prop_map(|(id, debug_id, known_entries, key, partial_state, state_map)| {
                ProtocolMessage::new_start_message(
                    id,
                    debug_id,
                    known_entries,
                    key,
                    partial_state,
                    state_map,
                )
            }),
        (any::<u32>(), arb_completion_result())
            .prop_map(|(index, result)| Completion::new(index, result).into()),
        prop::collection::vec(any::<u32>(), 0..8).prop_map(ProtocolMessage::new_suspension),
        Just(ProtocolMessage::new_end()),
        any::<u32>().prop_map(ProtocolMessage::new_ack),
        (arb_entry(), any::<bool>()).prop_map(|(entry, requires_ack)| {
            let mut raw = ProtobufRawEntryCodec::serialize(entry);
            if let RawEntryHeader::SideEffect { requires_ack: flag } = &mut raw.header {
                *flag = requires_ack;
            }
            ProtocolMessage::UnparsedEntry(raw)
        }),
    ]
}

proptest! {
    #[test]
    fn decode_of_encode_is_identity(msg in arb_message()) {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        decoder.push(encoder.encode(msg.clone()));

        let (_, decoded) = decoder.consume_next().unwrap().expect("one full frame");
        prop_assert_eq!(decoded, msg);
        prop_assert!(decoder.consume_next().unwrap().is_none());
    }

    #[test]
    fn decode_is_chunking_independent(msg in arb_message(), split in any::<prop::sample::Index>()) {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        let encoded = encoder.encode(msg.clone());
        let split = split.index(encoded.len().max(1));
        decoder.push(encoded.slice(0..split));
        decoder.push(encoded.slice(split..));

        let (_, decoded) = decoder.consume_next().unwrap().expect("one full frame");
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn entry_codec_roundtrip(entry in arb_entry()) {
        let raw = ProtobufRawEntryCodec::serialize(entry.clone());
        let deserialized = ProtobufRawEntryCodec::deserialize(&raw).unwrap();
        prop_assert_eq!(deserialized, entry);
    }
}
