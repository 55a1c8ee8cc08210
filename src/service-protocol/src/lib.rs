//! This crate contains the wire protocol spoken between the SDK and the
//! runtime, and the codec to use it: protobuf message structs, the message
//! header and frame codec, awakeable identifiers and the discovery manifest.

pub mod awakeable_id;
pub mod codec;
pub mod discovery;
pub mod message;

/// Protocol messages.
///
/// The structs are written by hand rather than generated: the message set is
/// small, stable, and hand-writing it avoids a protoc dependency in the build.
/// Field tags are part of the published protocol and must never change.
///
/// By convention, the result oneof of completable entry messages uses the same
/// tags as the result oneof of [`pb::CompletionMessage`] (13 = empty,
/// 14 = value, 15 = failure). This allows completing a serialized entry by
/// appending the encoded completion result to its buffer, relying on
/// protobuf's last-one-wins decoding rule.
pub mod pb {
    use bytes::Bytes;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StartMessage {
        /// Raw invocation id, opaque to the SDK.
        #[prost(bytes = "bytes", tag = "1")]
        pub id: Bytes,
        /// Human readable invocation id, used for logging only.
        #[prost(string, tag = "2")]
        pub debug_id: String,
        /// Number of journal entries the runtime replays, including the input entry.
        #[prost(uint32, tag = "3")]
        pub known_entries: u32,
        /// Key of the service instance, empty for unkeyed services.
        #[prost(bytes = "bytes", tag = "4")]
        pub key: Bytes,
        /// When false, `state_map` is the complete state of the service instance.
        #[prost(bool, tag = "5")]
        pub partial_state: bool,
        #[prost(message, repeated, tag = "6")]
        pub state_map: Vec<start_message::StateEntry>,
    }

    pub mod start_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct StateEntry {
            #[prost(bytes = "bytes", tag = "1")]
            pub key: Bytes,
            #[prost(bytes = "bytes", tag = "2")]
            pub value: Bytes,
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CompletionMessage {
        #[prost(uint32, tag = "1")]
        pub entry_index: u32,
        #[prost(oneof = "completion_message::Result", tags = "13, 14, 15")]
        pub result: Option<completion_message::Result>,
    }

    pub mod completion_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(message, tag = "13")]
            Empty(()),
            #[prost(bytes = "bytes", tag = "14")]
            Value(Bytes),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct SuspensionMessage {
        #[prost(uint32, repeated, tag = "1")]
        pub entry_indexes: Vec<u32>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct EndMessage {}

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct AckMessage {
        #[prost(uint32, tag = "1")]
        pub entry_index: u32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Failure {
        #[prost(uint32, tag = "1")]
        pub code: u32,
        #[prost(string, tag = "2")]
        pub message: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InputEntryMessage {
        #[prost(bytes = "bytes", tag = "1")]
        pub value: Bytes,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct OutputEntryMessage {
        #[prost(oneof = "output_entry_message::Result", tags = "14, 15")]
        pub result: Option<output_entry_message::Result>,
    }

    pub mod output_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(bytes = "bytes", tag = "14")]
            Value(Bytes),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GetStateEntryMessage {
        #[prost(bytes = "bytes", tag = "1")]
        pub key: Bytes,
        #[prost(oneof = "get_state_entry_message::Result", tags = "13, 14, 15")]
        pub result: Option<get_state_entry_message::Result>,
    }

    pub mod get_state_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(message, tag = "13")]
            Empty(()),
            #[prost(bytes = "bytes", tag = "14")]
            Value(Bytes),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct SetStateEntryMessage {
        #[prost(bytes = "bytes", tag = "1")]
        pub key: Bytes,
        #[prost(bytes = "bytes", tag = "2")]
        pub value: Bytes,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ClearStateEntryMessage {
        #[prost(bytes = "bytes", tag = "1")]
        pub key: Bytes,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ClearAllStateEntryMessage {}

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GetStateKeysEntryMessage {
        #[prost(oneof = "get_state_keys_entry_message::Result", tags = "14, 15")]
        pub result: Option<get_state_keys_entry_message::Result>,
    }

    pub mod get_state_keys_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct StateKeys {
            #[prost(bytes = "bytes", repeated, tag = "1")]
            pub keys: Vec<Bytes>,
        }

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(message, tag = "14")]
            Value(StateKeys),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct SleepEntryMessage {
        /// Wake up time, in milliseconds since the unix epoch.
        #[prost(uint64, tag = "1")]
        pub wake_up_time: u64,
        #[prost(oneof = "sleep_entry_message::Result", tags = "13, 15")]
        pub result: Option<sleep_entry_message::Result>,
    }

    pub mod sleep_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(message, tag = "13")]
            Empty(()),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InvokeEntryMessage {
        #[prost(string, tag = "1")]
        pub service_name: String,
        #[prost(string, tag = "2")]
        pub method_name: String,
        #[prost(bytes = "bytes", tag = "3")]
        pub parameter: Bytes,
        #[prost(oneof = "invoke_entry_message::Result", tags = "14, 15")]
        pub result: Option<invoke_entry_message::Result>,
    }

    pub mod invoke_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(bytes = "bytes", tag = "14")]
            Value(Bytes),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct BackgroundInvokeEntryMessage {
        #[prost(string, tag = "1")]
        pub service_name: String,
        #[prost(string, tag = "2")]
        pub method_name: String,
        #[prost(bytes = "bytes", tag = "3")]
        pub parameter: Bytes,
        /// Time at which the runtime should execute the call, in milliseconds
        /// since the unix epoch. Zero means immediately.
        #[prost(uint64, tag = "4")]
        pub invoke_time: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct AwakeableEntryMessage {
        #[prost(oneof = "awakeable_entry_message::Result", tags = "14, 15")]
        pub result: Option<awakeable_entry_message::Result>,
    }

    pub mod awakeable_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(bytes = "bytes", tag = "14")]
            Value(Bytes),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ResolveAwakeableEntryMessage {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(bytes = "bytes", tag = "2")]
        pub value: Bytes,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct RejectAwakeableEntryMessage {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(message, optional, tag = "2")]
        pub failure: Option<Failure>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct SideEffectEntryMessage {
        #[prost(oneof = "side_effect_entry_message::Result", tags = "14, 15")]
        pub result: Option<side_effect_entry_message::Result>,
    }

    pub mod side_effect_entry_message {
        use super::*;

        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Result {
            #[prost(bytes = "bytes", tag = "14")]
            Value(Bytes),
            #[prost(message, tag = "15")]
            Failure(super::Failure),
        }
    }
}

/// This module implements conversions from proto messages to the
/// [`restate_sdk_types::journal::Entry`] model. These are used by
/// [`codec::ProtobufRawEntryCodec::deserialize`].
mod pb_into {
    use super::pb::*;

    use restate_sdk_types::journal::*;

    impl TryFrom<InputEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: InputEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::Input(InputEntry { value: msg.value }))
        }
    }

    impl TryFrom<OutputEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: OutputEntryMessage) -> Result<Self, Self::Error> {
            Ok(Entry::Output(OutputEntry {
                result: match msg.result.ok_or("result")? {
                    output_entry_message::Result::Value(r) => EntryResult::Success(r),
                    output_entry_message::Result::Failure(Failure { code, message }) => {
                        EntryResult::Failure(code.into(), message.into())
                    }
                },
            }))
        }
    }

    impl TryFrom<GetStateEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: GetStateEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::GetState(GetStateEntry {
                key: msg.key,
                value: msg.result.map(|v| match v {
                    get_state_entry_message::Result::Empty(_) => GetStateResult::Empty,
                    get_state_entry_message::Result::Value(b) => GetStateResult::Result(b),
                    get_state_entry_message::Result::Failure(failure) => {
                        GetStateResult::Failure(failure.code.into(), failure.message.into())
                    }
                }),
            }))
        }
    }

    impl TryFrom<SetStateEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: SetStateEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::SetState(SetStateEntry {
                key: msg.key,
                value: msg.value,
            }))
        }
    }

    impl TryFrom<ClearStateEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: ClearStateEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::ClearState(ClearStateEntry { key: msg.key }))
        }
    }

    impl TryFrom<ClearAllStateEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(_: ClearAllStateEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::ClearAllState)
        }
    }

    impl TryFrom<GetStateKeysEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: GetStateKeysEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::GetStateKeys(GetStateKeysEntry {
                value: msg.result.map(|v| match v {
                    get_state_keys_entry_message::Result::Value(b) => {
                        GetStateKeysResult::Result(b.keys)
                    }
                    get_state_keys_entry_message::Result::Failure(failure) => {
                        GetStateKeysResult::Failure(failure.code.into(), failure.message.into())
                    }
                }),
            }))
        }
    }

    impl TryFrom<SleepEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: SleepEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::Sleep(SleepEntry {
                wake_up_time: msg.wake_up_time,
                result: msg.result.map(|r| match r {
                    sleep_entry_message::Result::Empty(_) => SleepResult::Fired,
                    sleep_entry_message::Result::Failure(failure) => {
                        SleepResult::Failure(failure.code.into(), failure.message.into())
                    }
                }),
            }))
        }
    }

    impl TryFrom<InvokeEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: InvokeEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::Invoke(InvokeEntry {
                request: InvokeRequest {
                    service_name: msg.service_name.into(),
                    method_name: msg.method_name.into(),
                    parameter: msg.parameter,
                },
                result: msg.result.map(|v| match v {
                    invoke_entry_message::Result::Value(r) => EntryResult::Success(r),
                    invoke_entry_message::Result::Failure(Failure { code, message }) => {
                        EntryResult::Failure(code.into(), message.into())
                    }
                }),
            }))
        }
    }

    impl TryFrom<BackgroundInvokeEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: BackgroundInvokeEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::BackgroundInvoke(BackgroundInvokeEntry {
                request: InvokeRequest {
                    service_name: msg.service_name.into(),
                    method_name: msg.method_name.into(),
                    parameter: msg.parameter,
                },
                invoke_time: msg.invoke_time,
            }))
        }
    }

    impl TryFrom<AwakeableEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: AwakeableEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::Awakeable(AwakeableEntry {
                result: msg.result.map(|v| match v {
                    awakeable_entry_message::Result::Value(r) => EntryResult::Success(r),
                    awakeable_entry_message::Result::Failure(Failure { code, message }) => {
                        EntryResult::Failure(code.into(), message.into())
                    }
                }),
            }))
        }
    }

    impl TryFrom<ResolveAwakeableEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: ResolveAwakeableEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::ResolveAwakeable(ResolveAwakeableEntry {
                id: msg.id.into(),
                value: msg.value,
            }))
        }
    }

    impl TryFrom<RejectAwakeableEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: RejectAwakeableEntryMessage) -> Result<Self, Self::Error> {
            let failure = msg.failure.ok_or("failure")?;
            Ok(Self::RejectAwakeable(RejectAwakeableEntry {
                id: msg.id.into(),
                code: failure.code.into(),
                message: failure.message.into(),
            }))
        }
    }

    impl TryFrom<SideEffectEntryMessage> for Entry {
        type Error = &'static str;

        fn try_from(msg: SideEffectEntryMessage) -> Result<Self, Self::Error> {
            Ok(Self::SideEffect(SideEffectEntry {
                result: match msg.result.ok_or("result")? {
                    side_effect_entry_message::Result::Value(r) => EntryResult::Success(r),
                    side_effect_entry_message::Result::Failure(Failure { code, message }) => {
                        EntryResult::Failure(code.into(), message.into())
                    }
                },
            }))
        }
    }
}

/// Conversions from the [`restate_sdk_types::journal::Entry`] model to proto
/// messages, used by [`codec::ProtobufRawEntryCodec::serialize`].
mod pb_from {
    use super::pb::*;

    use restate_sdk_types::errors::InvocationErrorCode;
    use restate_sdk_types::journal::*;

    fn failure(code: InvocationErrorCode, message: impl std::fmt::Display) -> Failure {
        Failure {
            code: code.into(),
            message: message.to_string(),
        }
    }

    impl From<InputEntry> for InputEntryMessage {
        fn from(e: InputEntry) -> Self {
            InputEntryMessage { value: e.value }
        }
    }

    impl From<OutputEntry> for OutputEntryMessage {
        fn from(e: OutputEntry) -> Self {
            OutputEntryMessage {
                result: Some(match e.result {
                    EntryResult::Success(b) => output_entry_message::Result::Value(b),
                    EntryResult::Failure(code, message) => {
                        output_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }

    impl From<GetStateEntry> for GetStateEntryMessage {
        fn from(e: GetStateEntry) -> Self {
            GetStateEntryMessage {
                key: e.key,
                result: e.value.map(|v| match v {
                    GetStateResult::Empty => get_state_entry_message::Result::Empty(()),
                    GetStateResult::Result(b) => get_state_entry_message::Result::Value(b),
                    GetStateResult::Failure(code, message) => {
                        get_state_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }

    impl From<SetStateEntry> for SetStateEntryMessage {
        fn from(e: SetStateEntry) -> Self {
            SetStateEntryMessage {
                key: e.key,
                value: e.value,
            }
        }
    }

    impl From<ClearStateEntry> for ClearStateEntryMessage {
        fn from(e: ClearStateEntry) -> Self {
            ClearStateEntryMessage { key: e.key }
        }
    }

    impl From<GetStateKeysEntry> for GetStateKeysEntryMessage {
        fn from(e: GetStateKeysEntry) -> Self {
            GetStateKeysEntryMessage {
                result: e.value.map(|v| match v {
                    GetStateKeysResult::Result(keys) => get_state_keys_entry_message::Result::Value(
                        get_state_keys_entry_message::StateKeys { keys },
                    ),
                    GetStateKeysResult::Failure(code, message) => {
                        get_state_keys_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }

    impl From<SleepEntry> for SleepEntryMessage {
        fn from(e: SleepEntry) -> Self {
            SleepEntryMessage {
                wake_up_time: e.wake_up_time,
                result: e.result.map(|r| match r {
                    SleepResult::Fired => sleep_entry_message::Result::Empty(()),
                    SleepResult::Failure(code, message) => {
                        sleep_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }

    impl From<InvokeEntry> for InvokeEntryMessage {
        fn from(e: InvokeEntry) -> Self {
            InvokeEntryMessage {
                service_name: e.request.service_name.to_string(),
                method_name: e.request.method_name.to_string(),
                parameter: e.request.parameter,
                result: e.result.map(|v| match v {
                    EntryResult::Success(r) => invoke_entry_message::Result::Value(r),
                    EntryResult::Failure(code, message) => {
                        invoke_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }

    impl From<BackgroundInvokeEntry> for BackgroundInvokeEntryMessage {
        fn from(e: BackgroundInvokeEntry) -> Self {
            BackgroundInvokeEntryMessage {
                service_name: e.request.service_name.to_string(),
                method_name: e.request.method_name.to_string(),
                parameter: e.request.parameter,
                invoke_time: e.invoke_time,
            }
        }
    }

    impl From<AwakeableEntry> for AwakeableEntryMessage {
        fn from(e: AwakeableEntry) -> Self {
            AwakeableEntryMessage {
                result: e.result.map(|v| match v {
                    EntryResult::Success(r) => awakeable_entry_message::Result::Value(r),
                    EntryResult::Failure(code, message) => {
                        awakeable_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }

    impl From<ResolveAwakeableEntry> for ResolveAwakeableEntryMessage {
        fn from(e: ResolveAwakeableEntry) -> Self {
            ResolveAwakeableEntryMessage {
                id: e.id.to_string(),
                value: e.value,
            }
        }
    }

    impl From<RejectAwakeableEntry> for RejectAwakeableEntryMessage {
        fn from(e: RejectAwakeableEntry) -> Self {
            RejectAwakeableEntryMessage {
                id: e.id.to_string(),
                failure: Some(failure(e.code, e.message)),
            }
        }
    }

    impl From<SideEffectEntry> for SideEffectEntryMessage {
        fn from(e: SideEffectEntry) -> Self {
            SideEffectEntryMessage {
                result: Some(match e.result {
                    EntryResult::Success(b) => side_effect_entry_message::Result::Value(b),
                    EntryResult::Failure(code, message) => {
                        side_effect_entry_message::Result::Failure(failure(code, message))
                    }
                }),
            }
        }
    }
}
