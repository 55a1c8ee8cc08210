use super::header::UnknownMessageType;
use super::*;

use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_utils::SegmentedBuf;
use restate_sdk_types::journal::raw::RawEntryHeader;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("cannot decode message type {0:?}. This looks like a bug of the runtime. Reason: {1:?}")]
    DecodeMessage(MessageType, #[source] prost::DecodeError),
    #[error(transparent)]
    UnknownMessageType(#[from] UnknownMessageType),
    #[error("hit message size limit: {0} >= {1}")]
    MessageSizeLimit(usize, usize),
}

// --- Message encoder

pub struct Encoder {}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encodes a message to bytes
    pub fn encode(&self, msg: ProtocolMessage) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len(&msg));
        self.encode_to_buf_mut(&mut buf, msg).expect(
            "Encoding messages should be infallible, \
            this error indicates a bug in the SDK core. \
            Please contact the developers.",
        );
        buf.freeze()
    }

    /// Includes header len
    pub fn encoded_len(&self, msg: &ProtocolMessage) -> usize {
        8 + msg.encoded_len()
    }

    pub fn encode_to_buf_mut(
        &self,
        mut buf: impl BufMut,
        msg: ProtocolMessage,
    ) -> Result<(), prost::EncodeError> {
        let header = generate_header(&msg);
        buf.put_u64(header.into());

        // Note:
        // prost::EncodeError can be triggered only by a buffer smaller than required,
        // but because we create the buffer a couple of lines above using the size computed by prost,
        // this can happen only if there is a very bad bug in prost.
        encode_msg(&msg, &mut buf)
    }
}

fn generate_header(msg: &ProtocolMessage) -> MessageHeader {
    let len: u32 = msg
        .encoded_len()
        .try_into()
        .expect("Protocol messages can't be larger than u32");
    match msg {
        ProtocolMessage::Start(_) => MessageHeader::new(MessageType::Start, len),
        ProtocolMessage::Completion(_) => MessageHeader::new(MessageType::Completion, len),
        ProtocolMessage::Suspension(_) => MessageHeader::new(MessageType::Suspension, len),
        ProtocolMessage::End(_) => MessageHeader::new(MessageType::End, len),
        ProtocolMessage::Ack(_) => MessageHeader::new(MessageType::Ack, len),
        ProtocolMessage::UnparsedEntry(entry) => MessageHeader::new_entry_header(
            raw_header_to_message_type(&entry.header),
            entry.header.is_completed(),
            entry.header.requires_ack(),
            len,
        ),
    }
}

fn encode_msg(msg: &ProtocolMessage, buf: &mut impl BufMut) -> Result<(), prost::EncodeError> {
    match msg {
        ProtocolMessage::Start(m) => m.encode(buf),
        ProtocolMessage::Completion(m) => m.encode(buf),
        ProtocolMessage::Suspension(m) => m.encode(buf),
        ProtocolMessage::End(m) => m.encode(buf),
        ProtocolMessage::Ack(m) => m.encode(buf),
        ProtocolMessage::UnparsedEntry(entry) => {
            buf.put(entry.entry.clone());
            Ok(())
        }
    }
}

// --- Message decoder

/// Stateful decoder to decode [`ProtocolMessage`]
pub struct Decoder {
    buf: SegmentedBuf<Bytes>,
    state: DecoderState,
    message_size_warning: usize,
    message_size_limit: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(usize::MAX, None)
    }
}

impl Decoder {
    pub fn new(message_size_warning: usize, message_size_limit: Option<usize>) -> Self {
        Self {
            buf: SegmentedBuf::new(),
            state: DecoderState::WaitingHeader,
            message_size_warning,
            message_size_limit: message_size_limit.unwrap_or(usize::MAX),
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    /// Concatenate a new chunk in the internal buffer.
    pub fn push(&mut self, buf: Bytes) {
        self.buf.push(buf)
    }

    /// Try to consume the next message in the internal buffer.
    pub fn consume_next(
        &mut self,
    ) -> Result<Option<(MessageHeader, ProtocolMessage)>, EncodingError> {
        loop {
            let remaining = self.buf.remaining();

            if remaining >= self.message_size_warning {
                warn!(
                    "Message size warning: {} >= {}. \
                    Generating very large messages can make the system unstable if configured with too little memory. \
                    You can increase the threshold to avoid this warning by changing the message_size_warning option",
                    remaining, self.message_size_warning
                );
            }
            if remaining >= self.message_size_limit {
                return Err(EncodingError::MessageSizeLimit(
                    remaining,
                    self.message_size_limit,
                ));
            }

            if remaining < self.state.needs_bytes() {
                return Ok(None);
            }

            if let Some(res) = self.state.decode(&mut self.buf)? {
                return Ok(Some(res));
            }
        }
    }
}

#[derive(Default)]
enum DecoderState {
    #[default]
    WaitingHeader,
    WaitingPayload(MessageHeader),
}

impl DecoderState {
    fn needs_bytes(&self) -> usize {
        match self {
            DecoderState::WaitingHeader => 8,
            DecoderState::WaitingPayload(h) => h.frame_length() as usize,
        }
    }

    fn decode(
        &mut self,
        mut buf: impl Buf,
    ) -> Result<Option<(MessageHeader, ProtocolMessage)>, EncodingError> {
        let mut res = None;

        *self = match mem::take(self) {
            DecoderState::WaitingHeader => DecoderState::WaitingPayload(buf.get_u64().try_into()?),
            DecoderState::WaitingPayload(h) => {
                let msg = decode_protocol_message(&h, buf.take(h.frame_length() as usize))
                    .map_err(|e| EncodingError::DecodeMessage(h.message_type(), e))?;
                res = Some((h, msg));
                DecoderState::WaitingHeader
            }
        };

        Ok(res)
    }
}

fn decode_protocol_message(
    header: &MessageHeader,
    mut buf: impl Buf,
) -> Result<ProtocolMessage, prost::DecodeError> {
    Ok(match header.message_type() {
        MessageType::Start => ProtocolMessage::Start(pb::StartMessage::decode(buf)?),
        MessageType::Completion => ProtocolMessage::Completion(pb::CompletionMessage::decode(buf)?),
        MessageType::Suspension => ProtocolMessage::Suspension(pb::SuspensionMessage::decode(buf)?),
        MessageType::End => ProtocolMessage::End(pb::EndMessage::decode(buf)?),
        MessageType::Ack => ProtocolMessage::Ack(pb::AckMessage::decode(buf)?),
        _ => ProtocolMessage::UnparsedEntry(RawEntry::new(
            message_header_to_raw_header(header),
            // NOTE: This is a no-op copy if the Buf is instance of Bytes.
            // In case of SegmentedBuf, this doesn't copy if the whole message is contained
            // in a single Bytes instance.
            buf.copy_to_bytes(buf.remaining()),
        )),
    })
}

fn message_header_to_raw_header(message_header: &MessageHeader) -> RawEntryHeader {
    let completed = || {
        message_header
            .completed()
            .expect("completed flag being present")
    };
    match message_header.message_type() {
        MessageType::Start
        | MessageType::Completion
        | MessageType::Suspension
        | MessageType::End
        | MessageType::Ack => {
            unreachable!("Message is not an entry type. This is a bug. Please contact the developers.")
        }
        MessageType::InputEntry => RawEntryHeader::Input {
            is_completed: completed(),
        },
        MessageType::OutputEntry => RawEntryHeader::Output,
        MessageType::GetStateEntry => RawEntryHeader::GetState {
            is_completed: completed(),
        },
        MessageType::SetStateEntry => RawEntryHeader::SetState,
        MessageType::ClearStateEntry => RawEntryHeader::ClearState,
        MessageType::ClearAllStateEntry => RawEntryHeader::ClearAllState,
        MessageType::GetStateKeysEntry => RawEntryHeader::GetStateKeys {
            is_completed: completed(),
        },
        MessageType::SleepEntry => RawEntryHeader::Sleep {
            is_completed: completed(),
        },
        MessageType::InvokeEntry => RawEntryHeader::Invoke {
            is_completed: completed(),
        },
        MessageType::BackgroundInvokeEntry => RawEntryHeader::BackgroundInvoke,
        MessageType::AwakeableEntry => RawEntryHeader::Awakeable {
            is_completed: completed(),
        },
        MessageType::ResolveAwakeableEntry => RawEntryHeader::ResolveAwakeable,
        MessageType::RejectAwakeableEntry => RawEntryHeader::RejectAwakeable,
        MessageType::SideEffectEntry => RawEntryHeader::SideEffect {
            requires_ack: message_header
                .requires_ack()
                .expect("requires ack flag being present"),
        },
    }
}

fn raw_header_to_message_type(entry_header: &RawEntryHeader) -> MessageType {
    match entry_header {
        RawEntryHeader::Input { .. } => MessageType::InputEntry,
        RawEntryHeader::Output => MessageType::OutputEntry,
        RawEntryHeader::GetState { .. } => MessageType::GetStateEntry,
        RawEntryHeader::SetState => MessageType::SetStateEntry,
        RawEntryHeader::ClearState => MessageType::ClearStateEntry,
        RawEntryHeader::ClearAllState => MessageType::ClearAllStateEntry,
        RawEntryHeader::GetStateKeys { .. } => MessageType::GetStateKeysEntry,
        RawEntryHeader::Sleep { .. } => MessageType::SleepEntry,
        RawEntryHeader::Invoke { .. } => MessageType::InvokeEntry,
        RawEntryHeader::BackgroundInvoke => MessageType::BackgroundInvokeEntry,
        RawEntryHeader::Awakeable { .. } => MessageType::AwakeableEntry,
        RawEntryHeader::ResolveAwakeable => MessageType::ResolveAwakeableEntry,
        RawEntryHeader::RejectAwakeable => MessageType::RejectAwakeableEntry,
        RawEntryHeader::SideEffect { .. } => MessageType::SideEffectEntry,
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::pb;
    use prost::Message;
    use restate_sdk_types::journal::Completion;

    use restate_sdk_test_util::{assert, assert_eq, let_assert};

    #[test]
    fn fill_decoder_with_several_messages() {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        let expected_msg_0 = ProtocolMessage::new_start_message(
            "abc".into(),
            "inv-abc".into(),
            1,
            Bytes::new(),
            true,
            vec![],
        );
        let expected_msg_1: ProtocolMessage = RawEntry::new(
            RawEntryHeader::Input { is_completed: true },
            pb::InputEntryMessage {
                value: Bytes::from_static("input".as_bytes()),
            }
            .encode_to_vec()
            .into(),
        )
        .into();
        let expected_msg_2: ProtocolMessage = Completion {
            entry_index: 1,
            result: CompletionResult::Empty,
        }
        .into();

        decoder.push(encoder.encode(expected_msg_0.clone()));
        decoder.push(encoder.encode(expected_msg_1.clone()));
        decoder.push(encoder.encode(expected_msg_2.clone()));

        let (actual_msg_header_0, actual_msg_0) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header_0.message_type(), MessageType::Start);
        assert_eq!(actual_msg_0, expected_msg_0);

        let (actual_msg_header_1, actual_msg_1) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header_1.message_type(), MessageType::InputEntry);
        assert_eq!(actual_msg_header_1.completed(), Some(true));
        assert_eq!(actual_msg_1, expected_msg_1);

        let (actual_msg_header_2, actual_msg_2) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header_2.message_type(), MessageType::Completion);
        assert_eq!(actual_msg_2, expected_msg_2);

        assert!(decoder.consume_next().unwrap().is_none());
    }

    #[test]
    fn fill_decoder_with_partial_header() {
        partial_decoding_test(4)
    }

    #[test]
    fn fill_decoder_with_partial_body() {
        partial_decoding_test(10)
    }

    fn partial_decoding_test(split_index: usize) {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        let expected_msg: ProtocolMessage = RawEntry::new(
            RawEntryHeader::Input { is_completed: true },
            pb::InputEntryMessage {
                value: Bytes::from_static("input".as_bytes()),
            }
            .encode_to_vec()
            .into(),
        )
        .into();
        let expected_msg_encoded = encoder.encode(expected_msg.clone());

        decoder.push(expected_msg_encoded.slice(0..split_index));
        assert!(decoder.consume_next().unwrap().is_none());

        decoder.push(expected_msg_encoded.slice(split_index..));

        let (actual_msg_header, actual_msg) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header.message_type(), MessageType::InputEntry);
        assert_eq!(actual_msg_header.completed(), Some(true));
        assert_eq!(actual_msg, expected_msg);

        assert!(decoder.consume_next().unwrap().is_none());
    }

    #[test]
    fn hit_message_size_limit() {
        let mut decoder = Decoder::new((u8::MAX / 2) as usize, Some(u8::MAX as usize));

        let encoder = Encoder::new();
        let msg = encoder.encode(
            RawEntry::new(
                RawEntryHeader::Input { is_completed: true },
                pb::InputEntryMessage {
                    value: (0..=u8::MAX).collect::<Vec<_>>().into(),
                }
                .encode_to_vec()
                .into(),
            )
            .into(),
        );

        decoder.push(msg.clone());
        let_assert!(
            EncodingError::MessageSizeLimit(msg_size, limit) = decoder.consume_next().unwrap_err()
        );
        assert_eq!(msg_size, msg.len());
        assert_eq!(limit, u8::MAX as usize)
    }
}
