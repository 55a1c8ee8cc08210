//! The invocation drive loop: decodes the inbound message stream, buffers
//! the replay prefix, runs the user handler and decides between closing,
//! suspending and failing.

use crate::context::{Context, InvocationHandler};
use crate::invocation::InvocationMetadata;
use crate::machine::StateMachine;

use bytes::Bytes;
use bytestring::ByteString;
use futures::{Stream, StreamExt};
use restate_sdk_service_protocol::codec::ProtobufRawEntryCodec;
use restate_sdk_service_protocol::discovery::ProtocolMode;
use restate_sdk_service_protocol::message::{
    Decoder, Encoder, EncodingError, MessageHeader, ProtocolMessage,
};
use restate_sdk_types::errors::{codes, InvocationError};
use restate_sdk_types::identifiers::{EntryIndex, InvocationId};
use restate_sdk_types::journal::raw::RawEntryCodec;
use restate_sdk_types::journal::{Entry, EntryResult, EntryType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info_span, trace, Instrument};

pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub protocol_mode: ProtocolMode,
    /// Inactivity period after which a blocked bidi invocation suspends.
    pub suspension_timeout: Duration,
    /// Hard cap on the invocation lifetime once it stops making progress.
    pub abort_timeout: Duration,
    pub message_size_warning: usize,
    pub message_size_limit: Option<usize>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            protocol_mode: ProtocolMode::BidiStream,
            suspension_timeout: Duration::from_secs(60),
            abort_timeout: Duration::from_secs(60 * 60),
            message_size_warning: 10 * 1024 * 1024,
            message_size_limit: None,
        }
    }
}

/// This is needed to split the loops in multiple functions and have shortcircuiting.
enum TerminalLoopState {
    Closed(StateMachine, EntryResult),
    Suspended(StateMachine, Vec<EntryIndex>),
    Failed(Option<StateMachine>, InvocationError),
    /// The transport broke down mid-flight: tear down without emitting
    /// anything, the runtime will re-invoke.
    Torn,
}

enum ReadError {
    Encoding(EncodingError),
    Truncated,
    Transport(TransportError),
}

/// Drives one invocation over a byte stream transport. The adapter feeds raw
/// chunks in and drains encoded frames from the output channel.
pub struct InvocationDriver<S> {
    options: DriverOptions,
    service_name: ByteString,
    handler_name: ByteString,
    handler: Arc<dyn InvocationHandler>,
    input: S,
    input_closed: bool,
    decoder: Decoder,
    output_tx: mpsc::UnboundedSender<Bytes>,
}

impl<S> InvocationDriver<S>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    pub fn new(
        options: DriverOptions,
        service_name: impl Into<ByteString>,
        handler_name: impl Into<ByteString>,
        handler: Arc<dyn InvocationHandler>,
        input: S,
        output_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        let decoder = Decoder::new(options.message_size_warning, options.message_size_limit);
        Self {
            options,
            service_name: service_name.into(),
            handler_name: handler_name.into(),
            handler,
            input,
            input_closed: false,
            decoder,
            output_tx,
        }
    }

    pub async fn run(mut self) {
        let span = info_span!(
            "sdk_invocation",
            rpc.service = %self.service_name,
            rpc.method = %self.handler_name,
            restate.protocol.mode = ?self.options.protocol_mode,
        );
        let state = self.run_internal().instrument(span).await;

        match state {
            TerminalLoopState::Closed(machine, result) => {
                if let Err(err) = machine.sys_output(result) {
                    machine.emit_output_failure(&err);
                }
                machine.emit_end();
            }
            TerminalLoopState::Suspended(machine, entry_indexes) => {
                machine.emit_suspension(entry_indexes);
            }
            TerminalLoopState::Failed(Some(machine), err) => {
                machine.fail(err.clone());
                machine.emit_output_failure(&err);
                machine.emit_end();
            }
            TerminalLoopState::Failed(None, err) => {
                // The handshake failed, there is no machine to speak through
                let encoder = Encoder::new();
                let raw = ProtobufRawEntryCodec::serialize(Entry::output(EntryResult::Failure(
                    err.code(),
                    err.message().to_owned().into(),
                )));
                let _ = self
                    .output_tx
                    .send(encoder.encode(ProtocolMessage::UnparsedEntry(raw)));
                let _ = self.output_tx.send(encoder.encode(ProtocolMessage::new_end()));
            }
            TerminalLoopState::Torn => {}
        }
    }

    async fn run_internal(&mut self) -> TerminalLoopState {
        // --- Handshake: start message first, then the input entry
        let start = match self.read_next_message().await {
            Ok(Some((_, ProtocolMessage::Start(start)))) => start,
            Ok(Some((header, _))) => {
                return TerminalLoopState::Failed(
                    None,
                    InvocationError::protocol_violation(format!(
                        "expected the start message, found {:?}",
                        header.message_type()
                    )),
                )
            }
            Ok(None) => {
                return TerminalLoopState::Failed(
                    None,
                    InvocationError::protocol_violation(
                        "the input stream closed before the start message",
                    ),
                )
            }
            Err(err) => return Self::handshake_read_failure(err),
        };
        if start.known_entries == 0 {
            return TerminalLoopState::Failed(
                None,
                InvocationError::protocol_violation(
                    "the replay prefix must contain at least the input entry",
                ),
            );
        }

        let input_value = match self.read_next_message().await {
            Ok(Some((_, ProtocolMessage::UnparsedEntry(raw))))
                if raw.header.ty() == EntryType::Input =>
            {
                match ProtobufRawEntryCodec::deserialize(&raw) {
                    Ok(Entry::Input(entry)) => entry.value,
                    Ok(_) => unreachable!("the header determines the entry variant"),
                    Err(err) => {
                        return TerminalLoopState::Failed(
                            None,
                            InvocationError::protocol_violation(format!(
                                "cannot decode the input entry: {err}"
                            )),
                        )
                    }
                }
            }
            Ok(Some(_)) => {
                return TerminalLoopState::Failed(
                    None,
                    InvocationError::protocol_violation(
                        "the first journal entry must be the input entry",
                    ),
                )
            }
            Ok(None) => {
                return TerminalLoopState::Failed(
                    None,
                    InvocationError::protocol_violation(
                        "the input stream closed before the input entry",
                    ),
                )
            }
            Err(err) => return Self::handshake_read_failure(err),
        };

        let meta = InvocationMetadata {
            id: InvocationId::new(start.id.clone(), start.debug_id.clone()),
            service_name: self.service_name.clone(),
            handler_name: self.handler_name.clone(),
            key: start.key.clone(),
            mode: self.options.protocol_mode,
        };
        debug!(
            restate.invocation.id = %meta.id,
            restate.journal.known_entries = start.known_entries,
            "Invocation started"
        );
        let machine = StateMachine::create(meta.clone(), &start, self.output_tx.clone());

        // --- Buffer the rest of the replay prefix before running the handler,
        // so that journal operations never have to wait for the wire
        while !machine.replay_complete() {
            match self.read_next_message().await {
                Ok(Some((_, msg))) => {
                    if let Err(err) = dispatch_replay(&machine, msg) {
                        return TerminalLoopState::Failed(Some(machine), err);
                    }
                }
                Ok(None) => {
                    return TerminalLoopState::Failed(
                        Some(machine),
                        InvocationError::protocol_violation(
                            "the input stream closed before the replay prefix was complete",
                        ),
                    )
                }
                Err(ReadError::Encoding(e)) => {
                    return TerminalLoopState::Failed(
                        Some(machine),
                        InvocationError::protocol_violation(e),
                    )
                }
                Err(ReadError::Truncated) => {
                    return TerminalLoopState::Failed(
                        Some(machine),
                        InvocationError::protocol_violation("truncated message stream"),
                    )
                }
                Err(ReadError::Transport(_)) => return TerminalLoopState::Torn,
            }
        }

        // --- Run the handler
        let ctx = Context::new(machine.clone(), meta);
        let mut handler_fut = self.handler.invoke(ctx, input_value);

        let suspension_timeout = self.options.suspension_timeout;
        let abort_deadline = tokio::time::sleep(self.options.abort_timeout);
        tokio::pin!(abort_deadline);

        loop {
            if let Some(err) = machine.fatal() {
                return TerminalLoopState::Failed(Some(machine), err);
            }

            let input_open = !self.input_closed;
            tokio::select! {
                biased;
                handler_result = &mut handler_fut => {
                    // A fatal error may have been swallowed by user code
                    if let Some(err) = machine.fatal() {
                        return TerminalLoopState::Failed(Some(machine), err);
                    }
                    let result = match handler_result {
                        Ok(value) => EntryResult::Success(value),
                        Err(err) => EntryResult::Failure(err.code(), err.message().to_owned().into()),
                    };
                    return TerminalLoopState::Closed(machine, result);
                }
                read = self.read_next_message(), if input_open => {
                    match read {
                        Ok(Some((_, msg))) => {
                            if let Err(err) = dispatch(&machine, msg) {
                                machine.fail(err);
                            }
                        }
                        // Input exhausted, the suspension check below decides
                        Ok(None) => {}
                        Err(ReadError::Encoding(e)) => {
                            machine.fail(InvocationError::protocol_violation(e));
                        }
                        Err(ReadError::Truncated) => {
                            machine.fail(InvocationError::protocol_violation(
                                "truncated message stream",
                            ));
                        }
                        Err(ReadError::Transport(_)) => return TerminalLoopState::Torn,
                    }
                }
                _ = tokio::time::sleep(suspension_timeout) => {
                    if machine.can_suspend() {
                        debug!("Inactivity detected, going to suspend invocation");
                        return TerminalLoopState::Suspended(machine.clone(), machine.suspension_indexes());
                    }
                }
                _ = &mut abort_deadline => {
                    return TerminalLoopState::Failed(
                        Some(machine),
                        InvocationError::new(codes::ABORTED, "inactivity detected, aborting invocation"),
                    );
                }
            }

            if self.input_closed && machine.can_suspend() {
                return TerminalLoopState::Suspended(machine.clone(), machine.suspension_indexes());
            }
        }
    }

    fn handshake_read_failure(err: ReadError) -> TerminalLoopState {
        match err {
            ReadError::Encoding(e) => {
                TerminalLoopState::Failed(None, InvocationError::protocol_violation(e))
            }
            ReadError::Truncated => TerminalLoopState::Failed(
                None,
                InvocationError::protocol_violation("truncated message stream"),
            ),
            ReadError::Transport(_) => TerminalLoopState::Torn,
        }
    }

    /// Returns the next decoded message, reading more chunks from the
    /// transport when the internal buffer runs dry. `Ok(None)` means the
    /// input is exhausted.
    async fn read_next_message(
        &mut self,
    ) -> Result<Option<(MessageHeader, ProtocolMessage)>, ReadError> {
        loop {
            if let Some(msg) = self.decoder.consume_next().map_err(ReadError::Encoding)? {
                trace!(restate.protocol.message_header = ?msg.0, "Received message");
                return Ok(Some(msg));
            }
            if self.input_closed {
                if self.decoder.has_remaining() {
                    return Err(ReadError::Truncated);
                }
                return Ok(None);
            }
            match self.input.next().await {
                Some(Ok(buf)) => self.decoder.push(buf),
                Some(Err(e)) => {
                    self.input_closed = true;
                    return Err(ReadError::Transport(e));
                }
                None => self.input_closed = true,
            }
        }
    }
}

fn dispatch_replay(machine: &StateMachine, msg: ProtocolMessage) -> Result<(), InvocationError> {
    match msg {
        ProtocolMessage::UnparsedEntry(raw) => machine.push_replay(raw),
        ProtocolMessage::Completion(c) => machine.notify_completion(c.into()),
        ProtocolMessage::Ack(a) => machine.notify_ack(a.entry_index),
        other => Err(unexpected_message(&other)),
    }
}

fn dispatch(machine: &StateMachine, msg: ProtocolMessage) -> Result<(), InvocationError> {
    match msg {
        ProtocolMessage::Completion(c) => machine.notify_completion(c.into()),
        ProtocolMessage::Ack(a) => machine.notify_ack(a.entry_index),
        ProtocolMessage::UnparsedEntry(raw) => Err(InvocationError::protocol_violation(format!(
            "received journal entry '{}' outside of the replay prefix",
            raw.header.ty()
        ))),
        other => Err(unexpected_message(&other)),
    }
}

fn unexpected_message(msg: &ProtocolMessage) -> InvocationError {
    let name = match msg {
        ProtocolMessage::Start(_) => "start",
        ProtocolMessage::Completion(_) => "completion",
        ProtocolMessage::Suspension(_) => "suspension",
        ProtocolMessage::End(_) => "end",
        ProtocolMessage::Ack(_) => "ack",
        ProtocolMessage::UnparsedEntry(_) => "entry",
    };
    InvocationError::protocol_violation(format!("received unexpected '{name}' message"))
}
