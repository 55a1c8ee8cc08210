//! The shared state of one invocation: journal, resolver table, eager state
//! and the fatal error path. The driver and the context are its only two
//! entrances; the lock is never held across an await point.

use crate::invocation::{EagerGet, EagerState, InvocationMetadata};
use crate::journal::{check_entry_matches, Journal};

use bytes::Bytes;
use prost::Message;
use restate_sdk_service_protocol::awakeable_id::AwakeableIdentifier;
use restate_sdk_service_protocol::codec::ProtobufRawEntryCodec;
use restate_sdk_service_protocol::discovery::ProtocolMode;
use restate_sdk_service_protocol::message::{Encoder, ProtocolMessage};
use restate_sdk_service_protocol::pb;
use restate_sdk_types::errors::{codes, InvocationError};
use restate_sdk_types::identifiers::EntryIndex;
use restate_sdk_types::journal::raw::{RawEntryCodec, RawEntryHeader};
use restate_sdk_types::journal::{
    Completion, CompletionResult, Entry, EntryResult, EntryType, GetStateKeysResult,
    GetStateResult, InvokeRequest, SleepResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Replaying,
    Processing,
    Suspended,
    Closed,
}

/// Result of applying a context operation to the journal.
#[derive(Debug)]
pub(crate) struct Applied {
    pub(crate) index: EntryIndex,
    pub(crate) outcome: OpOutcome,
}

#[derive(Debug)]
pub(crate) enum OpOutcome {
    /// The result was already known at append or replay time.
    Ready(CompletionResult),
    /// The runtime owes a completion for this entry.
    Pending(oneshot::Receiver<CompletionResult>),
}

impl Applied {
    fn ready(index: EntryIndex, result: CompletionResult) -> Self {
        Applied {
            index,
            outcome: OpOutcome::Ready(result),
        }
    }

    fn pending(index: EntryIndex, rx: oneshot::Receiver<CompletionResult>) -> Self {
        Applied {
            index,
            outcome: OpOutcome::Pending(rx),
        }
    }
}

pub(crate) enum SideEffectBegin {
    /// The journal already holds the result of this side effect.
    Replayed(EntryResult),
    /// The journal holds a backoff sleep from a previous attempt of this side
    /// effect; consume it before probing again.
    ReplayedBackoff(Applied),
    /// The journal is exhausted, execute the closure.
    Execute,
}

struct MachineInner {
    meta: InvocationMetadata,
    phase: Phase,
    journal: Journal,
    eager: EagerState,
    resolvers: HashMap<EntryIndex, oneshot::Sender<CompletionResult>>,
    /// A side effect closure is currently executing. Context operations are
    /// forbidden and the invocation must not suspend while this is set.
    side_effect_executing: bool,
    fatal: Option<InvocationError>,
    output_tx: mpsc::UnboundedSender<Bytes>,
    encoder: Encoder,
    closed: bool,
}

#[derive(Clone)]
pub(crate) struct StateMachine {
    inner: Arc<Mutex<MachineInner>>,
}

impl StateMachine {
    pub(crate) fn create(
        meta: InvocationMetadata,
        start: &pb::StartMessage,
        output_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        let journal = Journal::new(start.known_entries);
        let phase = if journal.is_replaying() {
            Phase::Replaying
        } else {
            Phase::Processing
        };
        StateMachine {
            inner: Arc::new(Mutex::new(MachineInner {
                meta,
                phase,
                journal,
                eager: EagerState::new(
                    !start.partial_state,
                    start
                        .state_map
                        .iter()
                        .map(|e| (e.key.clone(), e.value.clone())),
                ),
                resolvers: HashMap::new(),
                side_effect_executing: false,
                fatal: None,
                output_tx,
                encoder: Encoder::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MachineInner> {
        self.inner.lock().expect("machine lock is never poisoned")
    }

    // --- Wire input, called by the driver

    pub(crate) fn push_replay(&self, raw: restate_sdk_types::journal::raw::RawEntry) -> Result<(), InvocationError> {
        self.lock().journal.push_replay(raw)
    }

    pub(crate) fn replay_complete(&self) -> bool {
        self.lock().journal.replay_complete()
    }

    pub(crate) fn notify_completion(&self, completion: Completion) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        let index = completion.entry_index;
        if let Some(tx) = inner.resolvers.remove(&index) {
            if !inner.journal.complete(index) {
                return Err(InvocationError::protocol_violation(format!(
                    "double completion for journal entry {index}"
                )));
            }
            // The receiver may be gone if user code dropped the future
            let _ = tx.send(completion.result);
            return Ok(());
        }
        if inner.journal.try_complete_queued(index, completion.result)? {
            return Ok(());
        }
        Err(InvocationError::protocol_violation(format!(
            "completion for journal entry {index}, which has not been appended or was already completed"
        )))
    }

    pub(crate) fn notify_ack(&self, entry_index: EntryIndex) -> Result<(), InvocationError> {
        self.notify_completion(Completion::new(entry_index, CompletionResult::Ack))
    }

    // --- Failure & lifecycle

    pub(crate) fn fatal(&self) -> Option<InvocationError> {
        self.lock().fatal.clone()
    }

    pub(crate) fn fail(&self, err: InvocationError) {
        self.lock().fail(err)
    }

    pub(crate) fn can_suspend(&self) -> bool {
        let inner = self.lock();
        !inner.side_effect_executing && inner.journal.has_uncompleted()
    }

    pub(crate) fn suspension_indexes(&self) -> Vec<EntryIndex> {
        self.lock().journal.uncompleted_indexes()
    }

    pub(crate) fn emit_suspension(&self, entry_indexes: Vec<EntryIndex>) {
        let mut inner = self.lock();
        debug!(restate.journal.indexes = ?entry_indexes, "Suspending invocation");
        inner.emit(ProtocolMessage::new_suspension(entry_indexes));
        inner.phase = Phase::Suspended;
        inner.closed = true;
    }

    pub(crate) fn emit_end(&self) {
        let mut inner = self.lock();
        inner.emit(ProtocolMessage::new_end());
        inner.phase = Phase::Closed;
        inner.closed = true;
    }

    /// Emits an output entry carrying a terminal failure, outside of the
    /// journal bookkeeping. Used on the fatal path, where the journal state
    /// can no longer be trusted.
    pub(crate) fn emit_output_failure(&self, err: &InvocationError) {
        let mut inner = self.lock();
        let raw = ProtobufRawEntryCodec::serialize(Entry::output(EntryResult::Failure(
            err.code(),
            err.message().to_owned().into(),
        )));
        inner.emit(ProtocolMessage::UnparsedEntry(raw));
    }

    // --- Journal operations, called by the context

    pub(crate) fn sys_get_state(&self, key: Bytes) -> Result<Applied, InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("get state")?;
        if inner.journal.is_replaying() {
            let (index, actual) = inner.consume_replay(&Entry::get_state(key.clone(), None))?;
            let Entry::GetState(entry) = actual else {
                unreachable!()
            };
            Ok(match entry.value {
                Some(GetStateResult::Result(b)) => {
                    inner.eager.set(key, b.clone());
                    Applied::ready(index, CompletionResult::Success(b))
                }
                Some(GetStateResult::Empty) => Applied::ready(index, CompletionResult::Empty),
                Some(GetStateResult::Failure(code, message)) => {
                    Applied::ready(index, CompletionResult::Failure(code, message))
                }
                None => {
                    let rx = inner.register_resolver(index);
                    Applied::pending(index, rx)
                }
            })
        } else {
            Ok(match inner.eager.get(&key) {
                EagerGet::Value(b) => {
                    let (index, _) = inner.append_live(
                        Entry::get_state(key, Some(GetStateResult::Result(b.clone()))),
                        false,
                    );
                    Applied::ready(index, CompletionResult::Success(b))
                }
                EagerGet::Absent => {
                    let (index, _) =
                        inner.append_live(Entry::get_state(key, Some(GetStateResult::Empty)), false);
                    Applied::ready(index, CompletionResult::Empty)
                }
                EagerGet::Unknown => {
                    let (index, rx) = inner.append_live(Entry::get_state(key, None), true);
                    Applied::pending(index, rx.expect("pending append registers a resolver"))
                }
            })
        }
    }

    pub(crate) fn sys_set_state(&self, key: Bytes, value: Bytes) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("set state")?;
        if inner.journal.is_replaying() {
            inner.consume_replay(&Entry::set_state(key.clone(), value.clone()))?;
        } else {
            inner.append_live(Entry::set_state(key.clone(), value.clone()), false);
        }
        inner.eager.set(key, value);
        Ok(())
    }

    pub(crate) fn sys_clear_state(&self, key: Bytes) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("clear state")?;
        if inner.journal.is_replaying() {
            inner.consume_replay(&Entry::clear_state(key.clone()))?;
        } else {
            inner.append_live(Entry::clear_state(key.clone()), false);
        }
        inner.eager.clear(&key);
        Ok(())
    }

    pub(crate) fn sys_clear_all_state(&self) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("clear all state")?;
        if inner.journal.is_replaying() {
            inner.consume_replay(&Entry::ClearAllState)?;
        } else {
            inner.append_live(Entry::ClearAllState, false);
        }
        inner.eager.clear_all();
        Ok(())
    }

    pub(crate) fn sys_get_state_keys(&self) -> Result<Applied, InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("get state keys")?;
        if inner.journal.is_replaying() {
            let (index, actual) = inner.consume_replay(&Entry::get_state_keys(None))?;
            let Entry::GetStateKeys(entry) = actual else {
                unreachable!()
            };
            Ok(match entry.value {
                Some(GetStateKeysResult::Result(keys)) => {
                    Applied::ready(index, CompletionResult::Success(encode_state_keys(keys)))
                }
                Some(GetStateKeysResult::Failure(code, message)) => {
                    Applied::ready(index, CompletionResult::Failure(code, message))
                }
                None => {
                    let rx = inner.register_resolver(index);
                    Applied::pending(index, rx)
                }
            })
        } else {
            Ok(match inner.eager.keys() {
                Some(keys) => {
                    let (index, _) = inner.append_live(
                        Entry::get_state_keys(Some(GetStateKeysResult::Result(keys.clone()))),
                        false,
                    );
                    Applied::ready(index, CompletionResult::Success(encode_state_keys(keys)))
                }
                None => {
                    let (index, rx) = inner.append_live(Entry::get_state_keys(None), true);
                    Applied::pending(index, rx.expect("pending append registers a resolver"))
                }
            })
        }
    }

    pub(crate) fn sys_sleep(&self, wake_up_time: u64) -> Result<Applied, InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("sleep")?;
        inner.do_sleep(wake_up_time)
    }

    pub(crate) fn sys_invoke(&self, request: InvokeRequest) -> Result<Applied, InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("call")?;
        if inner.journal.is_replaying() {
            let (index, actual) = inner.consume_replay(&Entry::invoke(request, None))?;
            let Entry::Invoke(entry) = actual else {
                unreachable!()
            };
            Ok(match entry.result {
                Some(EntryResult::Success(b)) => Applied::ready(index, CompletionResult::Success(b)),
                Some(EntryResult::Failure(code, message)) => {
                    Applied::ready(index, CompletionResult::Failure(code, message))
                }
                None => {
                    let rx = inner.register_resolver(index);
                    Applied::pending(index, rx)
                }
            })
        } else {
            let (index, rx) = inner.append_live(Entry::invoke(request, None), true);
            Ok(Applied::pending(
                index,
                rx.expect("pending append registers a resolver"),
            ))
        }
    }

    pub(crate) fn sys_background_invoke(
        &self,
        op_name: &'static str,
        request: InvokeRequest,
        invoke_time: u64,
    ) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed(op_name)?;
        if inner.journal.is_replaying() {
            inner.consume_replay(&Entry::background_invoke(request, invoke_time))?;
        } else {
            inner.append_live(Entry::background_invoke(request, invoke_time), false);
        }
        Ok(())
    }

    pub(crate) fn sys_awakeable(&self) -> Result<(String, Applied), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("awakeable")?;
        let invocation_id = inner.meta.id.as_bytes().clone();
        if inner.journal.is_replaying() {
            let (index, actual) = inner.consume_replay(&Entry::awakeable(None))?;
            let Entry::Awakeable(entry) = actual else {
                unreachable!()
            };
            let id = AwakeableIdentifier::new(invocation_id, index).to_string();
            Ok(match entry.result {
                Some(EntryResult::Success(b)) => {
                    (id, Applied::ready(index, CompletionResult::Success(b)))
                }
                Some(EntryResult::Failure(code, message)) => (
                    id,
                    Applied::ready(index, CompletionResult::Failure(code, message)),
                ),
                None => {
                    let rx = inner.register_resolver(index);
                    (id, Applied::pending(index, rx))
                }
            })
        } else {
            let (index, rx) = inner.append_live(Entry::awakeable(None), true);
            let id = AwakeableIdentifier::new(invocation_id, index).to_string();
            Ok((
                id,
                Applied::pending(index, rx.expect("pending append registers a resolver")),
            ))
        }
    }

    pub(crate) fn sys_resolve_awakeable(
        &self,
        id: String,
        value: Bytes,
    ) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("resolve awakeable")?;
        let entry = Entry::resolve_awakeable(id, value);
        if inner.journal.is_replaying() {
            inner.consume_replay(&entry)?;
        } else {
            inner.append_live(entry, false);
        }
        Ok(())
    }

    pub(crate) fn sys_reject_awakeable(
        &self,
        id: String,
        message: String,
    ) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_op_allowed("reject awakeable")?;
        let entry = Entry::reject_awakeable(id, codes::UNKNOWN, message);
        if inner.journal.is_replaying() {
            inner.consume_replay(&entry)?;
        } else {
            inner.append_live(entry, false);
        }
        Ok(())
    }

    pub(crate) fn sys_output(&self, result: EntryResult) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_live()?;
        let entry = Entry::output(result);
        if inner.journal.is_replaying() {
            inner.consume_replay(&entry)?;
        } else {
            inner.append_live(entry, false);
        }
        Ok(())
    }

    // --- Side effects

    /// Reentrancy guard, checked synchronously when a context operation is
    /// created. See [`MachineInner::check_op_allowed`].
    pub(crate) fn check_not_in_side_effect(
        &self,
        op_name: &'static str,
    ) -> Result<(), InvocationError> {
        let inner = self.lock();
        inner.check_live()?;
        inner.check_side_effect_guard(op_name)
    }

    pub(crate) fn begin_side_effect(&self) -> Result<SideEffectBegin, InvocationError> {
        let mut inner = self.lock();
        inner.check_live()?;
        if inner.journal.is_replaying() {
            match inner.journal.peek_replay_ty() {
                Some(EntryType::SideEffect) => {
                    let (_, actual) = inner.take_replay_entry()?;
                    let Entry::SideEffect(entry) = actual else {
                        unreachable!()
                    };
                    Ok(SideEffectBegin::Replayed(entry.result))
                }
                Some(EntryType::Sleep) => {
                    // A backoff sleep journaled by a previous attempt
                    let applied = inner.do_sleep(0)?;
                    Ok(SideEffectBegin::ReplayedBackoff(applied))
                }
                Some(other) => {
                    let err = InvocationError::journal_mismatch(format!(
                        "journal mismatch: the invocation tried to execute '{}', but the journal recorded '{}'",
                        EntryType::SideEffect,
                        other
                    ));
                    inner.fail(err.clone());
                    Err(err)
                }
                None => Err(InvocationError::internal(
                    "the replay prefix is expected to be fully buffered",
                )),
            }
        } else {
            inner.side_effect_executing = true;
            Ok(SideEffectBegin::Execute)
        }
    }

    pub(crate) fn pause_side_effect(&self) {
        self.lock().side_effect_executing = false;
    }

    pub(crate) fn resume_side_effect(&self) -> Result<(), InvocationError> {
        let mut inner = self.lock();
        inner.check_live()?;
        inner.side_effect_executing = true;
        Ok(())
    }

    pub(crate) fn end_side_effect(&self, result: EntryResult) -> Result<Applied, InvocationError> {
        let mut inner = self.lock();
        inner.check_live()?;
        debug_assert!(!inner.journal.is_replaying());
        inner.side_effect_executing = false;
        let pending = inner.meta.mode == ProtocolMode::BidiStream;
        let (index, rx) = inner.append_live(Entry::side_effect(result), pending);
        Ok(match rx {
            Some(rx) => Applied::pending(index, rx),
            None => Applied::ready(index, CompletionResult::Ack),
        })
    }
}

impl MachineInner {
    fn check_live(&self) -> Result<(), InvocationError> {
        match &self.fatal {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_side_effect_guard(&self, op_name: &'static str) -> Result<(), InvocationError> {
        if self.side_effect_executing {
            Err(InvocationError::new(
                codes::INTERNAL,
                format!("You cannot do {op_name} calls from within a side effect."),
            ))
        } else {
            Ok(())
        }
    }

    fn check_op_allowed(&self, op_name: &'static str) -> Result<(), InvocationError> {
        self.check_live()?;
        self.check_side_effect_guard(op_name)
    }

    fn fail(&mut self, err: InvocationError) {
        if self.fatal.is_none() {
            debug!(
                restate.invocation.id = %self.meta.id,
                restate.invocation.phase = ?self.phase,
                "Invocation failed: {err}"
            );
            self.fatal = Some(err);
        }
        // Dropping the senders wakes every future still awaiting a completion
        self.resolvers.clear();
    }

    fn emit(&mut self, msg: ProtocolMessage) {
        if self.closed {
            return;
        }
        let buf = self.encoder.encode(msg);
        // The adapter draining the channel may be gone already
        let _ = self.output_tx.send(buf);
    }

    fn register_resolver(&mut self, index: EntryIndex) -> oneshot::Receiver<CompletionResult> {
        self.journal.note_pending(index);
        let (tx, rx) = oneshot::channel();
        self.resolvers.insert(index, tx);
        rx
    }

    /// Pops and deserializes the next replay entry, without matching it.
    fn take_replay_entry(&mut self) -> Result<(EntryIndex, Entry), InvocationError> {
        let (index, raw) = self.journal.pop_replay().ok_or_else(|| {
            InvocationError::internal("the replay prefix is expected to be fully buffered")
        })?;
        let actual = ProtobufRawEntryCodec::deserialize(&raw).map_err(|e| {
            let err = InvocationError::protocol_violation(format!(
                "cannot deserialize replayed journal entry {index}: {e}"
            ));
            self.fail(err.clone());
            err
        })?;
        if !self.journal.is_replaying() {
            self.phase = Phase::Processing;
            debug!("Journal replay completed");
        }
        Ok((index, actual))
    }

    /// Consumes the next replay entry and verifies it matches the operation
    /// the user performed. A mismatch is fatal.
    fn consume_replay(&mut self, expected: &Entry) -> Result<(EntryIndex, Entry), InvocationError> {
        let (index, actual) = self.take_replay_entry()?;
        if let Err(err) = check_entry_matches(expected, &actual) {
            self.fail(err.clone());
            return Err(err);
        }
        Ok((index, actual))
    }

    fn append_live(
        &mut self,
        entry: Entry,
        pending: bool,
    ) -> (EntryIndex, Option<oneshot::Receiver<CompletionResult>>) {
        let ty = entry.ty();
        let index = self.journal.append(pending);
        let mut raw = ProtobufRawEntryCodec::serialize(entry);
        if let RawEntryHeader::SideEffect { requires_ack } = &mut raw.header {
            *requires_ack = pending;
        }
        trace!(
            restate.journal.index = index,
            restate.journal.entry_type = %ty,
            "Journaled new entry"
        );
        self.emit(ProtocolMessage::UnparsedEntry(raw));
        let rx = if pending {
            let (tx, rx) = oneshot::channel();
            self.resolvers.insert(index, tx);
            Some(rx)
        } else {
            None
        };
        (index, rx)
    }

    fn do_sleep(&mut self, wake_up_time: u64) -> Result<Applied, InvocationError> {
        if self.journal.is_replaying() {
            let (index, actual) = self.consume_replay(&Entry::sleep(wake_up_time, None))?;
            let Entry::Sleep(entry) = actual else {
                unreachable!()
            };
            Ok(match entry.result {
                Some(SleepResult::Fired) => Applied::ready(index, CompletionResult::Empty),
                Some(SleepResult::Failure(code, message)) => {
                    Applied::ready(index, CompletionResult::Failure(code, message))
                }
                None => {
                    let rx = self.register_resolver(index);
                    Applied::pending(index, rx)
                }
            })
        } else {
            let (index, rx) = self.append_live(Entry::sleep(wake_up_time, None), true);
            Ok(Applied::pending(
                index,
                rx.expect("pending append registers a resolver"),
            ))
        }
    }
}

fn encode_state_keys(keys: Vec<Bytes>) -> Bytes {
    pb::get_state_keys_entry_message::StateKeys { keys }
        .encode_to_vec()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytestring::ByteString;
    use restate_sdk_service_protocol::message::{Decoder, MessageType};
    use restate_sdk_types::identifiers::InvocationId;
    use restate_sdk_types::journal::raw::RawEntry;

    fn test_meta(mode: ProtocolMode) -> InvocationMetadata {
        InvocationMetadata {
            id: InvocationId::new(Bytes::from_static(b"test-id"), "inv-test"),
            service_name: ByteString::from_static("Greeter"),
            handler_name: ByteString::from_static("greet"),
            key: Bytes::new(),
            mode,
        }
    }

    fn test_machine(
        mode: ProtocolMode,
        known_entries: u32,
        partial_state: bool,
        state_map: Vec<(Bytes, Bytes)>,
    ) -> (StateMachine, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let start = pb::StartMessage {
            id: Bytes::from_static(b"test-id"),
            debug_id: "inv-test".to_string(),
            known_entries,
            key: Bytes::new(),
            partial_state,
            state_map: state_map
                .into_iter()
                .map(|(key, value)| pb::start_message::StateEntry { key, value })
                .collect(),
        };
        (StateMachine::create(test_meta(mode), &start, tx), rx)
    }

    fn next_emitted(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> (MessageType, ProtocolMessage) {
        let buf = rx.try_recv().expect("a message was emitted");
        let mut decoder = Decoder::default();
        decoder.push(buf);
        let (header, msg) = decoder
            .consume_next()
            .expect("emitted frame decodes")
            .expect("emitted frame is complete");
        (header.message_type(), msg)
    }

    #[test]
    fn eager_get_state_is_journaled_completed() {
        let (machine, mut rx) = test_machine(
            ProtocolMode::RequestResponse,
            1,
            false,
            vec![(Bytes::from_static(b"greet"), Bytes::from_static(b"till"))],
        );

        let applied = machine.sys_get_state(Bytes::from_static(b"greet")).unwrap();
        assert_eq!(applied.index, 1);
        assert!(
            matches!(applied.outcome, OpOutcome::Ready(CompletionResult::Success(b)) if b == "till")
        );

        let (ty, msg) = next_emitted(&mut rx);
        assert_eq!(ty, MessageType::GetStateEntry);
        let ProtocolMessage::UnparsedEntry(raw) = msg else {
            panic!("expected an entry message")
        };
        assert_eq!(raw.header.is_completed(), Some(true));
    }

    #[test]
    fn complete_state_get_of_absent_key_is_empty() {
        let (machine, _rx) = test_machine(ProtocolMode::RequestResponse, 1, false, vec![]);

        let applied = machine.sys_get_state(Bytes::from_static(b"missing")).unwrap();
        assert!(matches!(
            applied.outcome,
            OpOutcome::Ready(CompletionResult::Empty)
        ));
    }

    #[test]
    fn partial_state_get_awaits_a_completion() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 1, true, vec![]);

        let applied = machine.sys_get_state(Bytes::from_static(b"k")).unwrap();
        let OpOutcome::Pending(mut completion_rx) = applied.outcome else {
            panic!("expected a pending op")
        };

        machine
            .notify_completion(Completion::new(
                applied.index,
                CompletionResult::Success(Bytes::from_static(b"v")),
            ))
            .unwrap();
        assert!(
            matches!(completion_rx.try_recv(), Ok(CompletionResult::Success(b)) if b == "v")
        );
    }

    #[test]
    fn double_completion_is_a_protocol_violation() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 1, true, vec![]);

        let applied = machine.sys_get_state(Bytes::from_static(b"k")).unwrap();
        machine
            .notify_completion(Completion::new(applied.index, CompletionResult::Empty))
            .unwrap();
        let err = machine
            .notify_completion(Completion::new(applied.index, CompletionResult::Empty))
            .unwrap_err();
        assert_eq!(err.code(), codes::PROTOCOL_VIOLATION);
    }

    #[test]
    fn completion_for_an_entry_not_yet_appended_is_a_protocol_violation() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 1, true, vec![]);

        let err = machine
            .notify_completion(Completion::new(42, CompletionResult::Empty))
            .unwrap_err();
        assert_eq!(err.code(), codes::PROTOCOL_VIOLATION);
    }

    #[test]
    fn replay_kind_mismatch_is_fatal() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 2, true, vec![]);
        machine
            .push_replay(ProtobufRawEntryCodec::serialize(Entry::invoke(
                InvokeRequest::new("Greeter", "greet", Bytes::new()),
                None,
            )))
            .unwrap();

        let err = machine
            .sys_get_state(Bytes::from_static(b"k"))
            .unwrap_err();
        assert_eq!(err.code(), codes::JOURNAL_MISMATCH);

        // The machine is now poisoned: every further op fails the same way
        let err = machine.sys_sleep(123).unwrap_err();
        assert_eq!(err.code(), codes::JOURNAL_MISMATCH);
        assert!(machine.fatal().is_some());
    }

    #[test]
    fn replayed_completed_entry_resolves_immediately() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 2, true, vec![]);
        machine
            .push_replay(ProtobufRawEntryCodec::serialize(Entry::get_state(
                Bytes::from_static(b"k"),
                Some(GetStateResult::Result(Bytes::from_static(b"v"))),
            )))
            .unwrap();

        let applied = machine.sys_get_state(Bytes::from_static(b"k")).unwrap();
        assert_eq!(applied.index, 1);
        assert!(
            matches!(applied.outcome, OpOutcome::Ready(CompletionResult::Success(b)) if b == "v")
        );
    }

    #[test]
    fn completion_can_target_a_queued_replay_entry() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 2, true, vec![]);
        machine
            .push_replay(ProtobufRawEntryCodec::serialize(Entry::sleep(1000, None)))
            .unwrap();

        // The completion arrives before user code consumed the entry
        machine
            .notify_completion(Completion::new(1, CompletionResult::Empty))
            .unwrap();

        let applied = machine.sys_sleep(1000).unwrap();
        assert!(matches!(
            applied.outcome,
            OpOutcome::Ready(CompletionResult::Empty)
        ));
    }

    #[test]
    fn side_effect_requires_ack_in_bidi_mode() {
        let (machine, mut rx) = test_machine(ProtocolMode::BidiStream, 1, true, vec![]);

        assert!(matches!(
            machine.begin_side_effect().unwrap(),
            SideEffectBegin::Execute
        ));
        let applied = machine
            .end_side_effect(EntryResult::Success(Bytes::from_static(b"res")))
            .unwrap();
        let OpOutcome::Pending(mut ack_rx) = applied.outcome else {
            panic!("expected the side effect to await an ack")
        };

        let (ty, msg) = next_emitted(&mut rx);
        assert_eq!(ty, MessageType::SideEffectEntry);
        let ProtocolMessage::UnparsedEntry(RawEntry { header, .. }) = msg else {
            panic!("expected an entry message")
        };
        assert_eq!(header.requires_ack(), Some(true));

        machine.notify_ack(applied.index).unwrap();
        assert!(matches!(ack_rx.try_recv(), Ok(CompletionResult::Ack)));
    }

    #[test]
    fn side_effect_completes_on_append_in_request_response_mode() {
        let (machine, mut rx) = test_machine(ProtocolMode::RequestResponse, 1, true, vec![]);

        assert!(matches!(
            machine.begin_side_effect().unwrap(),
            SideEffectBegin::Execute
        ));
        let applied = machine
            .end_side_effect(EntryResult::Success(Bytes::from_static(b"res")))
            .unwrap();
        assert!(matches!(
            applied.outcome,
            OpOutcome::Ready(CompletionResult::Ack)
        ));

        let (_, msg) = next_emitted(&mut rx);
        let ProtocolMessage::UnparsedEntry(RawEntry { header, .. }) = msg else {
            panic!("expected an entry message")
        };
        assert_eq!(header.requires_ack(), Some(false));
    }

    #[test]
    fn ops_are_forbidden_while_a_side_effect_executes() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 1, true, vec![]);

        assert!(matches!(
            machine.begin_side_effect().unwrap(),
            SideEffectBegin::Execute
        ));
        let err = machine.sys_get_state(Bytes::from_static(b"k")).unwrap_err();
        assert_eq!(
            err.message(),
            "You cannot do get state calls from within a side effect."
        );
        let err = machine
            .check_not_in_side_effect("sideEffect state")
            .unwrap_err();
        assert_eq!(
            err.message(),
            "You cannot do sideEffect state calls from within a side effect."
        );

        machine.pause_side_effect();
        assert!(machine.sys_get_state(Bytes::from_static(b"k")).is_ok());
    }

    #[test]
    fn suspension_lists_uncompleted_indexes_in_order() {
        let (machine, _rx) = test_machine(ProtocolMode::BidiStream, 1, true, vec![]);

        for _ in 0..5 {
            machine.sys_sleep(1000).unwrap();
        }
        machine
            .notify_completion(Completion::new(2, CompletionResult::Empty))
            .unwrap();
        machine
            .notify_completion(Completion::new(4, CompletionResult::Empty))
            .unwrap();

        assert!(machine.can_suspend());
        assert_eq!(machine.suspension_indexes(), vec![1, 3, 5]);
    }
}

