//! This module defines the journal model.
//!
//! A journal is an ordered log of entries, each of them recording a specific
//! action taken by the user code. Completable entries additionally record the
//! result delivered by the runtime, either inline (when replayed completed) or
//! through a separate [`Completion`].

use bytes::Bytes;
use bytestring::ByteString;

use crate::errors::{InvocationError, InvocationErrorCode};
use crate::identifiers::EntryIndex;

mod entries;
pub use entries::*;

pub mod raw;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    // IO
    Input,
    Output,

    // State access
    GetState,
    SetState,
    ClearState,
    ClearAllState,
    GetStateKeys,

    // Syscalls
    Sleep,
    Invoke,
    BackgroundInvoke,
    Awakeable,
    ResolveAwakeable,
    RejectAwakeable,
    SideEffect,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    // IO
    Input(InputEntry),
    Output(OutputEntry),

    // State access
    GetState(GetStateEntry),
    SetState(SetStateEntry),
    ClearState(ClearStateEntry),
    ClearAllState,
    GetStateKeys(GetStateKeysEntry),

    // Syscalls
    Sleep(SleepEntry),
    Invoke(InvokeEntry),
    BackgroundInvoke(BackgroundInvokeEntry),
    Awakeable(AwakeableEntry),
    ResolveAwakeable(ResolveAwakeableEntry),
    RejectAwakeable(RejectAwakeableEntry),
    SideEffect(SideEffectEntry),
}

impl Entry {
    pub fn ty(&self) -> EntryType {
        match self {
            Entry::Input(_) => EntryType::Input,
            Entry::Output(_) => EntryType::Output,
            Entry::GetState(_) => EntryType::GetState,
            Entry::SetState(_) => EntryType::SetState,
            Entry::ClearState(_) => EntryType::ClearState,
            Entry::ClearAllState => EntryType::ClearAllState,
            Entry::GetStateKeys(_) => EntryType::GetStateKeys,
            Entry::Sleep(_) => EntryType::Sleep,
            Entry::Invoke(_) => EntryType::Invoke,
            Entry::BackgroundInvoke(_) => EntryType::BackgroundInvoke,
            Entry::Awakeable(_) => EntryType::Awakeable,
            Entry::ResolveAwakeable(_) => EntryType::ResolveAwakeable,
            Entry::RejectAwakeable(_) => EntryType::RejectAwakeable,
            Entry::SideEffect(_) => EntryType::SideEffect,
        }
    }

    pub fn input(value: impl Into<Bytes>) -> Self {
        Entry::Input(InputEntry {
            value: value.into(),
        })
    }

    pub fn output(result: EntryResult) -> Self {
        Entry::Output(OutputEntry { result })
    }

    pub fn get_state(key: impl Into<Bytes>, value: Option<GetStateResult>) -> Self {
        Entry::GetState(GetStateEntry {
            key: key.into(),
            value,
        })
    }

    pub fn set_state(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Entry::SetState(SetStateEntry {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn clear_state(key: impl Into<Bytes>) -> Self {
        Entry::ClearState(ClearStateEntry { key: key.into() })
    }

    pub fn get_state_keys(value: Option<GetStateKeysResult>) -> Self {
        Entry::GetStateKeys(GetStateKeysEntry { value })
    }

    pub fn sleep(wake_up_time: u64, result: Option<SleepResult>) -> Self {
        Entry::Sleep(SleepEntry {
            wake_up_time,
            result,
        })
    }

    pub fn invoke(request: InvokeRequest, result: Option<EntryResult>) -> Self {
        Entry::Invoke(InvokeEntry { request, result })
    }

    pub fn background_invoke(request: InvokeRequest, invoke_time: u64) -> Self {
        Entry::BackgroundInvoke(BackgroundInvokeEntry {
            request,
            invoke_time,
        })
    }

    pub fn awakeable(result: Option<EntryResult>) -> Self {
        Entry::Awakeable(AwakeableEntry { result })
    }

    pub fn resolve_awakeable(id: impl Into<ByteString>, value: impl Into<Bytes>) -> Self {
        Entry::ResolveAwakeable(ResolveAwakeableEntry {
            id: id.into(),
            value: value.into(),
        })
    }

    pub fn reject_awakeable(
        id: impl Into<ByteString>,
        code: InvocationErrorCode,
        message: impl Into<ByteString>,
    ) -> Self {
        Entry::RejectAwakeable(RejectAwakeableEntry {
            id: id.into(),
            code,
            message: message.into(),
        })
    }

    pub fn side_effect(result: EntryResult) -> Self {
        Entry::SideEffect(SideEffectEntry { result })
    }
}

/// Result of a completable entry, delivered by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    /// Plain acknowledgment of a journaled entry, without a payload.
    Ack,
    Empty,
    Success(Bytes),
    Failure(InvocationErrorCode, ByteString),
}

impl From<&InvocationError> for CompletionResult {
    fn from(value: &InvocationError) -> Self {
        CompletionResult::Failure(value.code(), value.message().to_owned().into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub entry_index: EntryIndex,
    pub result: CompletionResult,
}

impl Completion {
    pub fn new(entry_index: EntryIndex, result: CompletionResult) -> Self {
        Self {
            entry_index,
            result,
        }
    }
}
