//! Serialized journal entries, as they travel on the wire.

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEntryHeader {
    Input { is_completed: bool },
    Output,
    GetState { is_completed: bool },
    SetState,
    ClearState,
    ClearAllState,
    GetStateKeys { is_completed: bool },
    Sleep { is_completed: bool },
    Invoke { is_completed: bool },
    BackgroundInvoke,
    Awakeable { is_completed: bool },
    ResolveAwakeable,
    RejectAwakeable,
    SideEffect { requires_ack: bool },
}

impl RawEntryHeader {
    pub fn ty(&self) -> EntryType {
        match self {
            RawEntryHeader::Input { .. } => EntryType::Input,
            RawEntryHeader::Output => EntryType::Output,
            RawEntryHeader::GetState { .. } => EntryType::GetState,
            RawEntryHeader::SetState => EntryType::SetState,
            RawEntryHeader::ClearState => EntryType::ClearState,
            RawEntryHeader::ClearAllState => EntryType::ClearAllState,
            RawEntryHeader::GetStateKeys { .. } => EntryType::GetStateKeys,
            RawEntryHeader::Sleep { .. } => EntryType::Sleep,
            RawEntryHeader::Invoke { .. } => EntryType::Invoke,
            RawEntryHeader::BackgroundInvoke => EntryType::BackgroundInvoke,
            RawEntryHeader::Awakeable { .. } => EntryType::Awakeable,
            RawEntryHeader::ResolveAwakeable => EntryType::ResolveAwakeable,
            RawEntryHeader::RejectAwakeable => EntryType::RejectAwakeable,
            RawEntryHeader::SideEffect { .. } => EntryType::SideEffect,
        }
    }

    pub fn is_completed(&self) -> Option<bool> {
        match self {
            RawEntryHeader::Input { is_completed } => Some(*is_completed),
            RawEntryHeader::Output => None,
            RawEntryHeader::GetState { is_completed } => Some(*is_completed),
            RawEntryHeader::SetState => None,
            RawEntryHeader::ClearState => None,
            RawEntryHeader::ClearAllState => None,
            RawEntryHeader::GetStateKeys { is_completed } => Some(*is_completed),
            RawEntryHeader::Sleep { is_completed } => Some(*is_completed),
            RawEntryHeader::Invoke { is_completed } => Some(*is_completed),
            RawEntryHeader::BackgroundInvoke => None,
            RawEntryHeader::Awakeable { is_completed } => Some(*is_completed),
            RawEntryHeader::ResolveAwakeable => None,
            RawEntryHeader::RejectAwakeable => None,
            RawEntryHeader::SideEffect { .. } => None,
        }
    }

    pub fn mark_completed(&mut self) {
        match self {
            RawEntryHeader::Input { is_completed } => *is_completed = true,
            RawEntryHeader::GetState { is_completed } => *is_completed = true,
            RawEntryHeader::GetStateKeys { is_completed } => *is_completed = true,
            RawEntryHeader::Sleep { is_completed } => *is_completed = true,
            RawEntryHeader::Invoke { is_completed } => *is_completed = true,
            RawEntryHeader::Awakeable { is_completed } => *is_completed = true,
            _ => {}
        }
    }

    pub fn requires_ack(&self) -> Option<bool> {
        match self {
            RawEntryHeader::SideEffect { requires_ack } => Some(*requires_ack),
            _ => None,
        }
    }
}

/// This struct represents a serialized journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub header: RawEntryHeader,
    pub entry: Bytes,
}

impl RawEntry {
    pub fn new(header: RawEntryHeader, entry: Bytes) -> Self {
        Self { header, entry }
    }

    pub fn into_inner(self) -> (RawEntryHeader, Bytes) {
        (self.header, self.entry)
    }
}

pub trait RawEntryCodec {
    type Error;

    fn serialize(entry: Entry) -> RawEntry;

    fn deserialize(entry: &RawEntry) -> Result<Entry, Self::Error>;

    fn write_completion(
        entry: &mut RawEntry,
        completion_result: CompletionResult,
    ) -> Result<(), Self::Error>;
}
