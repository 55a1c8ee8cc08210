//! Per-invocation journal bookkeeping: replay prefix consumption, index
//! assignment and completion tracking.

use restate_sdk_service_protocol::codec::ProtobufRawEntryCodec;
use restate_sdk_types::errors::InvocationError;
use restate_sdk_types::identifiers::EntryIndex;
use restate_sdk_types::journal::raw::{RawEntry, RawEntryCodec};
use restate_sdk_types::journal::{CompletionResult, Entry, EntryType};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug)]
pub(crate) struct Journal {
    /// Length of the replay prefix, including the input entry at index 0.
    known_entries: u32,
    /// Replay entries received so far, including the input entry.
    received: u32,
    /// Received but not yet consumed replay entries, indices `replay_cursor..received`.
    replay_queue: VecDeque<RawEntry>,
    /// Index of the next replay entry to consume.
    replay_cursor: EntryIndex,
    /// Index assigned to the next live entry.
    next_index: EntryIndex,
    /// Completable entries the runtime has not completed yet.
    uncompleted: BTreeSet<EntryIndex>,
}

impl Journal {
    /// The input entry counts as already received: it is consumed when the
    /// invocation is built.
    pub(crate) fn new(known_entries: u32) -> Self {
        Self {
            known_entries,
            received: 1,
            replay_queue: VecDeque::new(),
            replay_cursor: 1,
            next_index: known_entries.max(1),
            uncompleted: BTreeSet::new(),
        }
    }

    pub(crate) fn push_replay(&mut self, raw: RawEntry) -> Result<(), InvocationError> {
        if self.received >= self.known_entries {
            return Err(InvocationError::protocol_violation(format!(
                "received a journal entry beyond the announced replay prefix of {} entries",
                self.known_entries
            )));
        }
        self.replay_queue.push_back(raw);
        self.received += 1;
        Ok(())
    }

    pub(crate) fn replay_complete(&self) -> bool {
        self.received >= self.known_entries
    }

    pub(crate) fn is_replaying(&self) -> bool {
        self.replay_cursor < self.known_entries
    }

    pub(crate) fn peek_replay_ty(&self) -> Option<EntryType> {
        self.replay_queue.front().map(|raw| raw.header.ty())
    }

    pub(crate) fn pop_replay(&mut self) -> Option<(EntryIndex, RawEntry)> {
        let raw = self.replay_queue.pop_front()?;
        let index = self.replay_cursor;
        self.replay_cursor += 1;
        Some((index, raw))
    }

    /// Assigns the next index to a live entry. Completable entries without a
    /// local result are tracked until the runtime completes them.
    pub(crate) fn append(&mut self, pending: bool) -> EntryIndex {
        let index = self.next_index;
        self.next_index += 1;
        if pending {
            self.uncompleted.insert(index);
        }
        index
    }

    /// Tracks a replayed entry that is still awaiting its completion.
    pub(crate) fn note_pending(&mut self, index: EntryIndex) {
        self.uncompleted.insert(index);
    }

    /// Returns false if the entry was not awaiting a completion.
    pub(crate) fn complete(&mut self, index: EntryIndex) -> bool {
        self.uncompleted.remove(&index)
    }

    /// Applies a completion to a replay entry that has been received but not
    /// yet consumed by user code. Returns false when the index does not point
    /// into the queued part of the replay prefix.
    pub(crate) fn try_complete_queued(
        &mut self,
        index: EntryIndex,
        result: CompletionResult,
    ) -> Result<bool, InvocationError> {
        if index < self.replay_cursor || index >= self.received {
            return Ok(false);
        }
        let entry = self
            .replay_queue
            .get_mut((index - self.replay_cursor) as usize)
            .expect("queued replay entries are dense");
        match entry.header.is_completed() {
            Some(false) => {
                ProtobufRawEntryCodec::write_completion(entry, result).map_err(|e| {
                    InvocationError::protocol_violation(format!(
                        "cannot apply completion to journal entry {index}: {e}"
                    ))
                })?;
                Ok(true)
            }
            Some(true) => Err(InvocationError::protocol_violation(format!(
                "double completion for journal entry {index}"
            ))),
            None => Err(InvocationError::protocol_violation(format!(
                "completion for journal entry {index}, which cannot be completed"
            ))),
        }
    }

    pub(crate) fn has_uncompleted(&self) -> bool {
        !self.uncompleted.is_empty()
    }

    pub(crate) fn uncompleted_indexes(&self) -> Vec<EntryIndex> {
        self.uncompleted.iter().copied().collect()
    }
}

/// Verifies that the operation the user performed corresponds to the entry
/// recorded in the journal. Deterministic parts of the entry body take part
/// in the comparison; results and times decided by the runtime do not.
pub(crate) fn check_entry_matches(expected: &Entry, actual: &Entry) -> Result<(), InvocationError> {
    let matches = match (expected, actual) {
        (Entry::Input(_), Entry::Input(_)) => true,
        (Entry::Output(_), Entry::Output(_)) => true,
        (Entry::GetState(e), Entry::GetState(a)) => e.key == a.key,
        (Entry::SetState(e), Entry::SetState(a)) => e.key == a.key && e.value == a.value,
        (Entry::ClearState(e), Entry::ClearState(a)) => e.key == a.key,
        (Entry::ClearAllState, Entry::ClearAllState) => true,
        (Entry::GetStateKeys(_), Entry::GetStateKeys(_)) => true,
        // The journaled wake up time wins on replay
        (Entry::Sleep(_), Entry::Sleep(_)) => true,
        (Entry::Invoke(e), Entry::Invoke(a)) => e.request == a.request,
        (Entry::BackgroundInvoke(e), Entry::BackgroundInvoke(a)) => e.request == a.request,
        (Entry::Awakeable(_), Entry::Awakeable(_)) => true,
        (Entry::ResolveAwakeable(e), Entry::ResolveAwakeable(a)) => {
            e.id == a.id && e.value == a.value
        }
        (Entry::RejectAwakeable(e), Entry::RejectAwakeable(a)) => e.id == a.id,
        // The journaled result wins on replay
        (Entry::SideEffect(_), Entry::SideEffect(_)) => true,
        _ => false,
    };

    if matches {
        Ok(())
    } else if expected.ty() == actual.ty() {
        Err(InvocationError::journal_mismatch(format!(
            "journal mismatch: the deterministic parts of the '{}' entry differ from the journaled entry",
            expected.ty()
        )))
    } else {
        Err(InvocationError::journal_mismatch(format!(
            "journal mismatch: the invocation tried to execute '{}', but the journal recorded '{}'",
            expected.ty(),
            actual.ty()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use restate_sdk_types::errors::codes;
    use restate_sdk_types::journal::InvokeRequest;

    #[test]
    fn indices_are_dense_and_start_after_the_prefix() {
        let mut journal = Journal::new(3);
        assert_eq!(journal.append(false), 3);
        assert_eq!(journal.append(true), 4);
        assert_eq!(journal.uncompleted_indexes(), vec![4]);
    }

    #[test]
    fn journal_without_prefix_starts_at_one() {
        let mut journal = Journal::new(1);
        assert!(!journal.is_replaying());
        assert_eq!(journal.append(false), 1);
    }

    #[test]
    fn replay_prefix_is_bounded() {
        let mut journal = Journal::new(2);
        let entry = ProtobufRawEntryCodec::serialize(Entry::sleep(1, None));

        assert!(journal.push_replay(entry.clone()).is_ok());
        assert!(journal.replay_complete());
        let err = journal.push_replay(entry).unwrap_err();
        assert_eq!(err.code(), codes::PROTOCOL_VIOLATION);
    }

    #[test]
    fn queued_replay_entry_can_be_completed_once() {
        let mut journal = Journal::new(2);
        journal
            .push_replay(ProtobufRawEntryCodec::serialize(Entry::sleep(1, None)))
            .unwrap();

        assert!(journal
            .try_complete_queued(1, CompletionResult::Empty)
            .unwrap());
        let err = journal
            .try_complete_queued(1, CompletionResult::Empty)
            .unwrap_err();
        assert_eq!(err.code(), codes::PROTOCOL_VIOLATION);

        // Outside the queued range
        assert!(!journal
            .try_complete_queued(5, CompletionResult::Empty)
            .unwrap());
    }

    #[test]
    fn matching_compares_deterministic_parts_only() {
        // Sleep matches on kind only
        check_entry_matches(&Entry::sleep(1, None), &Entry::sleep(999, None)).unwrap();

        // Get state compares the key
        check_entry_matches(
            &Entry::get_state(Bytes::from_static(b"k"), None),
            &Entry::get_state(Bytes::from_static(b"k"), None),
        )
        .unwrap();
        let err = check_entry_matches(
            &Entry::get_state(Bytes::from_static(b"k"), None),
            &Entry::get_state(Bytes::from_static(b"other"), None),
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::JOURNAL_MISMATCH);

        // Different kinds never match
        let err = check_entry_matches(
            &Entry::side_effect(restate_sdk_types::journal::EntryResult::Success(
                Bytes::new(),
            )),
            &Entry::invoke(InvokeRequest::new("Greeter", "greet", Bytes::new()), None),
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::JOURNAL_MISMATCH);
    }
}
