use bytes::Bytes;
use bytestring::ByteString;
use restate_sdk_service_protocol::discovery::ProtocolMode;
use restate_sdk_types::identifiers::InvocationId;
use std::collections::HashMap;

/// Immutable facts about one invocation, available to user code through the
/// context.
#[derive(Debug, Clone)]
pub struct InvocationMetadata {
    pub id: InvocationId,
    pub service_name: ByteString,
    pub handler_name: ByteString,
    /// Key of the service instance. Empty for unkeyed services.
    pub key: Bytes,
    pub mode: ProtocolMode,
}

/// Local view of the service instance state, seeded from the start message.
///
/// When the runtime ships the complete state (`partial_state = false`), state
/// reads resolve locally and are journaled already completed. State writes
/// keep the view in sync in both modes.
#[derive(Debug)]
pub(crate) struct EagerState {
    complete: bool,
    map: HashMap<Bytes, Bytes>,
}

pub(crate) enum EagerGet {
    Value(Bytes),
    Absent,
    Unknown,
}

impl EagerState {
    pub(crate) fn new(
        complete: bool,
        entries: impl IntoIterator<Item = (Bytes, Bytes)>,
    ) -> Self {
        Self {
            complete,
            map: entries.into_iter().collect(),
        }
    }

    pub(crate) fn get(&self, key: &Bytes) -> EagerGet {
        match self.map.get(key) {
            Some(value) => EagerGet::Value(value.clone()),
            None if self.complete => EagerGet::Absent,
            None => EagerGet::Unknown,
        }
    }

    /// Returns all known keys, or `None` when the local view is partial.
    pub(crate) fn keys(&self) -> Option<Vec<Bytes>> {
        if !self.complete {
            return None;
        }
        let mut keys: Vec<_> = self.map.keys().cloned().collect();
        keys.sort();
        Some(keys)
    }

    pub(crate) fn set(&mut self, key: Bytes, value: Bytes) {
        self.map.insert(key, value);
    }

    pub(crate) fn clear(&mut self, key: &Bytes) {
        self.map.remove(key);
    }

    pub(crate) fn clear_all(&mut self) {
        self.map.clear();
        // After clearing everything the local view is complete by definition
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_state_resolves_gets_locally() {
        let state = EagerState::new(
            true,
            vec![(Bytes::from_static(b"a"), Bytes::from_static(b"1"))],
        );

        assert!(matches!(state.get(&Bytes::from_static(b"a")), EagerGet::Value(v) if v == "1"));
        assert!(matches!(state.get(&Bytes::from_static(b"b")), EagerGet::Absent));
        assert_eq!(state.keys(), Some(vec![Bytes::from_static(b"a")]));
    }

    #[test]
    fn partial_state_misses_are_unknown() {
        let state = EagerState::new(false, vec![]);

        assert!(matches!(state.get(&Bytes::from_static(b"a")), EagerGet::Unknown));
        assert_eq!(state.keys(), None);
    }

    #[test]
    fn clear_all_makes_the_view_complete() {
        let mut state = EagerState::new(false, vec![]);
        state.clear_all();

        assert!(matches!(state.get(&Bytes::from_static(b"a")), EagerGet::Absent));
        assert_eq!(state.keys(), Some(vec![]));
    }

    #[test]
    fn writes_update_the_view() {
        let mut state = EagerState::new(true, vec![]);
        state.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"));
        assert!(matches!(state.get(&Bytes::from_static(b"k")), EagerGet::Value(_)));

        state.clear(&Bytes::from_static(b"k"));
        assert!(matches!(state.get(&Bytes::from_static(b"k")), EagerGet::Absent));
    }
}
