use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use restate_sdk_types::identifiers::EntryIndex;
use std::fmt::Display;
use std::mem::size_of;
use std::str::FromStr;

/// Identifier addressing an awakeable entry from outside the invocation.
///
/// It is derived from the raw invocation id and the journal entry index, and
/// encoded as url-safe base64 for wider language support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwakeableIdentifier {
    invocation_id: Bytes,
    entry_index: EntryIndex,
}

#[derive(Debug, thiserror::Error)]
pub enum AwakeableIdentifierDecodeError {
    #[error("base64 decode error")]
    Codec,
    #[error("bad length")]
    Length,
}

impl AwakeableIdentifier {
    pub fn new(invocation_id: Bytes, entry_index: EntryIndex) -> Self {
        Self {
            invocation_id,
            entry_index,
        }
    }

    pub fn into_inner(self) -> (Bytes, EntryIndex) {
        (self.invocation_id, self.entry_index)
    }
}

impl FromStr for AwakeableIdentifier {
    type Err = AwakeableIdentifierDecodeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let buffer = URL_SAFE
            .decode(input)
            .map_err(|_| AwakeableIdentifierDecodeError::Codec)?;

        if buffer.len() < size_of::<EntryIndex>() {
            return Err(AwakeableIdentifierDecodeError::Length);
        }

        let id_len = buffer.len() - size_of::<EntryIndex>();
        let entry_index = EntryIndex::from_be_bytes(
            buffer[id_len..]
                .try_into()
                // Unwrap is safe because we check the size above.
                .unwrap(),
        );

        Ok(Self {
            invocation_id: Bytes::copy_from_slice(&buffer[..id_len]),
            entry_index,
        })
    }
}

impl Display for AwakeableIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut input_buf =
            BytesMut::with_capacity(self.invocation_id.len() + size_of::<EntryIndex>());
        input_buf.put_slice(&self.invocation_id);
        input_buf.put_u32(self.entry_index);
        f.write_str(&URL_SAFE.encode(input_buf.freeze()))
    }
}
