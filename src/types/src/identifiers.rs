use bytes::Bytes;
use bytestring::ByteString;
use std::fmt;

/// Index type of a journal entry.
pub type EntryIndex = u32;

/// Identifier of a single invocation, as assigned by the runtime.
///
/// The SDK treats the id as opaque bytes: it is the stable seed for the
/// deterministic PRNG and, together with an entry index, forms awakeable
/// identifiers. The runtime additionally ships a human readable form used
/// for logging only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationId {
    id: Bytes,
    debug_id: ByteString,
}

impl InvocationId {
    pub fn new(id: impl Into<Bytes>, debug_id: impl Into<ByteString>) -> Self {
        Self {
            id: id.into(),
            debug_id: debug_id.into(),
        }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.id
    }

    pub fn debug_id(&self) -> &str {
        &self.debug_id
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.debug_id.is_empty() {
            // Fall back to hex when the runtime didn't provide a readable id
            for b in self.id.iter() {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        } else {
            f.write_str(&self.debug_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_debug_id() {
        let id = InvocationId::new(Bytes::from_static(&[0xde, 0xad]), "inv-1");
        assert_eq!(id.to_string(), "inv-1");
    }

    #[test]
    fn display_falls_back_to_hex() {
        let id = InvocationId::new(Bytes::from_static(&[0xde, 0xad]), "");
        assert_eq!(id.to_string(), "dead");
    }
}
