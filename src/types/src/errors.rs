use std::borrow::Cow;
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InvocationErrorCode(u16);

impl InvocationErrorCode {
    pub const fn new(code: u16) -> Self {
        InvocationErrorCode(code)
    }
}

impl fmt::Debug for InvocationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InvocationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<u16> for InvocationErrorCode {
    fn from(value: u16) -> Self {
        InvocationErrorCode(value)
    }
}

impl From<u32> for InvocationErrorCode {
    fn from(value: u32) -> Self {
        value
            .try_into()
            .map(InvocationErrorCode)
            .unwrap_or(codes::INTERNAL)
    }
}

impl From<InvocationErrorCode> for u16 {
    fn from(value: InvocationErrorCode) -> Self {
        value.0
    }
}

impl From<InvocationErrorCode> for u32 {
    fn from(value: InvocationErrorCode) -> Self {
        value.0 as u32
    }
}

pub mod codes {
    use super::InvocationErrorCode;

    pub const BAD_REQUEST: InvocationErrorCode = InvocationErrorCode(400);
    pub const NOT_FOUND: InvocationErrorCode = InvocationErrorCode(404);
    pub const TIMEOUT: InvocationErrorCode = InvocationErrorCode(408);
    pub const ABORTED: InvocationErrorCode = InvocationErrorCode(409);
    pub const INTERNAL: InvocationErrorCode = InvocationErrorCode(500);
    pub const UNKNOWN: InvocationErrorCode = INTERNAL;
    pub const JOURNAL_MISMATCH: InvocationErrorCode = InvocationErrorCode(570);
    pub const PROTOCOL_VIOLATION: InvocationErrorCode = InvocationErrorCode(571);
}

/// This struct represents failures terminating a service invocation.
///
/// User handlers return it directly (see [`TerminalError`]); the state machine
/// produces it for journal mismatches and protocol violations. Retryable
/// failures never take this shape, they stay inside the side effect runner.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InvocationError {
    code: InvocationErrorCode,
    message: Cow<'static, str>,
}

/// The failure type surfaced to user code. Any invocation ending with this
/// error emits an output failure carrying its code and message.
pub type TerminalError = InvocationError;

pub const UNKNOWN_INVOCATION_ERROR: InvocationError =
    InvocationError::new_static(codes::UNKNOWN, "unknown");

pub const TIMEOUT_INVOCATION_ERROR: InvocationError =
    InvocationError::new_static(codes::TIMEOUT, "timed out");

pub const ABORTED_INVOCATION_ERROR: InvocationError =
    InvocationError::new_static(codes::ABORTED, "invocation aborted");

impl Default for InvocationError {
    fn default() -> Self {
        UNKNOWN_INVOCATION_ERROR
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code(), self.message())
    }
}

impl std::error::Error for InvocationError {}

impl InvocationError {
    pub const fn new_static(code: InvocationErrorCode, message: &'static str) -> Self {
        Self {
            code,
            message: Cow::Borrowed(message),
        }
    }

    pub fn new(code: impl Into<InvocationErrorCode>, message: impl fmt::Display) -> Self {
        Self {
            code: code.into(),
            message: Cow::Owned(message.to_string()),
        }
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::new(codes::INTERNAL, message)
    }

    pub fn journal_mismatch(message: impl fmt::Display) -> Self {
        Self::new(codes::JOURNAL_MISMATCH, message)
    }

    pub fn protocol_violation(message: impl fmt::Display) -> Self {
        Self::new(codes::PROTOCOL_VIOLATION, message)
    }

    pub fn code(&self) -> InvocationErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for InvocationError {
    fn from(error: anyhow::Error) -> Self {
        InvocationError::internal(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_conversions() {
        assert_eq!(u16::from(codes::JOURNAL_MISMATCH), 570);
        assert_eq!(InvocationErrorCode::from(571_u32), codes::PROTOCOL_VIOLATION);
        // Out of range u32 codes collapse to INTERNAL
        assert_eq!(InvocationErrorCode::from(u32::MAX), codes::INTERNAL);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = InvocationError::new(codes::BAD_REQUEST, "bad input");
        assert_eq!(err.to_string(), "[400] bad input");
    }
}
