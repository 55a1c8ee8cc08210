use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResult {
    Success(Bytes),
    Failure(InvocationErrorCode, ByteString),
}

impl From<InvocationError> for EntryResult {
    fn from(value: InvocationError) -> Self {
        EntryResult::Failure(value.code(), value.message().to_owned().into())
    }
}

impl From<EntryResult> for Result<Bytes, InvocationError> {
    fn from(value: EntryResult) -> Self {
        match value {
            EntryResult::Success(b) => Ok(b),
            EntryResult::Failure(code, message) => Err(InvocationError::new(code, message)),
        }
    }
}

/// Completable entries can receive a [`CompletionResult`] after being appended.
pub trait CompletableEntry: private::Sealed {
    /// Returns true if the entry is completed.
    fn is_completed(&self) -> bool;
}

mod private {
    use super::*;

    pub trait Sealed {}
    impl Sealed for GetStateEntry {}
    impl Sealed for GetStateKeysEntry {}
    impl Sealed for SleepEntry {}
    impl Sealed for InvokeEntry {}
    impl Sealed for AwakeableEntry {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEntry {
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub result: EntryResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetStateResult {
    Empty,
    Result(Bytes),
    Failure(InvocationErrorCode, ByteString),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetStateEntry {
    pub key: Bytes,
    pub value: Option<GetStateResult>,
}

impl CompletableEntry for GetStateEntry {
    fn is_completed(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStateEntry {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearStateEntry {
    pub key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetStateKeysResult {
    Result(Vec<Bytes>),
    Failure(InvocationErrorCode, ByteString),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetStateKeysEntry {
    pub value: Option<GetStateKeysResult>,
}

impl CompletableEntry for GetStateKeysEntry {
    fn is_completed(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SleepResult {
    Fired,
    Failure(InvocationErrorCode, ByteString),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepEntry {
    pub wake_up_time: u64,
    pub result: Option<SleepResult>,
}

impl CompletableEntry for SleepEntry {
    fn is_completed(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    pub service_name: ByteString,
    pub method_name: ByteString,
    pub parameter: Bytes,
}

impl InvokeRequest {
    pub fn new(
        service_name: impl Into<ByteString>,
        method_name: impl Into<ByteString>,
        parameter: impl Into<Bytes>,
    ) -> Self {
        InvokeRequest {
            service_name: service_name.into(),
            method_name: method_name.into(),
            parameter: parameter.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeEntry {
    pub request: InvokeRequest,
    pub result: Option<EntryResult>,
}

impl CompletableEntry for InvokeEntry {
    fn is_completed(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundInvokeEntry {
    pub request: InvokeRequest,
    /// Time at which the runtime should execute the call, in milliseconds
    /// since the unix epoch. Zero means immediately.
    pub invoke_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwakeableEntry {
    pub result: Option<EntryResult>,
}

impl CompletableEntry for AwakeableEntry {
    fn is_completed(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveAwakeableEntry {
    pub id: ByteString,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectAwakeableEntry {
    pub id: ByteString,
    pub code: InvocationErrorCode,
    pub message: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectEntry {
    pub result: EntryResult,
}
