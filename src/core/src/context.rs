//! The façade exposed to user code. Every operation either replays a prior
//! journal entry or appends a new one; the journal index is assigned when the
//! operation is called, not when its future is first polled.

use crate::futures::DurableFuture;
use crate::invocation::InvocationMetadata;
use crate::machine::StateMachine;
use crate::rand::DeterministicRandom;
use crate::side_effect::{run_side_effect, SideEffectError};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use prost::Message;
use restate_sdk_service_protocol::pb;
use restate_sdk_types::errors::{InvocationError, TerminalError};
use restate_sdk_types::identifiers::InvocationId;
use restate_sdk_types::journal::{CompletionResult, InvokeRequest};
use restate_sdk_types::retries::RetryPolicy;
use restate_sdk_types::time::MillisSinceEpoch;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// A handler registered on the endpoint. The blanket impl covers plain async
/// functions from context and input to raw output bytes.
pub trait InvocationHandler: Send + Sync + 'static {
    fn invoke(&self, ctx: Context, input: Bytes) -> BoxFuture<'static, Result<Bytes, TerminalError>>;
}

impl<F, Fut> InvocationHandler for F
where
    F: Fn(Context, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, TerminalError>> + Send + 'static,
{
    fn invoke(
        &self,
        ctx: Context,
        input: Bytes,
    ) -> BoxFuture<'static, Result<Bytes, TerminalError>> {
        self(ctx, input).boxed()
    }
}

/// An externally addressable promise. Hand out the id, await the future.
pub struct Awakeable {
    pub id: String,
    pub future: DurableFuture<Bytes>,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    machine: StateMachine,
    meta: InvocationMetadata,
    /// Serializes side effect closures: a closure must not start before the
    /// previous side effect has journaled its entry.
    side_effect_lock: tokio::sync::Mutex<()>,
    random: Mutex<DeterministicRandom>,
}

impl Context {
    pub(crate) fn new(machine: StateMachine, meta: InvocationMetadata) -> Self {
        let random = Mutex::new(DeterministicRandom::new(&meta.id));
        Context {
            inner: Arc::new(ContextInner {
                machine,
                meta,
                side_effect_lock: tokio::sync::Mutex::new(()),
                random,
            }),
        }
    }

    pub(crate) fn machine(&self) -> &StateMachine {
        &self.inner.machine
    }

    pub(crate) async fn acquire_side_effect_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.side_effect_lock.lock().await
    }

    // --- Invocation facts

    pub fn invocation_id(&self) -> &InvocationId {
        &self.inner.meta.id
    }

    pub fn service_name(&self) -> &str {
        &self.inner.meta.service_name
    }

    pub fn handler_name(&self) -> &str {
        &self.inner.meta.handler_name
    }

    /// Key of the service instance. Empty for unkeyed services.
    pub fn key(&self) -> &Bytes {
        &self.inner.meta.key
    }

    // --- State

    pub fn get_state(&self, key: impl Into<Bytes>) -> DurableFuture<Option<Bytes>> {
        match self.inner.machine.sys_get_state(key.into()) {
            Ok(applied) => DurableFuture::from_applied(applied, |result| match result {
                CompletionResult::Empty => Ok(None),
                CompletionResult::Success(value) => Ok(Some(value)),
                CompletionResult::Failure(code, message) => Err(InvocationError::new(code, message)),
                CompletionResult::Ack => {
                    Err(InvocationError::internal("unexpected ack for a get state entry"))
                }
            }),
            Err(err) => DurableFuture::failed(err),
        }
    }

    pub fn set_state(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<(), TerminalError> {
        self.inner.machine.sys_set_state(key.into(), value.into())
    }

    pub fn clear_state(&self, key: impl Into<Bytes>) -> Result<(), TerminalError> {
        self.inner.machine.sys_clear_state(key.into())
    }

    pub fn clear_all_state(&self) -> Result<(), TerminalError> {
        self.inner.machine.sys_clear_all_state()
    }

    pub fn state_keys(&self) -> DurableFuture<Vec<Bytes>> {
        match self.inner.machine.sys_get_state_keys() {
            Ok(applied) => DurableFuture::from_applied(applied, |result| match result {
                CompletionResult::Success(value) => {
                    pb::get_state_keys_entry_message::StateKeys::decode(value)
                        .map(|keys| keys.keys)
                        .map_err(|e| {
                            InvocationError::internal(format!("cannot decode state keys: {e}"))
                        })
                }
                CompletionResult::Empty => Ok(vec![]),
                CompletionResult::Failure(code, message) => Err(InvocationError::new(code, message)),
                CompletionResult::Ack => {
                    Err(InvocationError::internal("unexpected ack for a state keys entry"))
                }
            }),
            Err(err) => DurableFuture::failed(err),
        }
    }

    // --- Sleep

    pub fn sleep(&self, duration: Duration) -> DurableFuture<()> {
        let wake_up_time = (MillisSinceEpoch::now() + duration).as_u64();
        match self.inner.machine.sys_sleep(wake_up_time) {
            Ok(applied) => DurableFuture::from_applied(applied, |result| match result {
                CompletionResult::Failure(code, message) => Err(InvocationError::new(code, message)),
                _ => Ok(()),
            }),
            Err(err) => DurableFuture::failed(err),
        }
    }

    // --- Calls

    pub fn call(
        &self,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameter: impl Into<Bytes>,
    ) -> DurableFuture<Bytes> {
        let request = InvokeRequest::new(
            service_name.into(),
            method_name.into(),
            parameter.into(),
        );
        match self.inner.machine.sys_invoke(request) {
            Ok(applied) => DurableFuture::from_applied(applied, |result| match result {
                CompletionResult::Success(value) => Ok(value),
                CompletionResult::Empty => Ok(Bytes::new()),
                CompletionResult::Failure(code, message) => Err(InvocationError::new(code, message)),
                CompletionResult::Ack => {
                    Err(InvocationError::internal("unexpected ack for an invoke entry"))
                }
            }),
            Err(err) => DurableFuture::failed(err),
        }
    }

    /// Fire and forget call. The runtime executes it even if this invocation
    /// fails afterwards.
    pub fn one_way_call(
        &self,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameter: impl Into<Bytes>,
    ) -> Result<(), TerminalError> {
        let request = InvokeRequest::new(
            service_name.into(),
            method_name.into(),
            parameter.into(),
        );
        self.inner
            .machine
            .sys_background_invoke("one way call", request, 0)
    }

    /// One way call executed by the runtime after the given delay.
    pub fn delayed_call(
        &self,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameter: impl Into<Bytes>,
        delay: Duration,
    ) -> Result<(), TerminalError> {
        let request = InvokeRequest::new(
            service_name.into(),
            method_name.into(),
            parameter.into(),
        );
        let invoke_time = (MillisSinceEpoch::now() + delay).as_u64();
        self.inner
            .machine
            .sys_background_invoke("delayed call", request, invoke_time)
    }

    // --- Awakeables

    pub fn awakeable(&self) -> Result<Awakeable, TerminalError> {
        let (id, applied) = self.inner.machine.sys_awakeable()?;
        let future = DurableFuture::from_applied(applied, |result| match result {
            CompletionResult::Success(value) => Ok(value),
            CompletionResult::Empty => Ok(Bytes::new()),
            CompletionResult::Failure(code, message) => Err(InvocationError::new(code, message)),
            CompletionResult::Ack => {
                Err(InvocationError::internal("unexpected ack for an awakeable entry"))
            }
        });
        Ok(Awakeable { id, future })
    }

    pub fn resolve_awakeable(
        &self,
        id: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), TerminalError> {
        self.inner
            .machine
            .sys_resolve_awakeable(id.into(), payload.into())
    }

    pub fn reject_awakeable(
        &self,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(), TerminalError> {
        self.inner
            .machine
            .sys_reject_awakeable(id.into(), reason.into())
    }

    // --- Side effects

    /// Runs a non-deterministic closure, journaling its first successful
    /// result. Retryable failures are terminal unless a retry policy is set,
    /// see [`Context::side_effect_with_retry`].
    pub fn side_effect<F, Fut>(&self, f: F) -> DurableFuture<Bytes>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, SideEffectError>> + Send + 'static,
    {
        self.side_effect_with_retry(RetryPolicy::None, f)
    }

    /// Like [`Context::side_effect`], retrying retryable failures with a
    /// durable backoff: the delays are journaled as sleeps, so a replayed
    /// invocation reproduces the schedule.
    pub fn side_effect_with_retry<F, Fut>(
        &self,
        retry_policy: RetryPolicy,
        f: F,
    ) -> DurableFuture<Bytes>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, SideEffectError>> + Send + 'static,
    {
        // The reentrancy guard trips when the future is created from within
        // another side effect closure.
        if let Err(err) = self
            .inner
            .machine
            .check_not_in_side_effect("sideEffect state")
        {
            return DurableFuture::failed(err);
        }
        let ctx = self.clone();
        DurableFuture::boxed(vec![], run_side_effect(ctx, retry_policy, f))
    }

    // --- Deterministic randomness

    /// Uniformly distributed f64 in `[0, 1)`, stable across replays.
    pub fn random(&self) -> Result<f64, TerminalError> {
        self.inner.machine.check_not_in_side_effect("random")?;
        Ok(self
            .inner
            .random
            .lock()
            .expect("random lock is never poisoned")
            .random())
    }

    /// Pseudo-random v4 uuid, stable across replays.
    pub fn uuid(&self) -> Result<Uuid, TerminalError> {
        self.inner.machine.check_not_in_side_effect("uuid")?;
        Ok(self
            .inner
            .random
            .lock()
            .expect("random lock is never poisoned")
            .uuid())
    }
}
