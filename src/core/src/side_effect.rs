//! The side effect runner: the only construct admitting user
//! non-determinism. The first successful result is journaled; non-terminal
//! failures are retried with a journaled backoff.

use crate::context::Context;
use crate::machine::{Applied, OpOutcome, SideEffectBegin};

use bytes::Bytes;
use restate_sdk_types::errors::{InvocationError, TerminalError, ABORTED_INVOCATION_ERROR};
use restate_sdk_types::journal::{CompletionResult, EntryResult};
use restate_sdk_types::retries::RetryPolicy;
use restate_sdk_types::time::MillisSinceEpoch;
use std::future::Future;
use tracing::debug;

/// Failure of a side effect closure. Terminal failures are journaled and end
/// the invocation; retryable ones stay inside the runner and trigger the
/// retry policy.
#[derive(Debug, thiserror::Error)]
pub enum SideEffectError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error("retryable side effect failure: {0}")]
    Retryable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SideEffectError {
    pub fn retryable(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        SideEffectError::Retryable(err.into())
    }

    pub fn terminal(err: impl Into<TerminalError>) -> Self {
        SideEffectError::Terminal(err.into())
    }
}

pub(crate) async fn run_side_effect<F, Fut>(
    ctx: Context,
    retry_policy: RetryPolicy,
    mut f: F,
) -> Result<Bytes, TerminalError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Bytes, SideEffectError>> + Send,
{
    let machine = ctx.machine().clone();
    let guard = ctx.acquire_side_effect_lock().await;
    let mut retry_iter = retry_policy.into_iter();

    // Consume what previous attempts of this side effect journaled: zero or
    // more backoff sleeps, then possibly the result itself. An exhausted
    // journal means the invocation was interrupted mid-retry, so execution
    // resumes at the attempt the schedule points at.
    loop {
        match machine.begin_side_effect()? {
            SideEffectBegin::Replayed(result) => return result.into(),
            SideEffectBegin::ReplayedBackoff(applied) => {
                retry_iter.next();
                await_completion(applied).await?;
            }
            SideEffectBegin::Execute => break,
        }
    }

    loop {
        match f().await {
            Ok(value) => {
                let applied = machine.end_side_effect(EntryResult::Success(value.clone()))?;
                drop(guard);
                await_completion(applied).await?;
                return Ok(value);
            }
            Err(SideEffectError::Terminal(err)) => {
                let applied = machine.end_side_effect(EntryResult::Failure(
                    err.code(),
                    err.message().to_owned().into(),
                ))?;
                drop(guard);
                await_completion(applied).await?;
                return Err(err);
            }
            Err(SideEffectError::Retryable(cause)) => match retry_iter.next() {
                Some(delay) => {
                    debug!(
                        restate.side_effect.retry_delay = ?delay,
                        "Side effect failed, retrying after backoff: {cause}"
                    );
                    machine.pause_side_effect();
                    let wake_up_time = (MillisSinceEpoch::now() + delay).as_u64();
                    let applied = machine.sys_sleep(wake_up_time)?;
                    await_completion(applied).await?;
                    machine.resume_side_effect()?;
                }
                None => {
                    let err = InvocationError::internal(format!(
                        "side effect retries exhausted. Last failure: {cause}"
                    ));
                    let applied = machine.end_side_effect(EntryResult::Failure(
                        err.code(),
                        err.message().to_owned().into(),
                    ))?;
                    drop(guard);
                    await_completion(applied).await?;
                    return Err(err);
                }
            },
        }
    }
}

async fn await_completion(applied: Applied) -> Result<(), TerminalError> {
    let result = match applied.outcome {
        OpOutcome::Ready(result) => result,
        OpOutcome::Pending(rx) => match rx.await {
            Ok(result) => result,
            Err(_) => return Err(ABORTED_INVOCATION_ERROR),
        },
    };
    match result {
        CompletionResult::Failure(code, message) => Err(InvocationError::new(code, message)),
        _ => Ok(()),
    }
}
