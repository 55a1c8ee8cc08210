//! Futures tagged with their journal indexes, and the combinators over them.
//!
//! Context operations journal their entry when they are called and hand back
//! a [`DurableFuture`] resolving when the runtime completes the entry. The
//! combinators aggregate child futures without journaling anything
//! themselves; they merely carry the union of the child indexes.

use crate::machine::{Applied, OpOutcome};

use futures::future::{BoxFuture, Either};
use futures::FutureExt;
use restate_sdk_types::errors::{InvocationError, TerminalError, ABORTED_INVOCATION_ERROR};
use restate_sdk_types::identifiers::EntryIndex;
use restate_sdk_types::journal::CompletionResult;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::oneshot;

type MapFn<T> = Box<dyn FnOnce(CompletionResult) -> Result<T, TerminalError> + Send>;

/// A future bound to journal entries. Resolution is driven by the journal:
/// either the result was known when the entry was appended or replayed, or a
/// runtime completion delivers it later.
pub struct DurableFuture<T> {
    indexes: Vec<EntryIndex>,
    state: State<T>,
}

enum State<T> {
    Ready(Option<Result<T, TerminalError>>),
    Waiting {
        rx: oneshot::Receiver<CompletionResult>,
        map: Option<MapFn<T>>,
    },
    Boxed(BoxFuture<'static, Result<T, TerminalError>>),
}

// All states poll through owned, heap-pinned or Unpin handles
impl<T> Unpin for DurableFuture<T> {}

impl<T> DurableFuture<T> {
    pub(crate) fn failed(err: TerminalError) -> Self {
        DurableFuture {
            indexes: vec![],
            state: State::Ready(Some(Err(err))),
        }
    }

    pub(crate) fn from_applied(
        applied: Applied,
        map: impl FnOnce(CompletionResult) -> Result<T, TerminalError> + Send + 'static,
    ) -> Self {
        match applied.outcome {
            OpOutcome::Ready(result) => DurableFuture {
                indexes: vec![applied.index],
                state: State::Ready(Some(map(result))),
            },
            OpOutcome::Pending(rx) => DurableFuture {
                indexes: vec![applied.index],
                state: State::Waiting {
                    rx,
                    map: Some(Box::new(map)),
                },
            },
        }
    }

    pub(crate) fn boxed(
        indexes: Vec<EntryIndex>,
        fut: impl Future<Output = Result<T, TerminalError>> + Send + 'static,
    ) -> Self {
        DurableFuture {
            indexes,
            state: State::Boxed(fut.boxed()),
        }
    }

    /// Journal indexes backing this future. Aggregates carry the indexes of
    /// all their children; a side effect future is only tagged once its entry
    /// has been appended.
    pub fn entry_indexes(&self) -> &[EntryIndex] {
        &self.indexes
    }
}

impl<T> Future for DurableFuture<T> {
    type Output = Result<T, TerminalError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(value) => {
                Poll::Ready(value.take().expect("future polled after completion"))
            }
            State::Waiting { rx, map } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => {
                    let map = map.take().expect("future polled after completion");
                    Poll::Ready(map(result))
                }
                // The sender is dropped when the invocation is torn down
                Poll::Ready(Err(_)) => Poll::Ready(Err(ABORTED_INVOCATION_ERROR)),
                Poll::Pending => Poll::Pending,
            },
            State::Boxed(fut) => fut.as_mut().poll(cx),
        }
    }
}

fn merged_indexes<T>(futures: &[DurableFuture<T>]) -> Vec<EntryIndex> {
    futures
        .iter()
        .flat_map(|f| f.entry_indexes().iter().copied())
        .collect()
}

/// Resolves with all results once every child resolved, or rejects with the
/// first failure.
pub fn all<T: Send + 'static>(futures: Vec<DurableFuture<T>>) -> DurableFuture<Vec<T>> {
    let indexes = merged_indexes(&futures);
    DurableFuture::boxed(indexes, futures::future::try_join_all(futures))
}

/// Resolves or rejects with the first child that settles.
pub fn race<T: Send + 'static>(futures: Vec<DurableFuture<T>>) -> DurableFuture<T> {
    if futures.is_empty() {
        return DurableFuture::failed(InvocationError::internal(
            "race requires at least one future",
        ));
    }
    let indexes = merged_indexes(&futures);
    DurableFuture::boxed(indexes, async move {
        let (result, _, _) = futures::future::select_all(futures).await;
        result
    })
}

/// Resolves with the first successful child. Rejects only when every child
/// failed, with the failure of the last one to settle.
pub fn any<T: Send + 'static>(futures: Vec<DurableFuture<T>>) -> DurableFuture<T> {
    if futures.is_empty() {
        return DurableFuture::failed(InvocationError::internal(
            "any requires at least one future",
        ));
    }
    let indexes = merged_indexes(&futures);
    DurableFuture::boxed(indexes, async move {
        let mut futures = futures;
        let mut last_err = None;
        while !futures.is_empty() {
            let (result, _, rest) = futures::future::select_all(futures).await;
            match result {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
            futures = rest;
        }
        Err(last_err.expect("at least one future settled"))
    })
}

/// Resolves once every child settled, with the individual outcomes. Never
/// rejects.
pub fn all_settled<T: Send + 'static>(
    futures: Vec<DurableFuture<T>>,
) -> DurableFuture<Vec<Result<T, TerminalError>>> {
    let indexes = merged_indexes(&futures);
    DurableFuture::boxed(indexes, futures::future::join_all(futures).map(Ok))
}

impl<T: Send + 'static> DurableFuture<T> {
    /// Races this future against a journaled sleep. When the sleep fires
    /// first, the combined future rejects with a timeout terminal failure.
    pub fn or_timeout(
        self,
        ctx: &crate::context::Context,
        timeout: std::time::Duration,
    ) -> DurableFuture<T> {
        let sleep = ctx.sleep(timeout);
        let mut indexes = self.indexes.clone();
        indexes.extend_from_slice(sleep.entry_indexes());
        DurableFuture::boxed(indexes, async move {
            match futures::future::select(self, sleep).await {
                Either::Left((result, _)) => result,
                Either::Right((sleep_result, _)) => {
                    sleep_result?;
                    Err(restate_sdk_types::errors::TIMEOUT_INVOCATION_ERROR)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use restate_sdk_types::errors::codes;

    fn ok(index: EntryIndex, value: u32) -> DurableFuture<u32> {
        DurableFuture::boxed(vec![index], async move { Ok(value) })
    }

    fn failing(message: &'static str) -> DurableFuture<u32> {
        DurableFuture::failed(InvocationError::new(codes::INTERNAL, message))
    }

    #[tokio::test]
    async fn all_collects_in_input_order() {
        let result = all(vec![ok(1, 10), ok(2, 20), ok(3, 30)]).await.unwrap();
        assert_eq!(result, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn all_rejects_on_the_first_failure() {
        let err = all(vec![ok(1, 10), failing("boom")]).await.unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[tokio::test]
    async fn race_settles_with_the_first_settled_child() {
        // An already failed future settles before any pending one
        let pending = DurableFuture::<u32>::boxed(vec![1], futures::future::pending());
        let err = race(vec![pending, failing("first")]).await.unwrap_err();
        assert_eq!(err.message(), "first");
    }

    #[tokio::test]
    async fn any_skips_failures_until_a_success() {
        let value = any(vec![failing("a"), ok(2, 42)]).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn any_rejects_only_when_all_children_failed() {
        let err = any(vec![failing("a"), failing("b")]).await.unwrap_err();
        assert_eq!(err.code(), codes::INTERNAL);
    }

    #[tokio::test]
    async fn all_settled_never_rejects() {
        let results = all_settled(vec![ok(1, 1), failing("x")]).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn aggregates_carry_child_indexes() {
        let fut = all(vec![ok(1, 1), ok(4, 4)]);
        assert_eq!(fut.entry_indexes(), &[1, 4]);
    }
}

