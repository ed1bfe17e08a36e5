use std::future::Future;
use std::time::Duration;

use localrag_core::error::{Error, Result};
use localrag_core::CancelToken;

/// Runs one external call under a timeout, racing it against `cancel`.
/// A zero `limit` means no timeout. `on_timeout` builds the error reported
/// when the deadline passes.
pub(crate) async fn guarded<T, F>(
    cancel: &CancelToken,
    limit: Duration,
    on_timeout: impl FnOnce(Duration) -> Error,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    cancel.run(with_timeout(limit, on_timeout, fut)).await
}

/// Timeout only, no cancellation.
pub(crate) async fn with_timeout<T, F>(limit: Duration, on_timeout: impl FnOnce(Duration) -> Error, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(on_timeout(limit)),
    }
}

/// Runs a store mutation on its own task. The timeout ends the wait, not the
/// mutation: a write that has started always finishes as a whole.
pub(crate) async fn detached<T, F>(limit: Duration, on_timeout: impl FnOnce(Duration) -> Error, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(fut);
    with_timeout(limit, on_timeout, async move {
        task.await.map_err(|e| Error::StoreWriteFailure(format!("store task failed: {e}")))?
    })
    .await
}
