//! Bounded-timeout cache warming.
//!
//! Request paths never fail because a warm failed: [`best_effort`] and
//! [`spawn_best_effort`] log and swallow. The ingest worker uses [`bounded`]
//! instead, because it must know whether the warm happened before it
//! acknowledges an entry.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::backend::CacheError;

/// Runs a warm under `timeout`, surfacing both failures and timeouts.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CacheError::Timeout(timeout))?
}

/// Runs a warm under `timeout`; failures are logged and dropped.
pub async fn best_effort<T, F>(what: &'static str, timeout: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, CacheError>>,
{
    match bounded(timeout, fut).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(warm = what, error = %e, "Cache warm skipped");
            None
        }
    }
}

/// Runs [`best_effort`] on a background task.
pub fn spawn_best_effort<F>(what: &'static str, timeout: Duration, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), CacheError>> + Send + 'static,
{
    tokio::spawn(async move {
        best_effort(what, timeout, fut).await;
    })
}
