//! Bounded exponential backoff for transient provider failures.
//! `ProviderErrorKind::Transient` is retried; `Auth`/`ContentPolicy` never are.
//!
//! Grounded in `dashflow`'s own `RetryPolicy`/`with_retry` wrapper around
//! `tokio-retry`, used the same way by its chat-model providers.

use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::ProviderErrorKind;

/// Runs `op` up to `max_retries` additional times when it fails with a
/// retryable [`ProviderErrorKind`], backing off exponentially from
/// `base_delay` with jitter between attempts.
pub async fn with_retry<F, Fut, T>(
    max_retries: usize,
    base_delay: Duration,
    op: F,
) -> Result<T, (ProviderErrorKind, String)>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, (ProviderErrorKind, String)>>,
{
    let strategy = ExponentialBackoff::from_millis(base_delay.as_millis().max(1) as u64)
        .map(jitter)
        .take(max_retries);

    RetryIf::spawn(
        strategy,
        || op(),
        |error: &(ProviderErrorKind, String)| error.0.is_retryable(),
    )
    .await
}
