// src/timer.rs
//! Cancellable waits shared by the HTTP executor, the scheduler and delivery.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Marker returned when a wait was interrupted by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Sleep for `d`, returning early with `Err(Cancelled)` once `cancel` fires.
pub async fn sleep_cancellable(d: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(d) => Ok(()),
    }
}

/// Race an arbitrary future against cancellation.
pub async fn race_cancel<F, T>(fut: F, cancel: &CancellationToken) -> Result<T, Cancelled>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}
