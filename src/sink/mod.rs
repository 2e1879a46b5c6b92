// src/sink/mod.rs
//! Downstream delivery contract and the per-event submission policy.

pub mod channel;

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;
use crate::ingest::types::Event;
use crate::timer::race_cancel;

pub use channel::{ChannelSink, Delivered, JsonLinesWriter};

/// Wait for a normal submission.
pub const SUBMIT_WAIT: Duration = Duration::from_secs(10);
/// Wait for the single retry after the sink reported a full buffer.
pub const BACKPRESSURE_WAIT: Duration = Duration::from_secs(3600);
/// Upper bound on draining pending submissions at shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    /// Submit one event, waiting at most `wait` for buffer space.
    /// `Err(SinkError::BufferFull)` is the backpressure signal.
    async fn submit(
        &self,
        event: &Event,
        timestamp: DateTime<Utc>,
        wait: Duration,
    ) -> Result<(), SinkError>;

    /// Wait up to `timeout` for accepted submissions to be consumed.
    async fn drain(&self, timeout: Duration) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError>;
}

/// Submit `events` one by one.
///
/// A full buffer is retried once with [`BACKPRESSURE_WAIT`], which stalls the
/// poll cycle instead of dropping data. Any further failure is returned and
/// is unrecoverable for the adapter.
pub async fn deliver(
    sink: &dyn DeliverySink,
    events: &[Event],
    cancel: &CancellationToken,
) -> Result<usize, SinkError> {
    let mut delivered = 0usize;
    for event in events {
        let ts = Utc::now();
        let first = race_cancel(sink.submit(event, ts, SUBMIT_WAIT), cancel)
            .await
            .map_err(|_| SinkError::Cancelled)?;
        match first {
            Ok(()) => {}
            Err(SinkError::BufferFull) => {
                tracing::warn!(target: "poller", source = %event.source, "stream falling behind");
                race_cancel(sink.submit(event, ts, BACKPRESSURE_WAIT), cancel)
                    .await
                    .map_err(|_| SinkError::Cancelled)?
                    .inspect_err(|e| {
                        tracing::error!(target: "poller", source = %event.source, error = %e, "submit failed after backpressure wait");
                    })?;
            }
            Err(e) => {
                tracing::error!(target: "poller", source = %event.source, error = %e, "submit failed");
                return Err(e);
            }
        }
        delivered += 1;
        counter!("poller_events_delivered_total", "source" => event.source.clone()).increment(1);
    }
    Ok(delivered)
}
