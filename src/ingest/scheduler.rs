// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::state::{AdapterState, SourceState};
use super::types::SourceDescriptor;
use super::walker::PageWalker;
use crate::error::{CycleError, PollError, SinkError};
use crate::sink::{deliver, DeliverySink};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// One week. Longer periods overflow tokio's timer arithmetic.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub admitted: usize,
    pub delivered: usize,
    pub failed_sources: Vec<String>,
}

/// Owns all per-source state and drives one cycle per tick.
pub struct PollScheduler {
    sources: Vec<SourceDescriptor>,
    walker: PageWalker,
    sink: Arc<dyn DeliverySink>,
    state: AdapterState,
    start: DateTime<Utc>,
    interval: Duration,
}

impl PollScheduler {
    /// Every source starts with its watermark at `start`, so backlog older
    /// than that is never ingested.
    pub fn new(
        sources: Vec<SourceDescriptor>,
        walker: PageWalker,
        sink: Arc<dyn DeliverySink>,
        start: DateTime<Utc>,
    ) -> Self {
        let state = AdapterState::new(&sources, start);
        Self {
            sources,
            walker,
            sink,
            state,
            start,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Clamped to [`MIN_POLL_INTERVAL`]..=[`MAX_POLL_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        self
    }

    pub fn source_state(&self, key: &str) -> Option<&SourceState> {
        self.state.get(key)
    }

    /// Walk every source in order, then deliver the aggregate batch.
    ///
    /// A failing source is logged and keeps its pre-cycle watermark; the other
    /// sources proceed. Only delivery failure and cancellation end the cycle
    /// with an error.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        super::ensure_metrics_described();

        let mut report = CycleReport::default();
        let mut batch = Vec::new();

        for source in &self.sources {
            let state = self.state.entry(&source.key, self.start);
            match self.walker.walk(source, state, cancel).await {
                Ok(outcome) => {
                    report.admitted += outcome.admitted;
                    batch.extend(outcome.events);
                }
                Err(PollError::Cancelled) => return Err(CycleError::Cancelled),
                Err(e @ PollError::RateLimited { .. }) => {
                    tracing::warn!(target: "poller", source = %source.key, error = %e, "source still rate limited, retrying next cycle");
                    counter!("poller_source_errors_total", "source" => source.key.clone())
                        .increment(1);
                    report.failed_sources.push(source.key.clone());
                }
                Err(e) => {
                    tracing::error!(target: "poller", source = %source.key, error = %e, "fetch failed");
                    counter!("poller_source_errors_total", "source" => source.key.clone())
                        .increment(1);
                    report.failed_sources.push(source.key.clone());
                }
            }
        }

        if !batch.is_empty() {
            report.delivered = deliver(self.sink.as_ref(), &batch, cancel).await?;
        }

        counter!("poller_cycles_total").increment(1);
        gauge!("poller_last_cycle_ts").set(Utc::now().timestamp() as f64);
        Ok(report)
    }

    /// Tick every `interval` (first tick one interval after start) until
    /// cancelled. Returns `Err` only for unrecoverable delivery failures.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SinkError> {
        let first = Instant::now()
            .checked_add(self.interval)
            .unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(target: "poller", "poll loop exiting");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&cancel).await {
                Ok(report) => {
                    tracing::info!(
                        target: "poller",
                        admitted = report.admitted,
                        delivered = report.delivered,
                        failed = ?report.failed_sources,
                        "poll tick"
                    );
                }
                Err(CycleError::Cancelled) => {
                    tracing::debug!(target: "poller", "poll loop cancelled mid-cycle");
                    return Ok(());
                }
                Err(CycleError::Delivery(e)) => return Err(e),
            }
        }
    }
}
