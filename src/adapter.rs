// src/adapter.rs
//! Lifecycle of one polling adapter: background task, cancellation and an
//! idempotent close.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::{PollerConfig, VendorConfig};
use crate::error::SinkError;
use crate::http::auth::Authenticator;
use crate::http::executor::{RetryExecutor, DEFAULT_RATE_LIMIT_BACKOFF, REQUEST_TIMEOUT};
use crate::http::transport::{HttpTransport, ReqwestTransport};
use crate::ingest::providers::VendorProfile;
use crate::ingest::scheduler::{PollScheduler, DEFAULT_POLL_INTERVAL};
use crate::ingest::types::SourceDescriptor;
use crate::ingest::walker::PageWalker;
use crate::sink::{DeliverySink, DRAIN_TIMEOUT};

/// Tunables of one adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub name: String,
    pub base_url: String,
    pub poll_interval: Duration,
    /// Subtracted from start time to seed the watermarks.
    pub lookback: Duration,
    pub request_timeout: Duration,
    pub rate_limit_backoff: Duration,
    pub drain_timeout: Duration,
}

impl AdapterSettings {
    pub fn new(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lookback: Duration::ZERO,
            request_timeout: REQUEST_TIMEOUT,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }
}

/// `now - lookback`, or the Unix epoch when that is not representable.
fn initial_watermark(now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or_else(|| {
            tracing::warn!(target: "poller", lookback_secs = lookback.as_secs(), "lookback out of range, starting from the epoch");
            DateTime::UNIX_EPOCH
        })
}

/// Fires once the adapter has fully shut down. Cheap to clone; any number of
/// callers may wait on it.
#[derive(Debug, Clone)]
pub struct Stopped(CancellationToken);

impl Stopped {
    pub async fn wait(&self) {
        self.0.cancelled().await
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }
}

struct Shared {
    name: String,
    cancel: CancellationToken,
    stopped: CancellationToken,
    sink: Arc<dyn DeliverySink>,
    transport: Arc<dyn HttpTransport>,
    drain_timeout: Duration,
    closed: OnceCell<Result<(), SinkError>>,
}

#[derive(Clone)]
pub struct PollingAdapter {
    shared: Arc<Shared>,
}

impl PollingAdapter {
    /// Spawn the background poll loop. Must be called inside a tokio runtime.
    pub fn start(
        settings: AdapterSettings,
        sources: Vec<SourceDescriptor>,
        auth: Arc<dyn Authenticator>,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn DeliverySink>,
    ) -> (Self, Stopped) {
        // A source stuck on 429s yields to the others once it has waited a
        // whole poll interval.
        let executor = RetryExecutor::new(transport.clone(), auth)
            .with_request_timeout(settings.request_timeout)
            .with_default_backoff(settings.rate_limit_backoff)
            .with_rate_limit_budget(settings.poll_interval);
        let walker = PageWalker::new(executor, &settings.base_url);
        let start = initial_watermark(Utc::now(), settings.lookback);
        let scheduler = PollScheduler::new(sources, walker, sink.clone(), start)
            .with_interval(settings.poll_interval);

        let shared = Arc::new(Shared {
            name: settings.name,
            cancel: CancellationToken::new(),
            stopped: CancellationToken::new(),
            sink,
            transport,
            drain_timeout: settings.drain_timeout,
            closed: OnceCell::new(),
        });
        let adapter = Self { shared };
        let stopped = Stopped(adapter.shared.stopped.clone());

        let task = adapter.clone();
        tokio::spawn(async move {
            let cancel = task.shared.cancel.clone();
            if let Err(e) = scheduler.run(cancel).await {
                tracing::error!(
                    target: "poller",
                    adapter = %task.shared.name,
                    error = %e,
                    "delivery unrecoverable, shutting down"
                );
                if let Err(e) = task.close().await {
                    tracing::warn!(target: "poller", adapter = %task.shared.name, error = %e, "close after delivery failure");
                }
            }
        });

        tracing::info!(target: "poller", adapter = %adapter.shared.name, "adapter started");
        (adapter, stopped)
    }

    /// Build transport, auth and sources from validated config.
    pub fn from_config(
        cfg: &PollerConfig,
        sink: Arc<dyn DeliverySink>,
    ) -> anyhow::Result<(Self, Stopped)> {
        let profile: &dyn VendorProfile = match &cfg.vendor {
            VendorConfig::AbnormalSecurity(c) => c as &dyn VendorProfile,
            VendorConfig::Darktrace(c) => c as &dyn VendorProfile,
        };
        let mut settings = AdapterSettings::new(profile.name(), profile.base_url());
        settings.poll_interval = cfg.poll_interval();
        settings.lookback = cfg.lookback();

        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::start(
            settings,
            profile.sources(),
            profile.authenticator(),
            transport,
            sink,
        ))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.initialized()
    }

    /// Stop polling, drain and close the sink, release HTTP connections and
    /// fire [`Stopped`]. Runs once; later calls return the first result.
    pub async fn close(&self) -> Result<(), SinkError> {
        let s = &self.shared;
        s.closed
            .get_or_init(|| async {
                tracing::debug!(target: "poller", adapter = %s.name, "closing");
                s.cancel.cancel();
                let drained = s.sink.drain(s.drain_timeout).await;
                let closed = s.sink.close().await;
                s.transport.shutdown();
                s.stopped.cancel();
                drained.and(closed)
            })
            .await
            .clone()
    }
}
