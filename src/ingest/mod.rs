// src/ingest/mod.rs
pub mod dedupe;
pub mod providers;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod walker;

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

pub use dedupe::DedupeCache;
pub use scheduler::{CycleReport, PollScheduler};
pub use state::{AdapterState, SourceState};
pub use types::{Event, EventPayload, SourceDescriptor};
pub use walker::{PageWalker, WalkOutcome};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "poller_events_admitted_total",
            "Events admitted after dedupe + watermark filtering."
        );
        describe_counter!(
            "poller_events_dropped_total",
            "Events dropped for a malformed id or time field."
        );
        describe_counter!(
            "poller_dedupe_hits_total",
            "Events suppressed because their id was already admitted."
        );
        describe_counter!(
            "poller_http_rate_limited_total",
            "429 responses received from vendor APIs."
        );
        describe_counter!(
            "poller_source_errors_total",
            "Source walks aborted by an error."
        );
        describe_counter!(
            "poller_events_delivered_total",
            "Events accepted by the downstream sink."
        );
        describe_counter!("poller_cycles_total", "Completed poll cycles.");
        describe_gauge!(
            "poller_last_cycle_ts",
            "Unix ts when the last poll cycle finished."
        );
    });
}
