// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod adapter;
pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod sink;
pub mod timer;

// Scripted transport + recording sink for tests.
pub mod testing;

// ---- Re-exports for stable public API ----
pub use crate::adapter::{AdapterSettings, PollingAdapter, Stopped};
pub use crate::config::PollerConfig;
pub use crate::error::{PollError, SinkError};
pub use crate::ingest::{Event, EventPayload, PollScheduler, SourceDescriptor};
pub use crate::sink::{ChannelSink, DeliverySink, JsonLinesWriter};
