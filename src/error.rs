// src/error.rs
//! Error taxonomy for the polling core.
//!
//! `PollError` covers everything that can abort a single request or a single
//! source's walk. `SinkError` is the downstream delivery contract. Config and
//! bootstrap code uses `anyhow` instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    /// 401 from the vendor. Never retried.
    #[error("{source_key}: got 401 'Unauthorized' response")]
    Unauthorized { source_key: String },

    /// Any other non-200, non-429 status.
    #[error("{source_key}: api non-200: {status}\nRESPONSE {body}")]
    Status {
        source_key: String,
        status: u16,
        body: String,
    },

    #[error("{source_key}: invalid json: {message}")]
    Decode { source_key: String, message: String },

    #[error("{source_key}: request failed: {message}")]
    Transport { source_key: String, message: String },

    #[error("{source_key}: request timed out")]
    Timeout { source_key: String },

    /// Still rate limited after spending the per-request wait budget.
    #[error("{source_key}: rate limited, gave up after waiting {waited_secs}s")]
    RateLimited { source_key: String, waited_secs: u64 },

    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    /// Credentials could not be turned into request headers.
    #[error("cannot build auth headers: {0}")]
    Auth(String),

    #[error("cancelled")]
    Cancelled,
}

impl PollError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled)
    }
}

/// Tri-state result of a downstream submission, plus the terminal states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Backpressure signal: the sink buffer stayed full for the whole wait.
    #[error("sink buffer full")]
    BufferFull,

    #[error("sink closed")]
    Closed,

    #[error("sink failure: {0}")]
    Fatal(String),

    #[error("cancelled")]
    Cancelled,
}

/// Why a poll cycle ended early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("cycle cancelled")]
    Cancelled,

    #[error("delivery failed: {0}")]
    Delivery(SinkError),
}

impl From<SinkError> for CycleError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Cancelled => CycleError::Cancelled,
            other => CycleError::Delivery(other),
        }
    }
}
