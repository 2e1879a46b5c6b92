// src/http/executor.rs
//! Authenticated GET with status classification and rate-limit backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Url;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::auth::Authenticator;
use super::transport::{HttpTransport, TransportError};
use crate::error::PollError;
use crate::ingest::types::{EventPayload, NextPage, Page, ResponseShape};
use crate::timer::{race_cancel, sleep_cancellable};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);
/// Floor for server-provided delays, so `Retry-After: 0` cannot spin.
const MIN_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn Authenticator>,
    request_timeout: Duration,
    default_backoff: Duration,
    rate_limit_budget: Option<Duration>,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            transport,
            auth,
            request_timeout: REQUEST_TIMEOUT,
            default_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            rate_limit_budget: None,
        }
    }

    pub fn with_request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn with_default_backoff(mut self, d: Duration) -> Self {
        self.default_backoff = d;
        self
    }

    /// Cap on the total 429 wait of one request. A wait that would go past it
    /// fails the request with [`PollError::RateLimited`] instead of sleeping.
    pub fn with_rate_limit_budget(mut self, budget: Duration) -> Self {
        self.rate_limit_budget = Some(budget);
        self
    }

    /// GET `url` until it yields something other than 429.
    ///
    /// 429s are retried without an attempt cap, sleeping per `Retry-After`
    /// (seconds or HTTP-date) or the default backoff, until the rate-limit
    /// budget (if any) runs out. Every wait is cut short by `cancel`.
    pub async fn execute(
        &self,
        url: &Url,
        source_key: &str,
        shape: &ResponseShape,
        cancel: &CancellationToken,
    ) -> Result<Page, PollError> {
        let mut waited = Duration::ZERO;
        loop {
            let headers = self.auth.headers(Utc::now(), url)?;
            tracing::debug!(target: "poller", source = source_key, %url, "requesting");

            let attempt = tokio::time::timeout(
                self.request_timeout,
                self.transport.get(url, headers),
            );
            let resp = match race_cancel(attempt, cancel).await {
                Err(_) => return Err(PollError::Cancelled),
                Ok(Err(_)) | Ok(Ok(Err(TransportError::Timeout))) => {
                    return Err(PollError::Timeout {
                        source_key: source_key.to_string(),
                    })
                }
                Ok(Ok(Err(TransportError::Failed(message)))) => {
                    tracing::error!(target: "poller", source = source_key, error = %message, "api do error");
                    return Err(PollError::Transport {
                        source_key: source_key.to_string(),
                        message,
                    });
                }
                Ok(Ok(Ok(resp))) => resp,
            };

            match resp.status {
                429 => {
                    let wait = resp
                        .retry_after
                        .as_deref()
                        .and_then(|v| retry_after_delay(v, Utc::now()))
                        .unwrap_or(self.default_backoff);
                    counter!("poller_http_rate_limited_total", "source" => source_key.to_string())
                        .increment(1);
                    if let Some(budget) = self.rate_limit_budget {
                        if waited.saturating_add(wait) > budget {
                            tracing::warn!(
                                target: "poller",
                                source = source_key,
                                waited_secs = waited.as_secs_f64(),
                                wait_secs = wait.as_secs_f64(),
                                "rate-limit budget spent, giving up until next cycle"
                            );
                            return Err(PollError::RateLimited {
                                source_key: source_key.to_string(),
                                waited_secs: waited.as_secs(),
                            });
                        }
                    }
                    tracing::warn!(
                        target: "poller",
                        source = source_key,
                        retry_after = ?resp.retry_after,
                        wait_secs = wait.as_secs_f64(),
                        "got 429, sleeping before retry"
                    );
                    sleep_cancellable(wait, cancel)
                        .await
                        .map_err(|_| PollError::Cancelled)?;
                    waited = waited.saturating_add(wait);
                }
                401 => {
                    return Err(PollError::Unauthorized {
                        source_key: source_key.to_string(),
                    })
                }
                200 => {
                    return decode_page(&resp.body, shape).map_err(|message| {
                        tracing::error!(target: "poller", source = source_key, error = %message, "api invalid json");
                        PollError::Decode {
                            source_key: source_key.to_string(),
                            message,
                        }
                    })
                }
                status => {
                    return Err(PollError::Status {
                        source_key: source_key.to_string(),
                        status,
                        body: String::from_utf8_lossy(&resp.body).into_owned(),
                    })
                }
            }
        }
    }
}

/// Delay requested by a `Retry-After` value: delta-seconds or an HTTP-date.
/// `None` when the value is neither.
pub fn retry_after_delay(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs).max(MIN_RATE_LIMIT_BACKOFF));
    }
    let deadline = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = (deadline - now).to_std().unwrap_or(Duration::ZERO);
    Some(delta.max(MIN_RATE_LIMIT_BACKOFF))
}

/// Decode a 200 body according to the shape the caller expects.
pub fn decode_page(body: &[u8], shape: &ResponseShape) -> Result<Page, String> {
    match shape {
        ResponseShape::Single => {
            let obj: EventPayload = serde_json::from_slice(body).map_err(|e| e.to_string())?;
            Ok(Page {
                items: vec![obj],
                has_more: false,
            })
        }
        ResponseShape::List => {
            let items: Vec<EventPayload> =
                serde_json::from_slice(body).map_err(|e| e.to_string())?;
            Ok(Page {
                items,
                has_more: false,
            })
        }
        ResponseShape::Paged { items_field, next } => {
            let root: EventPayload = serde_json::from_slice(body).map_err(|e| e.to_string())?;
            let items = match root.get(items_field) {
                None | Some(Value::Null) => Vec::new(),
                Some(v) => serde_json::from_value::<Vec<EventPayload>>(v.clone())
                    .map_err(|e| format!("field {items_field}: {e}"))?,
            };
            let has_more = match next {
                NextPage::PageNumber(f) => root.get(f).and_then(Value::as_i64).unwrap_or(0) != 0,
                NextPage::HasMore(f) => root.get(f).and_then(Value::as_bool).unwrap_or(false),
            };
            Ok(Page { items, has_more })
        }
    }
}
