// src/ingest/walker.rs
//! Drives one source through all of its result pages for one poll cycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Url;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::dedupe::content_hash_id;
use super::state::SourceState;
use super::types::{Event, EventPayload, Pagination, QueryFilter, SourceDescriptor};
use crate::error::PollError;
use crate::http::executor::RetryExecutor;

/// What one successful walk produced.
#[derive(Debug, Clone)]
pub struct WalkOutcome {
    /// Admitted events followed by any detail records fetched for them.
    pub events: Vec<Event>,
    /// Watermark after the walk (unchanged when nothing was admitted).
    pub watermark: DateTime<Utc>,
    pub requests: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub dropped: usize,
}

pub struct PageWalker {
    executor: RetryExecutor,
    base_url: String,
}

impl PageWalker {
    pub fn new(executor: RetryExecutor, base_url: &str) -> Self {
        Self {
            executor,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Listing URL for `page` (1-based) of `source`, bounded below by `since`.
    pub fn page_url(
        &self,
        source: &SourceDescriptor,
        since: DateTime<Utc>,
        page: u32,
        now: DateTime<Utc>,
    ) -> Result<Url, PollError> {
        let raw = format!("{}{}", self.base_url, source.endpoint);
        let mut url = Url::parse(&raw).map_err(|e| PollError::InvalidUrl(format!("{raw}: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            let since_str = source.time_format.format(since);
            match source.filter {
                QueryFilter::Gte => {
                    q.append_pair("filter", &format!("{} gte {}", source.time_field, since_str));
                }
                QueryFilter::Start => {
                    q.append_pair("start", &since_str);
                }
                QueryFilter::EpochMillisRange => {
                    q.append_pair("starttime", &since.timestamp_millis().to_string());
                    q.append_pair("endtime", &now.timestamp_millis().to_string());
                }
            }
            if let Pagination::PageNumber { page_size } = source.pagination {
                q.append_pair("pageNumber", &page.to_string());
                q.append_pair("pageSize", &page_size.to_string());
            }
        }
        Ok(url)
    }

    /// Walk every page of `source` and admit events newer than its watermark.
    ///
    /// On success the admissions are committed to `state` (dedupe entries,
    /// advanced watermark, pruned cache). On error `state` is left exactly as
    /// it was, so the next cycle re-requests the same window.
    pub async fn walk(
        &self,
        source: &SourceDescriptor,
        state: &mut SourceState,
        cancel: &CancellationToken,
    ) -> Result<WalkOutcome, PollError> {
        let since = state.watermark();
        let mut max_seen = since;
        let mut events = Vec::new();
        // (id, admitted_at) held back until the whole walk succeeds.
        let mut pending: Vec<(String, DateTime<Utc>)> = Vec::new();
        let mut pending_ids: HashSet<String> = HashSet::new();
        let mut requests = 0usize;
        let mut duplicates = 0usize;
        let mut dropped = 0usize;
        let mut page_no = 1u32;

        loop {
            let url = self.page_url(source, since, page_no, Utc::now())?;
            let page = self
                .executor
                .execute(&url, &source.key, &source.shape, cancel)
                .await?;
            requests += 1;
            let has_more = page.has_more;

            for payload in page.items {
                let Some(id) = identify(source, &payload) else {
                    dropped += 1;
                    continue;
                };
                if state.dedupe.contains(&id) || pending_ids.contains(&id) {
                    duplicates += 1;
                    continue;
                }
                let Some(occurred) = occurrence_time(source, &payload) else {
                    dropped += 1;
                    continue;
                };
                // Strictly after: an event sitting exactly on the watermark was
                // already delivered by an earlier cycle.
                if occurred <= since {
                    continue;
                }

                pending_ids.insert(id.clone());
                pending.push((id, Utc::now()));
                if occurred > max_seen {
                    max_seen = occurred;
                }
                events.push(Event::new(source.key.clone(), payload));
            }

            let paged = matches!(source.pagination, Pagination::PageNumber { .. });
            if !(has_more && paged) {
                break;
            }
            page_no += 1;
        }

        let admitted = events.len();
        if let Some(detail) = &source.detail {
            for (id, _) in &pending {
                match detail.fetch(&self.executor, &source.key, id, cancel).await {
                    Ok(items) => events.extend(
                        items
                            .into_iter()
                            .map(|item| Event::new(source.key.clone(), item)),
                    ),
                    Err(PollError::Cancelled) => return Err(PollError::Cancelled),
                    Err(e) => {
                        tracing::error!(target: "poller", source = %source.key, %id, error = %e, "details fetch failed");
                    }
                }
            }
        }

        for (id, at) in pending {
            state.dedupe.insert(id, at);
        }
        state.advance(max_seen);
        let pruned = state.dedupe.prune(state.watermark());

        let key = source.key.clone();
        counter!("poller_events_admitted_total", "source" => key.clone()).increment(admitted as u64);
        counter!("poller_dedupe_hits_total", "source" => key.clone()).increment(duplicates as u64);
        counter!("poller_events_dropped_total", "source" => key).increment(dropped as u64);
        tracing::debug!(
            target: "poller",
            source = %source.key,
            requests,
            admitted,
            duplicates,
            dropped,
            pruned,
            watermark = %state.watermark(),
            "walk finished"
        );

        Ok(WalkOutcome {
            events,
            watermark: state.watermark(),
            requests,
            admitted,
            duplicates,
            dropped,
        })
    }
}

/// Identifier from the declared field, or a content hash when there is none.
fn identify(source: &SourceDescriptor, payload: &EventPayload) -> Option<String> {
    match &source.id_field {
        Some(field) => match payload.get(field) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => {
                tracing::warn!(target: "poller", source = %source.key, field = %field, event = ?payload, "event id missing or not a string");
                None
            }
        },
        None => {
            let id = content_hash_id(payload);
            if id.is_none() {
                tracing::warn!(target: "poller", source = %source.key, event = ?payload, "event has no id and could not be hashed");
            }
            id
        }
    }
}

fn occurrence_time(source: &SourceDescriptor, payload: &EventPayload) -> Option<DateTime<Utc>> {
    let Some(raw) = payload.get(&source.time_field).and_then(Value::as_str) else {
        tracing::warn!(target: "poller", source = %source.key, field = %source.time_field, event = ?payload, "event time not a string");
        return None;
    };
    let parsed = source.time_format.parse(raw);
    if parsed.is_none() {
        tracing::warn!(target: "poller", source = %source.key, value = raw, "invalid timestamp");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::BearerAuth;
    use crate::ingest::types::TimeFormat;
    use crate::testing::ScriptedTransport;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn walker() -> PageWalker {
        let exec = RetryExecutor::new(
            Arc::new(ScriptedTransport::new()),
            Arc::new(BearerAuth::new("t")),
        );
        PageWalker::new(exec, "https://api.example.com/v1/")
    }

    #[test]
    fn gte_filter_with_page_params() {
        let src = SourceDescriptor::paged("threats", "/threats", Some("threatId"), "receivedTime");
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let url = walker().page_url(&src, since, 2, Utc::now()).unwrap();
        assert_eq!(url.path(), "/v1/threats");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("filter".into(), "receivedTime gte 2024-01-02T03:04:05Z".into()),
                ("pageNumber".into(), "2".into()),
                ("pageSize".into(), "100".into()),
            ]
        );
    }

    #[test]
    fn start_filter_without_paging() {
        let src = SourceDescriptor::paged("nab", "/abuse_mailbox/not_analyzed", Some("abx_message_id"), "reported_datetime")
            .with_filter(QueryFilter::Start)
            .with_pagination(Pagination::None);
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let url = walker().page_url(&src, since, 1, Utc::now()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("start".into(), "2024-01-02T03:04:05Z".into())]);
    }

    #[test]
    fn filter_bound_uses_source_time_format() {
        let src = SourceDescriptor::paged("logs", "/logs", Some("id"), "ts")
            .with_time_format(TimeFormat::Pattern("%Y%m%dT%H%M%S".into()))
            .with_pagination(Pagination::None);
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let url = walker().page_url(&src, since, 1, Utc::now()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("filter".into(), "ts gte 20240102T030405".into())]);
    }

    #[test]
    fn epoch_range_keeps_fixed_query() {
        let src = SourceDescriptor::list("modelBreaches", "/modelbreaches?expandenums=true", Some("id"), "detectiontime")
            .with_filter(QueryFilter::EpochMillisRange)
            .with_time_format(TimeFormat::Pattern("%Y%m%dT%H%M%S".into()));
        let since = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let now = Utc.timestamp_millis_opt(1_700_000_060_000).unwrap();
        let url = walker().page_url(&src, since, 1, now).unwrap();
        assert_eq!(
            url.query(),
            Some("expandenums=true&starttime=1700000000000&endtime=1700000060000")
        );
    }
}
