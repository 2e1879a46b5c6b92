// src/ingest/types.rs
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::PollError;
use crate::http::executor::RetryExecutor;

/// Raw vendor object. No schema beyond the id/time fields the walker inspects.
pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Logical key of the source that produced the event, e.g. "threats".
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }
}

/// How a source encodes its occurrence time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeFormat {
    Rfc3339,
    /// chrono strftime pattern, interpreted as UTC (e.g. `%Y%m%dT%H%M%S`).
    Pattern(String),
}

impl TimeFormat {
    pub fn parse(&self, raw: &str) -> Option<DateTime<Utc>> {
        match self {
            TimeFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimeFormat::Pattern(p) => NaiveDateTime::parse_from_str(raw, p)
                .ok()
                .map(|n| n.and_utc()),
        }
    }

    pub fn format(&self, t: DateTime<Utc>) -> String {
        match self {
            TimeFormat::Rfc3339 => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            TimeFormat::Pattern(p) => t.format(p).to_string(),
        }
    }
}

/// Lower-bound filter appended to the listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFilter {
    /// `filter=<time_field> gte <rfc3339>`
    Gte,
    /// `start=<rfc3339>`
    Start,
    /// `starttime=<ms>&endtime=<now ms>`
    EpochMillisRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    None,
    PageNumber { page_size: u32 },
}

/// "Is there another page" indicator of a paged collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    /// Numeric field; nonzero means another page exists.
    PageNumber(String),
    /// Boolean field.
    HasMore(String),
}

/// Expected body of a 200 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    Paged { items_field: String, next: NextPage },
    /// Exactly one object, never paginated.
    Single,
    /// Top-level JSON array, never paginated.
    List,
}

impl ResponseShape {
    pub fn paged(items_field: &str) -> Self {
        ResponseShape::Paged {
            items_field: items_field.to_string(),
            next: NextPage::PageNumber("nextPageNumber".to_string()),
        }
    }
}

/// Decoded response: the items plus whether to keep paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<EventPayload>,
    pub has_more: bool,
}

impl Page {
    pub fn items(&self) -> &[EventPayload] {
        &self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}

/// Secondary per-id request turning a summary into a detailed record.
#[async_trait::async_trait]
pub trait DetailFetch: Send + Sync {
    async fn fetch(
        &self,
        executor: &RetryExecutor,
        source_key: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventPayload>, PollError>;
}

/// `GET <base><endpoint>/<id>` decoded as a single object.
#[derive(Debug, Clone)]
pub struct DetailEndpoint {
    pub base_url: String,
    pub endpoint: String,
}

impl DetailEndpoint {
    pub fn new(base_url: &str, endpoint: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, id: &str) -> Result<reqwest::Url, PollError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, self.endpoint))
            .map_err(|e| PollError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| PollError::InvalidUrl(format!("cannot append id to {}", self.base_url)))?
            .push(id);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl DetailFetch for DetailEndpoint {
    async fn fetch(
        &self,
        executor: &RetryExecutor,
        source_key: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventPayload>, PollError> {
        let url = self.url_for(id)?;
        let page = executor
            .execute(&url, source_key, &ResponseShape::Single, cancel)
            .await?;
        Ok(page.items)
    }
}

/// Static per-API configuration. Shared read-only across cycles.
#[derive(Clone)]
pub struct SourceDescriptor {
    pub key: String,
    /// Path relative to the base URL; may carry a fixed query string.
    pub endpoint: String,
    /// `None` means identifiers are derived from a content hash.
    pub id_field: Option<String>,
    pub time_field: String,
    pub time_format: TimeFormat,
    pub filter: QueryFilter,
    pub pagination: Pagination,
    pub shape: ResponseShape,
    pub detail: Option<Arc<dyn DetailFetch>>,
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("id_field", &self.id_field)
            .field("time_field", &self.time_field)
            .field("time_format", &self.time_format)
            .field("filter", &self.filter)
            .field("pagination", &self.pagination)
            .field("shape", &self.shape)
            .field("detail", &self.detail.is_some())
            .finish()
    }
}

impl SourceDescriptor {
    /// Paged RFC3339 source using `filter=... gte ...` and numeric pages of 100.
    pub fn paged(key: &str, endpoint: &str, id_field: Option<&str>, time_field: &str) -> Self {
        Self {
            key: key.to_string(),
            endpoint: endpoint.to_string(),
            id_field: id_field.map(str::to_string),
            time_field: time_field.to_string(),
            time_format: TimeFormat::Rfc3339,
            filter: QueryFilter::Gte,
            pagination: Pagination::PageNumber { page_size: 100 },
            shape: ResponseShape::paged(key),
            detail: None,
        }
    }

    /// Unpaginated source whose response is a top-level JSON array.
    pub fn list(key: &str, endpoint: &str, id_field: Option<&str>, time_field: &str) -> Self {
        Self {
            key: key.to_string(),
            endpoint: endpoint.to_string(),
            id_field: id_field.map(str::to_string),
            time_field: time_field.to_string(),
            time_format: TimeFormat::Rfc3339,
            filter: QueryFilter::Gte,
            pagination: Pagination::None,
            shape: ResponseShape::List,
            detail: None,
        }
    }

    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_time_format(mut self, time_format: TimeFormat) -> Self {
        self.time_format = time_format;
        self
    }

    pub fn with_detail(mut self, detail: Arc<dyn DetailFetch>) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_parse_and_format() {
        let f = TimeFormat::Rfc3339;
        let t = f.parse("2024-03-01T10:00:05Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).unwrap());
        assert_eq!(f.format(t), "2024-03-01T10:00:05Z");
        assert!(f.parse("yesterday").is_none());
    }

    #[test]
    fn compact_pattern_is_utc() {
        let f = TimeFormat::Pattern("%Y%m%dT%H%M%S".into());
        let t = f.parse("20240301T100005").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).unwrap());
        assert_eq!(f.format(t), "20240301T100005");
    }

    #[test]
    fn list_source_is_unpaged() {
        let s = SourceDescriptor::list("breaches", "/modelbreaches", Some("id"), "detectiontime");
        assert_eq!(s.shape, ResponseShape::List);
        assert_eq!(s.pagination, Pagination::None);
        assert!(s.detail.is_none());
    }

    #[test]
    fn detail_url_appends_escaped_id() {
        let d = DetailEndpoint::new("https://api.example.com/v1/", "/cases");
        let url = d.url_for("abc 1").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/cases/abc%201");
    }
}
