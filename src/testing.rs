// src/testing.rs
//! In-memory doubles for the HTTP transport and the delivery sink, used by unit
//! and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Url;

use crate::error::SinkError;
use crate::http::transport::{HttpTransport, RawResponse, TransportError};
use crate::ingest::types::Event;
use crate::sink::DeliverySink;

/// What the scripted transport does for one request.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(RawResponse),
    Fail(TransportError),
    /// Never completes; only a timeout or cancellation gets the caller out.
    Hang,
}

impl Step {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Step::Respond(RawResponse::new(status, body.to_string()))
    }
}

/// Replays queued steps. Steps queued for a URL path win over the global
/// queue; once both are empty the fallback response is returned.
pub struct ScriptedTransport {
    by_path: Mutex<HashMap<String, VecDeque<Step>>>,
    global: Mutex<VecDeque<Step>>,
    fallback: Mutex<RawResponse>,
    requests: Mutex<Vec<(Url, HeaderMap)>>,
    shut_down: AtomicBool,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            by_path: Mutex::new(HashMap::new()),
            global: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(RawResponse::new(200, "{}")),
            requests: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn push(&self, step: Step) -> &Self {
        self.global.lock().unwrap().push_back(step);
        self
    }

    /// Queue a step for requests whose URL path equals `path`.
    pub fn push_for(&self, path: &str, step: Step) -> &Self {
        self.by_path
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn set_fallback(&self, resp: RawResponse) {
        *self.fallback.lock().unwrap() = resp;
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.clone())
            .collect()
    }

    pub fn request_headers(&self) -> Vec<HeaderMap> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &Url) -> Step {
        if let Some(q) = self.by_path.lock().unwrap().get_mut(url.path()) {
            if let Some(step) = q.pop_front() {
                return step;
            }
        }
        if let Some(step) = self.global.lock().unwrap().pop_front() {
            return step;
        }
        Step::Respond(self.fallback.lock().unwrap().clone())
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<RawResponse, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Failed("transport shut down".into()));
        }
        self.requests.lock().unwrap().push((url.clone(), headers));
        match self.next_step(url) {
            Step::Respond(r) => Ok(r),
            Step::Fail(e) => Err(e),
            Step::Hang => std::future::pending().await,
        }
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// One `submit` call seen by [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub event: Event,
    pub timestamp: DateTime<Utc>,
    pub wait: Duration,
    pub result: Result<(), SinkError>,
}

/// Records every submission. Scripted results are consumed in order, after
/// which submissions succeed.
pub struct RecordingSink {
    script: Mutex<VecDeque<Result<(), SinkError>>>,
    submissions: Mutex<Vec<Submission>>,
    drain_result: Mutex<Result<(), SinkError>>,
    drains: AtomicUsize,
    closes: AtomicUsize,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            drain_result: Mutex::new(Ok(())),
            drains: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn push_result(&self, r: Result<(), SinkError>) -> &Self {
        self.script.lock().unwrap().push_back(r);
        self
    }

    pub fn set_drain_result(&self, r: Result<(), SinkError>) {
        *self.drain_result.lock().unwrap() = r;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    /// Events whose submission succeeded, in order.
    pub fn accepted(&self) -> Vec<Event> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.result.is_ok())
            .map(|s| s.event.clone())
            .collect()
    }

    pub fn drain_count(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DeliverySink for RecordingSink {
    async fn submit(
        &self,
        event: &Event,
        timestamp: DateTime<Utc>,
        wait: Duration,
    ) -> Result<(), SinkError> {
        let result = if self.closes.load(Ordering::SeqCst) > 0 {
            Err(SinkError::Closed)
        } else {
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        };
        self.submissions.lock().unwrap().push(Submission {
            event: event.clone(),
            timestamp,
            wait,
            result: result.clone(),
        });
        result
    }

    async fn drain(&self, _timeout: Duration) -> Result<(), SinkError> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        self.drain_result.lock().unwrap().clone()
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
