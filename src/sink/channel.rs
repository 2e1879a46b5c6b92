// src/sink/channel.rs
//! In-process sink: a bounded tokio channel whose receiver feeds whatever ships
//! events onward. `JsonLinesWriter` is the consumer used by the binary.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use super::DeliverySink;
use crate::error::SinkError;
use crate::ingest::types::{Event, EventPayload};

#[derive(Debug, Clone)]
pub struct Delivered {
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}

pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<Delivered>>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivered>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn sender(&self) -> Option<mpsc::Sender<Delivered>> {
        match self.tx.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl DeliverySink for ChannelSink {
    async fn submit(
        &self,
        event: &Event,
        timestamp: DateTime<Utc>,
        wait: Duration,
    ) -> Result<(), SinkError> {
        let tx = self.sender().ok_or(SinkError::Closed)?;
        let item = Delivered {
            event: event.clone(),
            timestamp,
        };
        match tx.send_timeout(item, wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::BufferFull),
            Err(SendTimeoutError::Closed(_)) => {
                Err(SinkError::Fatal("downstream receiver dropped".into()))
            }
        }
    }

    async fn drain(&self, timeout: Duration) -> Result<(), SinkError> {
        let Some(tx) = self.sender() else {
            return Ok(());
        };
        let wait_empty = async {
            loop {
                if tx.capacity() == tx.max_capacity() {
                    return Ok(());
                }
                if tx.is_closed() {
                    return Err(SinkError::Fatal(format!(
                        "downstream receiver dropped with {} pending",
                        tx.max_capacity() - tx.capacity()
                    )));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        match tokio::time::timeout(timeout, wait_empty).await {
            Ok(res) => res,
            Err(_) => Err(SinkError::Fatal(format!(
                "drain timed out with {} pending",
                tx.max_capacity() - tx.capacity()
            ))),
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        let taken = match self.tx.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(taken);
        Ok(())
    }
}

#[derive(Serialize)]
struct Line<'a> {
    source: &'a str,
    ts_ms: i64,
    event: &'a EventPayload,
}

/// Writes each delivered event as one JSON line until the sink is closed.
pub struct JsonLinesWriter<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub async fn run(&mut self, mut rx: mpsc::Receiver<Delivered>) -> std::io::Result<usize> {
        let mut n = 0usize;
        while let Some(d) = rx.recv().await {
            let line = Line {
                source: &d.event.source,
                ts_ms: d.timestamp.timestamp_millis(),
                event: &d.event.payload,
            };
            let mut buf = serde_json::to_vec(&line)?;
            buf.push(b'\n');
            self.out.write_all(&buf).await?;
            n += 1;
        }
        self.out.flush().await?;
        Ok(n)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(id: &str) -> Event {
        Event::new("threats", json!({ "threatId": id }).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn full_buffer_reports_backpressure() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.submit(&ev("a"), Utc::now(), Duration::from_millis(10))
            .await
            .unwrap();
        let err = sink
            .submit(&ev("b"), Utc::now(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, SinkError::BufferFull);
    }

    #[tokio::test]
    async fn dropped_receiver_is_fatal() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        let err = sink
            .submit(&ev("a"), Utc::now(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Fatal(_)));
    }

    #[tokio::test]
    async fn drain_waits_for_consumer_then_close_ends_writer() {
        let (sink, rx) = ChannelSink::new(8);
        for id in ["a", "b", "c"] {
            sink.submit(&ev(id), Utc::now(), Duration::from_secs(1))
                .await
                .unwrap();
        }
        let writer = tokio::spawn(async move { JsonLinesWriter::new(Vec::new()).run(rx).await });
        sink.drain(Duration::from_secs(5)).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(writer.await.unwrap().unwrap(), 3);

        let err = sink
            .submit(&ev("d"), Utc::now(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, SinkError::Closed);
    }

    #[tokio::test]
    async fn drain_times_out_without_consumer() {
        let (sink, _rx) = ChannelSink::new(2);
        sink.submit(&ev("a"), Utc::now(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = sink.drain(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SinkError::Fatal(_)));
    }

    #[tokio::test]
    async fn writer_emits_json_lines() {
        let (sink, rx) = ChannelSink::new(4);
        sink.submit(&ev("x"), Utc::now(), Duration::from_secs(1))
            .await
            .unwrap();
        sink.close().await.unwrap();

        let mut writer = JsonLinesWriter::new(Vec::new());
        assert_eq!(writer.run(rx).await.unwrap(), 1);
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let v: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(v["source"], "threats");
        assert_eq!(v["event"]["threatId"], "x");
        assert!(v["ts_ms"].as_i64().unwrap() > 0);
    }
}
