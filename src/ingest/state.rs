// src/ingest/state.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::dedupe::DedupeCache;
use super::types::SourceDescriptor;

/// Progress of one logical source: the exclusive lower bound for admission
/// plus the identifiers admitted recently.
#[derive(Debug, Clone)]
pub struct SourceState {
    watermark: DateTime<Utc>,
    pub dedupe: DedupeCache,
}

impl SourceState {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            watermark: start,
            dedupe: DedupeCache::new(),
        }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    /// Move the watermark forward. Older values are ignored so the
    /// watermark never regresses.
    pub fn advance(&mut self, to: DateTime<Utc>) {
        if to > self.watermark {
            self.watermark = to;
        }
    }
}

/// All per-source state of one adapter, keyed by source key.
/// Owned by the adapter's background task.
#[derive(Debug, Default)]
pub struct AdapterState {
    sources: HashMap<String, SourceState>,
}

impl AdapterState {
    pub fn new(descriptors: &[SourceDescriptor], start: DateTime<Utc>) -> Self {
        let sources = descriptors
            .iter()
            .map(|d| (d.key.clone(), SourceState::new(start)))
            .collect();
        Self { sources }
    }

    pub fn get(&self, key: &str) -> Option<&SourceState> {
        self.sources.get(key)
    }

    /// Created on demand at `start` for keys not seen at construction.
    pub fn entry(&mut self, key: &str, start: DateTime<Utc>) -> &mut SourceState {
        self.sources
            .entry(key.to_string())
            .or_insert_with(|| SourceState::new(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn watermark_never_regresses() {
        let t0 = Utc::now();
        let mut s = SourceState::new(t0);
        s.advance(t0 + Duration::seconds(10));
        s.advance(t0);
        assert_eq!(s.watermark(), t0 + Duration::seconds(10));
    }
}
