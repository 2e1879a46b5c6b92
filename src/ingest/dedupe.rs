// src/ingest/dedupe.rs
//! Per-source identifier cache suppressing re-delivery across overlapping
//! poll windows.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::types::EventPayload;

/// Entries admitted earlier than `watermark - PRUNE_GRACE` are evicted.
pub const PRUNE_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone, Default)]
pub struct DedupeCache {
    admitted: HashMap<String, DateTime<Utc>>,
}

impl DedupeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.admitted.contains_key(id)
    }

    pub fn insert(&mut self, id: String, admitted_at: DateTime<Utc>) {
        self.admitted.insert(id, admitted_at);
    }

    /// Drop entries admitted before `watermark - 1 minute`. Returns how many went.
    pub fn prune(&mut self, watermark: DateTime<Utc>) -> usize {
        let cutoff = watermark - Duration::seconds(PRUNE_GRACE_SECS);
        let before = self.admitted.len();
        self.admitted.retain(|_, at| *at >= cutoff);
        before - self.admitted.len()
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

/// Deterministic identifier for events without an id field.
///
/// serde_json maps are key-sorted, so the serialization is order-stable and
/// identical objects hash to the same key regardless of field order on the wire.
pub fn content_hash_id(payload: &EventPayload) -> Option<String> {
    let bytes = serde_json::to_vec(&Value::Object(payload.clone())).ok()?;
    Some(xxhash_rust::xxh3::xxh3_64(&bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn obj(v: Value) -> EventPayload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn prune_respects_one_minute_grace() {
        let wm = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut c = DedupeCache::new();
        c.insert("old".into(), wm - Duration::seconds(61));
        c.insert("edge".into(), wm - Duration::seconds(60));
        c.insert("fresh".into(), wm);

        assert_eq!(c.prune(wm), 1);
        assert!(!c.contains("old"));
        assert!(c.contains("edge"));
        assert!(c.contains("fresh"));
    }

    #[test]
    fn content_hash_ignores_field_order() {
        let a = obj(json!({"user": "x", "action": "login", "timestamp": "2024-01-01T00:00:00Z"}));
        let b = obj(json!({"timestamp": "2024-01-01T00:00:00Z", "action": "login", "user": "x"}));
        assert_eq!(content_hash_id(&a), content_hash_id(&b));
    }

    #[test]
    fn content_hash_differs_when_content_differs() {
        let a = obj(json!({"action": "login"}));
        let b = obj(json!({"action": "logout"}));
        assert_ne!(content_hash_id(&a), content_hash_id(&b));
    }
}
