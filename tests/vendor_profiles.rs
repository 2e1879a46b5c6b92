// tests/vendor_profiles.rs
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use saas_event_poller::config::{AbnormalSecurityConfig, DarktraceConfig};
use saas_event_poller::http::RetryExecutor;
use saas_event_poller::ingest::providers::VendorProfile;
use saas_event_poller::ingest::{PageWalker, SourceState};
use saas_event_poller::testing::{ScriptedTransport, Step};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn darktrace() -> DarktraceConfig {
    DarktraceConfig {
        url: "https://dt.example.com".into(),
        public_token: "pub".into(),
        private_token: "priv".into(),
    }
}

#[tokio::test]
async fn darktrace_breaches_use_compact_times_and_signed_requests() {
    let profile = darktrace();
    let t = Arc::new(ScriptedTransport::new());
    t.push(Step::json(
        200,
        json!([
            { "id": "b1", "detectiontime": "20240101T000500", "model": "x" },
            { "id": "b0", "detectiontime": "20231231T235900" },
        ]),
    ));
    let exec = RetryExecutor::new(t.clone(), profile.authenticator());
    let walker = PageWalker::new(exec, profile.base_url());
    let sources = profile.sources();
    let breaches = sources.iter().find(|s| s.key == "modelBreaches").unwrap();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut state = SourceState::new(start);
    let out = walker
        .walk(breaches, &mut state, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.admitted, 1);
    assert_eq!(out.events[0].payload["id"], "b1");
    assert_eq!(state.watermark(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap());

    let url = &t.requests()[0];
    assert_eq!(url.path(), "/modelbreaches");
    let q = url.query().unwrap();
    assert!(q.starts_with("expandenums=true"));
    assert!(q.contains(&format!("starttime={}", start.timestamp_millis())));
    assert!(q.contains("endtime="));

    let headers = &t.request_headers()[0];
    assert_eq!(headers["dtapi-token"].to_str().unwrap(), "pub");
    assert!(headers.contains_key("dtapi-signature"));
}

#[test]
fn abnormal_defaults_to_public_api() {
    let cfg = AbnormalSecurityConfig {
        access_token: "tok".into(),
        base_url: None,
    };
    assert_eq!(cfg.name(), "abnormal_security");
    assert_eq!(cfg.base_url(), "https://api.abnormalplatform.com/v1");
    let keys: Vec<_> = cfg.sources().into_iter().map(|s| s.key).collect();
    assert_eq!(
        keys,
        [
            "abuseCampaigns",
            "abuseCampaignsNotAnalyzed",
            "auditLogs",
            "cases",
            "threats",
            "vendorCases"
        ]
    );
}

#[tokio::test]
async fn abnormal_threat_detail_uses_configured_base() {
    let cfg = AbnormalSecurityConfig {
        access_token: "tok".into(),
        base_url: Some("https://eu.example.com/v1".into()),
    };
    let t = Arc::new(ScriptedTransport::new());
    t.push_for(
        "/v1/threats",
        Step::json(
            200,
            json!({ "threats": [{ "threatId": "th-1", "receivedTime": "2024-01-01T00:00:01Z" }] }),
        ),
    );
    t.push_for(
        "/v1/threats/th-1",
        Step::json(200, json!({ "threatId": "th-1", "messages": [] })),
    );
    let exec = RetryExecutor::new(t.clone(), cfg.authenticator());
    let walker = PageWalker::new(exec, cfg.base_url());
    let sources = cfg.sources();
    let threats = sources.iter().find(|s| s.key == "threats").unwrap();

    let mut state = SourceState::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let out = walker
        .walk(threats, &mut state, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.events.len(), 2);
    let urls = t.requests();
    assert_eq!(urls[1].as_str(), "https://eu.example.com/v1/threats/th-1");
    let auth = &t.request_headers()[0]["authorization"];
    assert_eq!(auth.to_str().unwrap(), "Bearer tok");
}
