// src/ingest/providers/darktrace.rs
use std::sync::Arc;

use super::VendorProfile;
use crate::config::DarktraceConfig;
use crate::http::auth::{Authenticator, HmacSignatureAuth};
use crate::ingest::types::{QueryFilter, SourceDescriptor, TimeFormat};

const AI_ANALYST: &str =
    "/aianalyst/incidentevents?includeacknowledged=true&includeincidenteventurl=true";
const MODEL_BREACHES: &str = "/modelbreaches?expandenums=true&historicmodelonly=true&includeacknowledged=true&includebreachurl=true";

/// Compact UTC timestamps used both in payloads and the signing date header.
pub const TIME_PATTERN: &str = "%Y%m%dT%H%M%S";

fn list_source(key: &str, endpoint: &str) -> SourceDescriptor {
    SourceDescriptor::list(key, endpoint, Some("id"), "detectiontime")
        .with_filter(QueryFilter::EpochMillisRange)
        .with_time_format(TimeFormat::Pattern(TIME_PATTERN.to_string()))
}

/// Network-detection platform: HMAC-signed requests, epoch-millis time range,
/// unpaginated JSON arrays.
pub fn sources() -> Vec<SourceDescriptor> {
    vec![
        list_source("aiAnalyst", AI_ANALYST),
        list_source("modelBreaches", MODEL_BREACHES),
    ]
}

impl VendorProfile for DarktraceConfig {
    fn name(&self) -> &'static str {
        "darktrace"
    }

    fn base_url(&self) -> &str {
        &self.url
    }

    fn sources(&self) -> Vec<SourceDescriptor> {
        sources()
    }

    fn authenticator(&self) -> Arc<dyn Authenticator> {
        Arc::new(
            HmacSignatureAuth::new(self.public_token.clone(), self.private_token.clone())
                .with_date_format(TimeFormat::Pattern(TIME_PATTERN.to_string())),
        )
    }
}
