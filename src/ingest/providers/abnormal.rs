// src/ingest/providers/abnormal.rs
use std::sync::Arc;

use super::VendorProfile;
use crate::config::AbnormalSecurityConfig;
use crate::http::auth::{Authenticator, BearerAuth};
use crate::ingest::types::{
    DetailEndpoint, Pagination, QueryFilter, ResponseShape, SourceDescriptor,
};

pub const DEFAULT_BASE_URL: &str = "https://api.abnormalplatform.com/v1";

const ABUSE_CAMPAIGNS: &str = "/abusecampaigns";
const ABUSE_NOT_ANALYZED: &str = "/abuse_mailbox/not_analyzed";
const AUDIT_LOGS: &str = "/auditlogs";
const CASES: &str = "/cases";
const THREATS: &str = "/threats";
const VENDOR_CASES: &str = "/vendor-cases";

/// Email-security platform: bearer auth, `filter=<field> gte <time>` with
/// numbered pages, per-id detail records for campaigns, cases and threats.
pub fn sources(base_url: &str) -> Vec<SourceDescriptor> {
    let detail = |endpoint: &str| Arc::new(DetailEndpoint::new(base_url, endpoint));

    vec![
        SourceDescriptor::paged("abuseCampaigns", ABUSE_CAMPAIGNS, Some("campaignId"), "receivedTime")
            .with_shape(ResponseShape::paged("campaigns"))
            .with_detail(detail(ABUSE_CAMPAIGNS)),
        SourceDescriptor::paged(
            "abuseCampaignsNotAnalyzed",
            ABUSE_NOT_ANALYZED,
            Some("abx_message_id"),
            "reported_datetime",
        )
        .with_shape(ResponseShape::paged("results"))
        .with_filter(QueryFilter::Start)
        .with_pagination(Pagination::None),
        // Audit log entries carry no id; they are keyed by content hash.
        SourceDescriptor::paged("auditLogs", AUDIT_LOGS, None, "timestamp")
            .with_shape(ResponseShape::paged("auditLogs")),
        SourceDescriptor::paged("cases", CASES, Some("caseId"), "lastModifiedTime")
            .with_shape(ResponseShape::paged("cases"))
            .with_detail(detail(CASES)),
        SourceDescriptor::paged("threats", THREATS, Some("threatId"), "receivedTime")
            .with_shape(ResponseShape::paged("threats"))
            .with_detail(detail(THREATS)),
        SourceDescriptor::paged("vendorCases", VENDOR_CASES, Some("vendorCaseId"), "lastModifiedTime")
            .with_shape(ResponseShape::paged("vendorCases"))
            .with_detail(detail(VENDOR_CASES)),
    ]
}

impl VendorProfile for AbnormalSecurityConfig {
    fn name(&self) -> &'static str {
        "abnormal_security"
    }

    fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn sources(&self) -> Vec<SourceDescriptor> {
        sources(self.base_url())
    }

    fn authenticator(&self) -> Arc<dyn Authenticator> {
        Arc::new(BearerAuth::new(self.access_token.clone()))
    }
}
