// src/ingest/providers/mod.rs
//! Vendor source tables: which endpoints to poll and how to read them.

pub mod abnormal;
pub mod darktrace;

use std::sync::Arc;

use crate::http::auth::Authenticator;
use crate::ingest::types::SourceDescriptor;

pub trait VendorProfile: Send + Sync {
    fn name(&self) -> &'static str;
    fn base_url(&self) -> &str;
    fn sources(&self) -> Vec<SourceDescriptor>;
    fn authenticator(&self) -> Arc<dyn Authenticator>;
}
