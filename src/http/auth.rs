// src/http/auth.rs
//! Request credentials. Pure functions of (secret, time, url).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use sha1::Sha1;

use crate::error::PollError;
use crate::ingest::types::TimeFormat;

type HmacSha1 = Hmac<Sha1>;

pub trait Authenticator: Send + Sync {
    fn headers(&self, now: DateTime<Utc>, url: &Url) -> Result<HeaderMap, PollError>;
}

fn header_value(v: &str) -> Result<HeaderValue, PollError> {
    HeaderValue::from_str(v).map_err(|e| PollError::Auth(e.to_string()))
}

/// Static `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authenticator for BearerAuth {
    fn headers(&self, _now: DateTime<Utc>, _url: &Url) -> Result<HeaderMap, PollError> {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, header_value(&format!("Bearer {}", self.token))?);
        h.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(h)
    }
}

/// HMAC signature over `path?query \n public_token \n formatted_time`,
/// keyed by the private token (Darktrace style).
#[derive(Clone)]
pub struct HmacSignatureAuth {
    public_token: String,
    private_token: String,
    date_format: TimeFormat,
}

const TOKEN_HEADER: HeaderName = HeaderName::from_static("dtapi-token");
const DATE_HEADER: HeaderName = HeaderName::from_static("dtapi-date");
const SIGNATURE_HEADER: HeaderName = HeaderName::from_static("dtapi-signature");

impl HmacSignatureAuth {
    pub fn new(public_token: impl Into<String>, private_token: impl Into<String>) -> Self {
        Self {
            public_token: public_token.into(),
            private_token: private_token.into(),
            date_format: TimeFormat::Pattern("%Y%m%dT%H%M%S".to_string()),
        }
    }

    pub fn with_date_format(mut self, date_format: TimeFormat) -> Self {
        self.date_format = date_format;
        self
    }

    /// Hex signature for an already formatted time string.
    pub fn signature(&self, formatted_time: &str, url: &Url) -> Result<String, PollError> {
        if url.cannot_be_a_base() {
            return Err(PollError::InvalidUrl(url.to_string()));
        }
        let request_uri = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let payload = format!("{}\n{}\n{}", request_uri, self.public_token, formatted_time);
        sign_payload(&self.private_token, &payload)
    }
}

fn sign_payload(key: &str, payload: &str) -> Result<String, PollError> {
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).map_err(|e| PollError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl Authenticator for HmacSignatureAuth {
    fn headers(&self, now: DateTime<Utc>, url: &Url) -> Result<HeaderMap, PollError> {
        let date = self.date_format.format(now);
        let signature = self.signature(&date, url)?;

        let mut h = HeaderMap::new();
        h.insert(TOKEN_HEADER, header_value(&self.public_token)?);
        h.insert(DATE_HEADER, header_value(&date)?);
        h.insert(SIGNATURE_HEADER, header_value(&signature)?);
        h.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        Ok(h)
    }
}
