// src/http/transport.rs
//! One GET, no policy. Status classification and retries live in the executor.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Url};

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if any.
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, v: &str) -> Self {
        self.retry_after = Some(v.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Failed(String),
}

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<RawResponse, TransportError>;

    /// Release pooled connections. Requests issued afterwards fail.
    fn shutdown(&self) {}
}

/// Production transport backed by a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: RwLock<Option<Client>>,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("saas-event-poller/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }

    fn client(&self) -> Option<Client> {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<RawResponse, TransportError> {
        let Some(client) = self.client() else {
            return Err(TransportError::Failed("transport shut down".into()));
        };

        let resp = client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(map_reqwest_err)?.to_vec();

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }

    fn shutdown(&self) {
        // Dropping the last client handle closes its idle pool.
        let taken = match self.client.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(taken);
    }
}

fn map_reqwest_err(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(e.to_string())
    }
}
