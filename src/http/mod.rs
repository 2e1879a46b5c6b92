// src/http/mod.rs
pub mod auth;
pub mod executor;
pub mod transport;

pub use auth::{Authenticator, BearerAuth, HmacSignatureAuth};
pub use executor::RetryExecutor;
pub use transport::{HttpTransport, RawResponse, ReqwestTransport, TransportError};
