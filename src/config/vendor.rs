// src/config/vendor.rs
use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::env;

pub const ENV_ABNORMAL_ACCESS_TOKEN: &str = "ABNORMAL_ACCESS_TOKEN";
pub const ENV_DARKTRACE_PUBLIC_TOKEN: &str = "DARKTRACE_PUBLIC_TOKEN";
pub const ENV_DARKTRACE_PRIVATE_TOKEN: &str = "DARKTRACE_PRIVATE_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct AbnormalSecurityConfig {
    /// "ENV" means: read from ABNORMAL_ACCESS_TOKEN
    pub access_token: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DarktraceConfig {
    pub url: String,
    /// "ENV" means: read from DARKTRACE_PUBLIC_TOKEN
    pub public_token: String,
    /// "ENV" means: read from DARKTRACE_PRIVATE_TOKEN
    pub private_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VendorConfig {
    AbnormalSecurity(AbnormalSecurityConfig),
    Darktrace(DarktraceConfig),
}

fn resolve_secret(value: &str, env_name: &str, what: &str) -> Result<String> {
    let v = value.trim();
    let resolved = if v.eq_ignore_ascii_case("env") {
        env::var(env_name).map_err(|_| anyhow!("Missing {env_name} env var"))?
    } else {
        v.to_string()
    };
    if resolved.trim().is_empty() {
        bail!("missing {what}");
    }
    Ok(resolved)
}

fn check_url(raw: &str, what: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        bail!("missing {what}");
    }
    reqwest::Url::parse(trimmed).map_err(|e| anyhow!("invalid {what} {trimmed:?}: {e}"))?;
    Ok(trimmed.to_string())
}

impl VendorConfig {
    /// Resolve "ENV" secrets and reject missing credentials or base URL.
    pub fn resolve(self) -> Result<Self> {
        match self {
            VendorConfig::AbnormalSecurity(mut c) => {
                c.access_token =
                    resolve_secret(&c.access_token, ENV_ABNORMAL_ACCESS_TOKEN, "access token")?;
                c.base_url = match c.base_url.as_deref() {
                    Some(u) if !u.trim().is_empty() => Some(check_url(u, "base_url")?),
                    _ => None,
                };
                Ok(VendorConfig::AbnormalSecurity(c))
            }
            VendorConfig::Darktrace(mut c) => {
                c.url = check_url(&c.url, "url")?;
                c.public_token =
                    resolve_secret(&c.public_token, ENV_DARKTRACE_PUBLIC_TOKEN, "public token")?;
                c.private_token =
                    resolve_secret(&c.private_token, ENV_DARKTRACE_PRIVATE_TOKEN, "private token")?;
                Ok(VendorConfig::Darktrace(c))
            }
        }
    }
}
