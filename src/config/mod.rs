// src/config/mod.rs
pub mod vendor;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::scheduler::MAX_POLL_INTERVAL;

pub use vendor::{AbnormalSecurityConfig, DarktraceConfig, VendorConfig};

pub const ENV_CONFIG_PATH: &str = "POLLER_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/poller.toml";
pub const DEFAULT_JSON_PATH: &str = "config/poller.json";

pub const MAX_POLL_INTERVAL_SECS: u64 = MAX_POLL_INTERVAL.as_secs();
pub const MAX_LOOKBACK_SECS: u64 = 365 * 24 * 3600;

fn default_poll_interval_secs() -> u64 {
    60
}
fn default_buffer_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkOptions {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    pub vendor: VendorConfig,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How far before start-up the first cycle looks. 0 = only new events.
    #[serde(default)]
    pub lookback_secs: u64,
    #[serde(default)]
    pub sink: SinkOptions,
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    fn validate(mut self) -> Result<Self> {
        self.vendor = self.vendor.resolve()?;
        if self.poll_interval_secs == 0 {
            // Zero would spin the scheduler.
            self.poll_interval_secs = default_poll_interval_secs();
        }
        if self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            bail!(
                "poll_interval_secs {} exceeds maximum {MAX_POLL_INTERVAL_SECS}",
                self.poll_interval_secs
            );
        }
        if self.lookback_secs > MAX_LOOKBACK_SECS {
            bail!(
                "lookback_secs {} exceeds maximum {MAX_LOOKBACK_SECS}",
                self.lookback_secs
            );
        }
        if self.sink.buffer_capacity == 0 {
            self.sink.buffer_capacity = default_buffer_capacity();
        }
        Ok(self)
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<PollerConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading poller config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing poller config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $POLLER_CONFIG_PATH
/// 2) config/poller.toml
/// 3) config/poller.json
pub fn load_default() -> Result<PollerConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_TOML_PATH);
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_JSON_PATH);
    if json_p.exists() {
        return load_from(&json_p);
    }
    Err(anyhow!(
        "no poller config: set {ENV_CONFIG_PATH} or create {DEFAULT_TOML_PATH}"
    ))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PollerConfig> {
    let cfg: PollerConfig = if hint_ext == "json" || s.trim_start().starts_with('{') {
        serde_json::from_str(s).context("invalid json config")?
    } else {
        toml::from_str(s).context("invalid toml config")?
    };
    cfg.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const DT_TOML: &str = r#"
poll_interval_secs = 30

[vendor]
kind = "darktrace"
url = "https://dt.example.com/"
public_token = "pub"
private_token = "priv"
"#;

    #[test]
    fn toml_darktrace_with_defaults() {
        let cfg = parse_config(DT_TOML, "toml").unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(30));
        assert_eq!(cfg.lookback_secs, 0);
        assert_eq!(cfg.sink.buffer_capacity, 1024);
        match cfg.vendor {
            VendorConfig::Darktrace(d) => assert_eq!(d.url, "https://dt.example.com"),
            other => panic!("unexpected vendor {other:?}"),
        }
    }

    #[test]
    fn json_abnormal_without_base_url() {
        let json = r#"{"vendor": {"kind": "abnormal_security", "access_token": "tok"}, "sink": {"buffer_capacity": 16}}"#;
        let cfg = parse_config(json, "json").unwrap();
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.sink.buffer_capacity, 16);
        match cfg.vendor {
            VendorConfig::AbnormalSecurity(a) => {
                assert_eq!(a.access_token, "tok");
                assert!(a.base_url.is_none());
            }
            other => panic!("unexpected vendor {other:?}"),
        }
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let json = r#"{"vendor": {"kind": "abnormal_security", "access_token": "  "}}"#;
        let err = parse_config(json, "json").unwrap_err();
        assert!(format!("{err:#}").contains("missing access token"));

        let json = r#"{"vendor": {"kind": "darktrace", "url": "", "public_token": "a", "private_token": "b"}}"#;
        let err = parse_config(json, "json").unwrap_err();
        assert!(format!("{err:#}").contains("missing url"));
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let toml = format!("lookback_secs = 100000000000000\n{DT_TOML}");
        let err = parse_config(&toml, "toml").unwrap_err();
        assert!(format!("{err:#}").contains("lookback_secs"));

        let toml = DT_TOML.replace("poll_interval_secs = 30", "poll_interval_secs = 604801");
        let err = parse_config(&toml, "toml").unwrap_err();
        assert!(format!("{err:#}").contains("poll_interval_secs"));

        let toml = DT_TOML.replace("poll_interval_secs = 30", "poll_interval_secs = 604800\nlookback_secs = 31536000");
        let cfg = parse_config(&toml, "toml").unwrap();
        assert_eq!(cfg.lookback_secs, MAX_LOOKBACK_SECS);
    }

    #[serial_test::serial]
    #[test]
    fn env_secret_indirection() {
        env::set_var(vendor::ENV_DARKTRACE_PUBLIC_TOKEN, "pub-from-env");
        env::set_var(vendor::ENV_DARKTRACE_PRIVATE_TOKEN, "priv-from-env");
        let toml = DT_TOML
            .replace("\"pub\"", "\"ENV\"")
            .replace("\"priv\"", "\"ENV\"");
        let cfg = parse_config(&toml, "toml").unwrap();
        match cfg.vendor {
            VendorConfig::Darktrace(d) => {
                assert_eq!(d.public_token, "pub-from-env");
                assert_eq!(d.private_token, "priv-from-env");
            }
            other => panic!("unexpected vendor {other:?}"),
        }

        env::remove_var(vendor::ENV_DARKTRACE_PRIVATE_TOKEN);
        assert!(parse_config(&toml, "toml").is_err());
        env::remove_var(vendor::ENV_DARKTRACE_PUBLIC_TOKEN);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_path() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("poller.toml");
        fs::write(&p, DT_TOML).unwrap();

        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = load_default().unwrap();
        assert_eq!(cfg.poll_interval_secs, 30);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("nope.toml").display().to_string());
        assert!(load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);
    }
}
