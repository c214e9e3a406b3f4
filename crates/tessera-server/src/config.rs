//! Server configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use tessera_core::Config;

use crate::server::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds, `host:port`
    pub listen_addr: String,
    /// Budget for requests that do not carry their own `timeout_ms`
    pub default_timeout: Duration,
    /// Longest request line accepted, newline excluded
    pub max_frame_bytes: usize,
    /// Engine settings
    pub engine: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            default_timeout: Duration::from_millis(5000),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            engine: Config::default(),
        }
    }
}

impl ServerConfig {
    /// `PORT`, `TESSERA_REQUEST_TIMEOUT_MS` and `TESSERA_MAX_FRAME_BYTES`, plus everything
    /// [`Config::from_env`] reads.
    pub fn from_env() -> Result<Self> {
        let engine = Config::from_env().context("invalid engine configuration")?;
        Self::from_lookup(|name| std::env::var(name).ok(), engine)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, engine: Config) -> Result<Self> {
        let mut config = Self { engine, ..Self::default() };

        if let Some(port) = lookup("PORT").filter(|p| !p.is_empty()) {
            let port: u16 = port.parse().with_context(|| format!("PORT is not a valid port: '{}'", port))?;
            config.listen_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(ms) = lookup("TESSERA_REQUEST_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("TESSERA_REQUEST_TIMEOUT_MS is not a number: '{}'", ms))?;
            anyhow::ensure!(ms > 0, "TESSERA_REQUEST_TIMEOUT_MS must be > 0");
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = lookup("TESSERA_MAX_FRAME_BYTES") {
            let bytes: usize = bytes
                .parse()
                .with_context(|| format!("TESSERA_MAX_FRAME_BYTES is not a number: '{}'", bytes))?;
            anyhow::ensure!(bytes > 0, "TESSERA_MAX_FRAME_BYTES must be > 0");
            config.max_frame_bytes = bytes;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name: &str| pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[]), Config::default()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn test_port_and_timeout() {
        let config = ServerConfig::from_lookup(
            lookup(&[("PORT", "9090"), ("TESSERA_REQUEST_TIMEOUT_MS", "250")]),
            Config::default(),
        )
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9090");
        assert_eq!(config.default_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_frame_cap() {
        let config =
            ServerConfig::from_lookup(lookup(&[("TESSERA_MAX_FRAME_BYTES", "4096")]), Config::default()).unwrap();
        assert_eq!(config.max_frame_bytes, 4096);
        assert!(ServerConfig::from_lookup(lookup(&[("TESSERA_MAX_FRAME_BYTES", "0")]), Config::default()).is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "http")]), Config::default()).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "70000")]), Config::default()).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("TESSERA_REQUEST_TIMEOUT_MS", "0")]), Config::default()).is_err());
    }
}
