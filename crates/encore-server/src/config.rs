//! Runtime configuration, read from `ENCORE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use encore_db::{RetryPolicy, StoreConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults;
    /// set but unparsable values are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let max_attempts: u32 = parse(&lookup, "ENCORE_TX_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            bail!("ENCORE_TX_MAX_ATTEMPTS must be at least 1");
        }

        let store = StoreConfig {
            dedup_window: millis(&lookup, "ENCORE_DEDUP_WINDOW_MS", 5000)?,
            tx_max_wait: millis(&lookup, "ENCORE_TX_MAX_WAIT_MS", 5000)?,
            tx_timeout: millis(&lookup, "ENCORE_TX_TIMEOUT_MS", 10_000)?,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: millis(&lookup, "ENCORE_TX_BACKOFF_MS", 100)?,
            },
        };

        Ok(Self {
            host: string("ENCORE_HOST", "0.0.0.0"),
            port: parse(&lookup, "ENCORE_PORT", 3000)?,
            db_path: PathBuf::from(string("ENCORE_DB_PATH", "encore.db")),
            jwt_secret: string("ENCORE_JWT_SECRET", "dev-secret-change-me"),
            store,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    parse(lookup, key, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("encore.db"));
        assert_eq!(config.store.dedup_window, Duration::from_secs(5));
        assert_eq!(config.store.tx_timeout, Duration::from_secs(10));
        assert_eq!(config.store.retry.max_attempts, 3);
        assert_eq!(config.store.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("ENCORE_PORT", "8080"),
            ("ENCORE_DEDUP_WINDOW_MS", "250"),
            ("ENCORE_TX_MAX_ATTEMPTS", "5"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store.dedup_window, Duration::from_millis(250));
        assert_eq!(config.store.retry.max_attempts, 5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config(&[("ENCORE_PORT", "not-a-port")]).is_err());
        assert!(config(&[("ENCORE_TX_TIMEOUT_MS", "-1")]).is_err());
        assert!(config(&[("ENCORE_TX_MAX_ATTEMPTS", "0")]).is_err());
    }
}
