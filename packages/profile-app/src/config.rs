use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Endpoint returning `{"name": "..."}`. Unset means the static service.
    pub name_url: Option<String>,
    /// Name served by the static service.
    pub fallback_name: String,
    /// Ticker period. `None` disables the ticker.
    pub tick: Option<Duration>,
    pub settle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name_url = lookup("PROFILE_NAME_URL").filter(|url| !url.trim().is_empty());

        let fallback_name =
            lookup("PROFILE_FALLBACK_NAME").unwrap_or_else(|| "Andrew".to_string());

        let tick_ms: u64 = lookup("PROFILE_TICK_MS")
            .unwrap_or_else(|| "1000".to_string())
            .parse()
            .context("PROFILE_TICK_MS must be a valid number of milliseconds")?;

        let settle_ms: u64 = lookup("PROFILE_SETTLE_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".to_string())
            .parse()
            .context("PROFILE_SETTLE_TIMEOUT_MS must be a valid number of milliseconds")?;

        Ok(Self {
            name_url,
            fallback_name,
            tick: (tick_ms > 0).then(|| Duration::from_millis(tick_ms)),
            settle_timeout: Duration::from_millis(settle_ms),
        })
    }
}
