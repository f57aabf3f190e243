use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_OUTPUT_INTERVAL_MS: u64 = 1000;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend origin without a trailing slash
    pub api_url: String,
    /// Canvas poll period
    pub poll_interval: Duration,
    /// Output log poll period
    pub output_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            output_interval: Duration::from_millis(DEFAULT_OUTPUT_INTERVAL_MS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `NODY_API_URL`: backend base URL (default `http://localhost:8000`)
    /// - `NODY_POLL_INTERVAL_MS`: canvas poll period in milliseconds (default 500)
    /// - `NODY_OUTPUT_INTERVAL_MS`: output poll period in milliseconds (default 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = match lookup("NODY_API_URL") {
            Some(raw) if !raw.trim().is_empty() => normalize_url(raw.trim())?,
            _ => DEFAULT_API_URL.to_string(),
        };

        Ok(Self {
            api_url,
            poll_interval: interval(&lookup, "NODY_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            output_interval: interval(
                &lookup,
                "NODY_OUTPUT_INTERVAL_MS",
                DEFAULT_OUTPUT_INTERVAL_MS,
            )?,
        })
    }
}

fn normalize_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            value: raw.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn interval<F>(lookup: &F, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(Duration::from_millis(default_ms));
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidInterval { key, value: raw }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("NODY_API_URL is not a valid http(s) URL ({value}): {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("{key} must be a positive number of milliseconds, got '{value}'")]
    InvalidInterval { key: &'static str, value: String },
}
