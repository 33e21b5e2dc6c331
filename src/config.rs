use std::time::Duration;

use crate::cache::DEFAULT_TTL;

pub const DEFAULT_STORE_URL: &str = "http://127.0.0.1:8090";

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_url: String,
    pub auth_token: Option<String>,
    pub cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("FLOWSYNC_STORE_URL").ok().as_deref(),
            std::env::var("FLOWSYNC_AUTH_TOKEN").ok().as_deref(),
            std::env::var("FLOWSYNC_CACHE_TTL_MS").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        store_url: Option<&str>,
        auth_token: Option<&str>,
        cache_ttl_ms: Option<&str>,
    ) -> Self {
        let store_url = store_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());

        let auth_token = auth_token.filter(|s| !s.is_empty()).map(String::from);

        let cache_ttl = cache_ttl_ms
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TTL);

        Config {
            store_url,
            auth_token,
            cache_ttl,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw_values(None, None, None)
    }
}
