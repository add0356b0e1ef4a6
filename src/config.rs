//! Environment configuration
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file by the binaries. Malformed numbers fall back to defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::generation::RetryPolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    pub database_url: Option<String>,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            generation_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            database_url: None,
            port: 8080,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout_secs: u64 = parse_or(&lookup, "GENERATION_TIMEOUT_SECS", 30);
        let base_delay_ms: u64 = parse_or(&lookup, "GENERATION_BASE_DELAY_MS", 500);

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "GENERATION_MAX_ATTEMPTS", defaults.retry.max_attempts),
            base_delay: Duration::from_millis(base_delay_ms),
            multiplier: parse_or(&lookup, "GENERATION_BACKOFF_MULTIPLIER", defaults.retry.multiplier),
            max_delay: defaults.retry.max_delay,
        };

        let port = non_empty("PORT")
            .or_else(|| non_empty("API_PORT"))
            .and_then(|v| parse_logged("PORT", &v))
            .unwrap_or(defaults.port);

        Self {
            gemini_api_key: non_empty("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            generation_timeout: Duration::from_secs(timeout_secs),
            retry,
            database_url: non_empty("DATABASE_URL").or_else(|| non_empty("POSTGRES_URL")),
            port,
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.gemini_api_key.is_empty() && self.gemini_api_key != "your_gemini_api_key_here"
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|raw| parse_logged(key, &raw))
        .unwrap_or(default)
}

fn parse_logged<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw, "Ignoring malformed configuration value");
            None
        }
    }
}
