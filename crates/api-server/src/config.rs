use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Server settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_daily_limit: u32,
    pub alpha_vantage_per_minute: usize,
    pub yahoo_per_minute: usize,
    pub cache_ttl: Duration,
    pub quote_cache_ttl: Duration,
    /// Appended to bare tickers, e.g. `.AX` for ASX listings
    pub default_market_suffix: Option<String>,
    pub finbert_url: Option<String>,
    pub model_max_age: Duration,
    /// Per upstream HTTP call
    pub request_timeout: Duration,
    /// Budget for a whole route, including upstream retries and rate-limit waits
    pub route_timeout: Duration,
    pub batch_delay: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "sqlite:cache/stockpulse.db".to_string(),
            alpha_vantage_api_key: None,
            alpha_vantage_daily_limit: 500,
            alpha_vantage_per_minute: 5,
            yahoo_per_minute: 60,
            cache_ttl: Duration::from_secs(4 * 60 * 60),
            quote_cache_ttl: Duration::from_secs(60),
            default_market_suffix: None,
            finbert_url: None,
            model_max_age: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
            route_timeout: Duration::from_secs(180),
            batch_delay: Duration::from_millis(250),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "PORT", defaults.port)?,
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            alpha_vantage_api_key: get("ALPHA_VANTAGE_API_KEY"),
            alpha_vantage_daily_limit: parse_or(&get, "ALPHA_VANTAGE_DAILY_LIMIT", defaults.alpha_vantage_daily_limit)?,
            alpha_vantage_per_minute: parse_or(&get, "ALPHA_VANTAGE_PER_MINUTE", defaults.alpha_vantage_per_minute)?,
            yahoo_per_minute: parse_or(&get, "YAHOO_PER_MINUTE", defaults.yahoo_per_minute)?,
            cache_ttl: Duration::from_secs(parse_or(&get, "CACHE_TTL_SECS", defaults.cache_ttl.as_secs())?),
            quote_cache_ttl: Duration::from_secs(parse_or(
                &get,
                "QUOTE_CACHE_TTL_SECS",
                defaults.quote_cache_ttl.as_secs(),
            )?),
            default_market_suffix: get("DEFAULT_MARKET_SUFFIX"),
            finbert_url: get("FINBERT_URL"),
            model_max_age: Duration::from_secs(parse_or(&get, "MODEL_MAX_AGE_SECS", defaults.model_max_age.as_secs())?),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            route_timeout: Duration::from_secs(parse_or(&get, "ROUTE_TIMEOUT_SECS", defaults.route_timeout.as_secs())?),
            batch_delay: Duration::from_millis(parse_or(&get, "BATCH_DELAY_MS", 250u64)?),
            cors_origins: get("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.cache_ttl, Duration::from_secs(14_400));
        assert_eq!(config.alpha_vantage_daily_limit, 500);
        assert!(config.alpha_vantage_api_key.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.route_timeout, Duration::from_secs(180));
    }

    #[test]
    fn test_route_timeout_independent_of_request_timeout() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("REQUEST_TIMEOUT_SECS", "10"),
            ("ROUTE_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.route_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("ALPHA_VANTAGE_DAILY_LIMIT", "25"),
            ("DEFAULT_MARKET_SUFFIX", ".AX"),
            ("CORS_ORIGINS", "http://localhost:5173, http://example.com"),
            ("FINBERT_URL", "  "),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.alpha_vantage_api_key.as_deref(), Some("demo"));
        assert_eq!(config.alpha_vantage_daily_limit, 25);
        assert_eq!(config.default_market_suffix.as_deref(), Some(".AX"));
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.finbert_url.is_none());
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
