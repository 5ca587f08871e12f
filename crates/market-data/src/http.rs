use analysis_core::AnalysisError;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use crate::rate_limit::RateLimiter;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Connection and throttling settings for one upstream provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub requests_per_minute: usize,
    /// Gap enforced between consecutive calls
    pub min_interval: Duration,
    pub daily_quota: Option<u32>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl ProviderConfig {
    pub fn yahoo() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            requests_per_minute: 60,
            min_interval: Duration::from_millis(250),
            daily_quota: None,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Free tier: 5 requests per minute, 500 per day
    pub fn alpha_vantage() -> Self {
        Self {
            base_url: "https://www.alphavantage.co".to_string(),
            requests_per_minute: 5,
            min_interval: Duration::from_secs(1),
            daily_quota: Some(500),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(15),
        }
    }
}

/// Rate-limited JSON GET with a fixed-delay retry loop.
#[derive(Clone)]
pub(crate) struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
    max_attempts: u32,
    retry_delay: Duration,
    provider: &'static str,
}

impl HttpFetcher {
    pub(crate) fn new(provider: &'static str, config: &ProviderConfig) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            limiter: RateLimiter::new(
                provider,
                config.requests_per_minute,
                Duration::from_secs(60),
                config.daily_quota,
            )
            .with_min_interval(config.min_interval),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            provider,
        }
    }

    pub(crate) fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch `url` and decode the body as JSON.
    ///
    /// 429, 5xx and transport failures are retried. Other 4xx responses are
    /// handed back as JSON when the body parses, since both providers put
    /// their error details in the body.
    pub(crate) async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<serde_json::Value, AnalysisError> {
        let mut last_error = AnalysisError::ApiError(format!("{}: no attempt made", self.provider));

        for attempt in 1..=self.max_attempts {
            self.limiter.acquire().await?;

            let mut request = self.client.get(url.clone());
            if !query.is_empty() {
                request = request.query(query);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("{} request failed (attempt {}/{}): {}", self.provider, attempt, self.max_attempts, e);
                    last_error = AnalysisError::ApiError(format!("{}: {}", self.provider, e));
                    self.backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(
                    "{} 429 rate limited, waiting {}s before retry {}/{}",
                    self.provider,
                    self.retry_delay.as_secs(),
                    attempt,
                    self.max_attempts
                );
                last_error = AnalysisError::RateLimited(format!("{} returned 429", self.provider));
                self.backoff(attempt).await;
                continue;
            }
            if status.is_server_error() {
                tracing::warn!("{} returned {} (attempt {}/{})", self.provider, status, attempt, self.max_attempts);
                last_error = AnalysisError::ApiError(format!("{} returned {}", self.provider, status));
                self.backoff(attempt).await;
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| AnalysisError::ApiError(format!("{}: {}", self.provider, e)))?;

            return match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => Ok(json),
                Err(_) if status == StatusCode::NOT_FOUND => {
                    Err(AnalysisError::NotFound(format!("{} returned 404", self.provider)))
                }
                Err(_) if !status.is_success() => {
                    Err(AnalysisError::ApiError(format!("{} returned {}", self.provider, status)))
                }
                Err(e) => Err(AnalysisError::InvalidData(format!("{}: malformed JSON: {}", self.provider, e))),
            };
        }

        Err(last_error)
    }

    async fn backoff(&self, attempt: u32) {
        if attempt < self.max_attempts {
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

/// Build `{base}/{segments...}` with each segment percent-encoded.
pub(crate) fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, AnalysisError> {
    let mut url = Url::parse(base_url).map_err(|e| AnalysisError::ApiError(format!("bad base url {}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| AnalysisError::ApiError(format!("bad base url {}", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
