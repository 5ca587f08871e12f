use analysis_core::{AnalysisError, Bar, Interval, NewsArticle, Period, PriceSource, Quote};
use chrono::{DateTime, Utc};
use price_cache::{bars_key, news_key, quote_key, PriceCache};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::yahoo_finance::YahooFinanceClient;

const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_NEWS_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(250);

/// Data together with where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub data: T,
    pub source: String,
    pub cached: bool,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Fetched<T> {
    fn fresh(data: T, source: &str) -> Self {
        Self {
            data,
            source: source.to_string(),
            cached: false,
            fetched_at: Utc::now(),
        }
    }
}

/// Per-symbol result of a batch fetch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub symbol: String,
    pub result: Result<Fetched<Vec<Bar>>, String>,
}

/// Provider chain in front of the cache.
///
/// Providers are tried in order and the first non-empty answer wins. When
/// every provider fails the caller gets an error naming each failure;
/// nothing is ever synthesised.
pub struct MarketDataService {
    providers: Vec<Arc<dyn PriceSource>>,
    cache: Arc<PriceCache>,
    news: Option<YahooFinanceClient>,
    quote_ttl: Duration,
    news_ttl: Duration,
    batch_delay: Duration,
}

impl MarketDataService {
    pub fn new(cache: Arc<PriceCache>) -> Self {
        Self {
            providers: Vec::new(),
            cache,
            news: None,
            quote_ttl: DEFAULT_QUOTE_TTL,
            news_ttl: DEFAULT_NEWS_TTL,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn PriceSource>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_news(mut self, client: YahooFinanceClient) -> Self {
        self.news = Some(client);
        self
    }

    pub fn with_quote_ttl(mut self, ttl: Duration) -> Self {
        self.quote_ttl = ttl;
        self
    }

    pub fn with_news_ttl(mut self, ttl: Duration) -> Self {
        self.news_ttl = ttl;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<Fetched<T>> {
        let hit = self.cache.get::<Fetched<T>>(key).await?;
        let mut fetched = hit.value;
        fetched.cached = true;
        Some(fetched)
    }

    async fn store<T: Serialize>(&self, key: &str, fetched: &Fetched<T>, ttl: Option<Duration>) {
        let result = match ttl {
            Some(ttl) => self.cache.put_with_ttl(key, fetched, ttl).await,
            None => self.cache.put(key, fetched).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
    }

    /// Run `call` against each provider until one succeeds
    async fn first_success<T, F, Fut>(&self, symbol: &str, what: &str, call: F) -> Result<Fetched<T>, AnalysisError>
    where
        F: Fn(Arc<dyn PriceSource>) -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        if self.providers.is_empty() {
            return Err(AnalysisError::ApiError("No market data providers configured".to_string()));
        }

        let mut failures = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match call(provider.clone()).await {
                Ok(data) => {
                    tracing::debug!("{} for {} served by {}", what, symbol, provider.name());
                    return Ok(Fetched::fresh(data, provider.name()));
                }
                Err(e) => {
                    tracing::warn!("{} failed for {} {}: {}", provider.name(), what, symbol, e);
                    failures.push((provider.name(), e));
                }
            }
        }

        Err(combine_failures(symbol, what, failures))
    }

    /// Historical bars, cache first
    pub async fn get_bars(&self, symbol: &str, period: Period, interval: Interval) -> Result<Fetched<Vec<Bar>>, AnalysisError> {
        let key = bars_key(symbol, period, interval);
        if let Some(hit) = self.cached::<Vec<Bar>>(&key).await {
            tracing::debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        let fetched = self
            .first_success(symbol, "bars", |p| async move {
                let bars = p.get_bars(symbol, period, interval).await?;
                if bars.is_empty() {
                    return Err(AnalysisError::NotFound(format!("{} returned no bars", p.name())));
                }
                Ok(bars)
            })
            .await?;

        self.store(&key, &fetched, None).await;
        Ok(fetched)
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<Fetched<Quote>, AnalysisError> {
        let key = quote_key(symbol);
        if let Some(hit) = self.cached::<Quote>(&key).await {
            return Ok(hit);
        }

        let fetched = self
            .first_success(symbol, "quote", |p| async move { p.get_quote(symbol).await })
            .await?;

        self.store(&key, &fetched, Some(self.quote_ttl)).await;
        Ok(fetched)
    }

    /// Recent headlines. An empty list is a valid answer.
    pub async fn get_news(&self, symbol: &str, limit: usize) -> Result<Fetched<Vec<NewsArticle>>, AnalysisError> {
        let client = self
            .news
            .as_ref()
            .ok_or_else(|| AnalysisError::ApiError("No news provider configured".to_string()))?;

        let key = news_key(symbol);
        if let Some(mut hit) = self.cached::<Vec<NewsArticle>>(&key).await {
            if hit.data.len() >= limit || hit.data.is_empty() {
                hit.data.truncate(limit);
                return Ok(hit);
            }
        }

        let articles = client.get_news(symbol, limit).await?;
        let fetched = Fetched::fresh(articles, "yahoo");
        self.store(&key, &fetched, Some(self.news_ttl)).await;
        Ok(fetched)
    }

    /// Fetch bars for several symbols one after another.
    ///
    /// Sleeps `batch_delay` after every upstream fetch; failures are
    /// recorded and the loop moves on to the next ticker.
    pub async fn get_bars_batch(&self, symbols: &[String], period: Period, interval: Interval) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(symbols.len());

        for (i, symbol) in symbols.iter().enumerate() {
            let result = self.get_bars(symbol, period, interval).await;
            let hit_upstream = !matches!(&result, Ok(f) if f.cached);

            match &result {
                Ok(f) => tracing::info!("Batch [{}/{}] {}: {} bars", i + 1, symbols.len(), symbol, f.data.len()),
                Err(e) => tracing::warn!("Batch [{}/{}] {}: skipped ({})", i + 1, symbols.len(), symbol, e),
            }

            outcomes.push(BatchOutcome {
                symbol: symbol.clone(),
                result: result.map_err(|e| e.to_string()),
            });

            if hit_upstream && i + 1 < symbols.len() && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        outcomes
    }
}

/// Fold per-provider failures into one error.
///
/// All not-found → NotFound, all throttled → RateLimited, anything else is
/// an upstream ApiError. The message names every provider.
fn combine_failures(symbol: &str, what: &str, failures: Vec<(&'static str, AnalysisError)>) -> AnalysisError {
    let detail = failures
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ");
    let message = format!("All providers failed to return {} for {} ({})", what, symbol, detail);

    if failures.iter().all(|(_, e)| matches!(e, AnalysisError::NotFound(_))) {
        AnalysisError::NotFound(message)
    } else if failures
        .iter()
        .all(|(_, e)| matches!(e, AnalysisError::RateLimited(_) | AnalysisError::QuotaExhausted(_)))
    {
        AnalysisError::RateLimited(message)
    } else {
        AnalysisError::ApiError(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Bars(usize),
        Fail(fn() -> AnalysisError),
    }

    struct MockSource {
        name: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn sample_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1000.0,
            })
            .collect()
    }

    #[async_trait]
    impl PriceSource for MockSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get_bars(&self, _symbol: &str, _period: Period, _interval: Interval) -> Result<Vec<Bar>, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Bars(n) => Ok(sample_bars(*n)),
                Behaviour::Fail(make) => Err(make()),
            }
        }

        async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Bars(_) => Ok(Quote {
                    symbol: symbol.to_string(),
                    price: 123.0,
                    change: 1.0,
                    change_percent: 0.8,
                    volume: None,
                    previous_close: Some(122.0),
                    open: None,
                    day_high: None,
                    day_low: None,
                    latest_trading_day: None,
                    source: self.name.to_string(),
                }),
                Behaviour::Fail(make) => Err(make()),
            }
        }
    }

    fn cache() -> Arc<PriceCache> {
        Arc::new(PriceCache::new(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_falls_through_to_second_provider() {
        let yahoo = MockSource::new("yahoo", Behaviour::Fail(|| AnalysisError::ApiError("boom".into())));
        let av = MockSource::new("alpha_vantage", Behaviour::Bars(5));
        let service = MarketDataService::new(cache())
            .with_provider(yahoo.clone())
            .with_provider(av.clone());

        let fetched = service.get_bars("AAPL", Period::Month1, Interval::Day1).await.unwrap();
        assert_eq!(fetched.source, "alpha_vantage");
        assert!(!fetched.cached);
        assert_eq!(fetched.data.len(), 5);
        assert_eq!(yahoo.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let yahoo = MockSource::new("yahoo", Behaviour::Bars(3));
        let service = MarketDataService::new(cache()).with_provider(yahoo.clone());

        service.get_bars("MSFT", Period::Year1, Interval::Day1).await.unwrap();
        let second = service.get_bars("MSFT", Period::Year1, Interval::Day1).await.unwrap();

        assert!(second.cached);
        assert_eq!(second.source, "yahoo");
        assert_eq!(yahoo.calls(), 1);

        // Different period is a different key
        service.get_bars("MSFT", Period::Month6, Interval::Day1).await.unwrap();
        assert_eq!(yahoo.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_counts_as_failure() {
        let yahoo = MockSource::new("yahoo", Behaviour::Bars(0));
        let service = MarketDataService::new(cache()).with_provider(yahoo);

        let err = service.get_bars("ZZZZ", Period::Month1, Interval::Day1).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_all_throttled_reports_rate_limited() {
        let yahoo = MockSource::new("yahoo", Behaviour::Fail(|| AnalysisError::RateLimited("429".into())));
        let av = MockSource::new("alpha_vantage", Behaviour::Fail(|| AnalysisError::QuotaExhausted("500/day".into())));
        let service = MarketDataService::new(cache()).with_provider(yahoo).with_provider(av);

        let err = service.get_quote("AAPL").await.unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimited(_)));
        let message = err.to_string();
        assert!(message.contains("yahoo"));
        assert!(message.contains("alpha_vantage"));
    }

    #[tokio::test]
    async fn test_mixed_failures_report_api_error() {
        let yahoo = MockSource::new("yahoo", Behaviour::Fail(|| AnalysisError::NotFound("nope".into())));
        let av = MockSource::new("alpha_vantage", Behaviour::Fail(|| AnalysisError::ApiError("500".into())));
        let service = MarketDataService::new(cache()).with_provider(yahoo).with_provider(av);

        let err = service.get_bars("AAPL", Period::Month1, Interval::Day1).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ApiError(_)));
    }

    #[tokio::test]
    async fn test_no_providers_is_an_error() {
        let service = MarketDataService::new(cache());
        assert!(service.get_quote("AAPL").await.is_err());
        assert!(service.provider_names().is_empty());
    }

    #[tokio::test]
    async fn test_batch_skips_failures_and_continues() {
        struct PickySource;

        #[async_trait]
        impl PriceSource for PickySource {
            fn name(&self) -> &'static str {
                "picky"
            }

            async fn get_bars(&self, symbol: &str, _p: Period, _i: Interval) -> Result<Vec<Bar>, AnalysisError> {
                if symbol == "BAD" {
                    Err(AnalysisError::NotFound(symbol.to_string()))
                } else {
                    Ok(sample_bars(2))
                }
            }

            async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
                Err(AnalysisError::NotFound(symbol.to_string()))
            }
        }

        let service = MarketDataService::new(cache())
            .with_provider(Arc::new(PickySource))
            .with_batch_delay(Duration::ZERO);

        let symbols = vec!["AAA".to_string(), "BAD".to_string(), "CCC".to_string()];
        let outcomes = service.get_bars_batch(&symbols, Period::Month1, Interval::Day1).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        assert_eq!(outcomes[2].symbol, "CCC");
        assert!(outcomes[2].result.is_ok());
    }

    #[tokio::test]
    async fn test_news_without_client_errors() {
        let service = MarketDataService::new(cache());
        assert!(service.get_news("AAPL", 5).await.is_err());
    }
}
