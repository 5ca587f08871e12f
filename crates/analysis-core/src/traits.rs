use async_trait::async_trait;

use crate::{AnalysisError, AnalysisResult, Bar, Interval, NewsArticle, Period, Quote};

/// Upstream source of daily price history and quotes
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Short provider name used in logs and responses ("yahoo", "alpha_vantage")
    fn name(&self) -> &'static str;

    async fn get_bars(&self, symbol: &str, period: Period, interval: Interval) -> Result<Vec<Bar>, AnalysisError>;

    async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError>;
}

/// Trait for technical analysis engines
#[async_trait]
pub trait TechnicalAnalyzer: Send + Sync {
    async fn analyze(&self, symbol: &str, bars: &[Bar]) -> Result<AnalysisResult, AnalysisError>;
}

/// Trait for sentiment analysis engines
#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, symbol: &str, news: &[NewsArticle]) -> Result<AnalysisResult, AnalysisError>;
}
