use analysis_core::{AnalysisError, AnalysisResult, NewsArticle, SentimentAnalyzer, SignalStrength};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

pub mod aggregate;
pub mod finbert;
pub mod lexicon;
pub mod service;

pub use aggregate::{aggregate_headlines, recency_weight, ScoredHeadline, SentimentAggregate};
pub use finbert::{FinbertClient, FinbertError};
pub use lexicon::{LexiconSentimentModel, SentimentLabel, SentimentScore};
pub use service::{ScoredTexts, SentimentModelKind, SentimentService};

/// Scored headlines, their aggregate and the model used
#[derive(Debug, Clone, serde::Serialize)]
pub struct NewsSentiment {
    pub model: SentimentModelKind,
    pub headlines: Vec<ScoredHeadline>,
    pub aggregate: SentimentAggregate,
}

pub struct SentimentAnalysisEngine {
    service: SentimentService,
}

impl SentimentAnalysisEngine {
    pub fn new(service: SentimentService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &SentimentService {
        &self.service
    }

    pub async fn score_news(&self, news: &[NewsArticle]) -> NewsSentiment {
        let scored = self.service.score_articles(news).await;
        let headlines: Vec<ScoredHeadline> = news
            .iter()
            .zip(scored.scores)
            .map(|(article, sentiment)| ScoredHeadline {
                title: article.title.clone(),
                publisher: article.publisher.clone(),
                url: Some(article.article_url.clone()).filter(|u| !u.is_empty()),
                published_utc: article.published_utc,
                sentiment,
            })
            .collect();

        let aggregate = aggregate_headlines(&headlines, Utc::now());
        NewsSentiment {
            model: scored.model,
            headlines,
            aggregate,
        }
    }

    /// Map a news aggregate onto the shared signal scale
    pub fn to_analysis(&self, symbol: &str, sentiment: &NewsSentiment) -> AnalysisResult {
        let agg = &sentiment.aggregate;
        if agg.article_count == 0 {
            return AnalysisResult {
                symbol: symbol.to_string(),
                timestamp: Utc::now(),
                signal: SignalStrength::Neutral,
                confidence: 0.0,
                reason: "No news articles available".to_string(),
                metrics: json!({ "total_articles": 0, "model": sentiment.model.as_str() }),
            };
        }

        let normalized_score = agg.score * 100.0;
        let signal = SignalStrength::from_score(normalized_score.round() as i32);

        let positive = (agg.positive_ratio * agg.article_count as f64).round() as usize;
        let negative = (agg.negative_ratio * agg.article_count as f64).round() as usize;
        let neutral = agg.article_count.saturating_sub(positive + negative);

        let reason = format!(
            "{} news sentiment ({} positive, {} negative, {} neutral) via {}",
            signal.to_label(),
            positive,
            negative,
            neutral,
            sentiment.model.as_str()
        );

        AnalysisResult {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            signal,
            confidence: agg.confidence,
            reason,
            metrics: json!({
                "avg_sentiment": agg.score,
                "normalized_score": normalized_score,
                "label": agg.label.as_str(),
                "positive_articles": positive,
                "negative_articles": negative,
                "neutral_articles": neutral,
                "total_articles": agg.article_count,
                "model": sentiment.model.as_str(),
            }),
        }
    }
}

#[async_trait]
impl SentimentAnalyzer for SentimentAnalysisEngine {
    async fn analyze(&self, symbol: &str, news: &[NewsArticle]) -> Result<AnalysisResult, AnalysisError> {
        let sentiment = self.score_news(news).await;
        Ok(self.to_analysis(symbol, &sentiment))
    }
}

impl Default for SentimentAnalysisEngine {
    fn default() -> Self {
        Self::new(SentimentService::lexicon_only())
    }
}
