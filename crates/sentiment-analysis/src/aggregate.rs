use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::lexicon::{SentimentLabel, SentimentScore};

/// A headline with its score and publication time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredHeadline {
    pub title: String,
    pub publisher: Option<String>,
    pub url: Option<String>,
    pub published_utc: DateTime<Utc>,
    pub sentiment: SentimentScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAggregate {
    pub label: SentimentLabel,
    /// Recency-weighted mean score in [-1, 1]
    pub score: f64,
    pub confidence: f64,
    pub positive_ratio: f64,
    pub negative_ratio: f64,
    pub neutral_ratio: f64,
    pub article_count: usize,
}

impl SentimentAggregate {
    pub fn empty() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
            confidence: 0.0,
            positive_ratio: 0.0,
            negative_ratio: 0.0,
            neutral_ratio: 0.0,
            article_count: 0,
        }
    }
}

/// Step-down weight by article age. Future timestamps count as fresh.
pub fn recency_weight(age: Duration) -> f64 {
    if age <= Duration::hours(24) {
        1.0
    } else if age <= Duration::hours(48) {
        0.7
    } else if age <= Duration::days(7) {
        0.4
    } else {
        0.2
    }
}

pub fn aggregate_headlines(headlines: &[ScoredHeadline], now: DateTime<Utc>) -> SentimentAggregate {
    if headlines.is_empty() {
        return SentimentAggregate::empty();
    }

    let mut weighted_score = 0.0;
    let mut weighted_confidence = 0.0;
    let mut total_weight = 0.0;
    let (mut positive, mut negative, mut neutral) = (0usize, 0usize, 0usize);

    for headline in headlines {
        let weight = recency_weight(now - headline.published_utc);
        weighted_score += headline.sentiment.score * weight;
        weighted_confidence += headline.sentiment.confidence * weight;
        total_weight += weight;

        match headline.sentiment.label {
            SentimentLabel::Positive => positive += 1,
            SentimentLabel::Negative => negative += 1,
            SentimentLabel::Neutral => neutral += 1,
        }
    }

    let n = headlines.len() as f64;
    let score = weighted_score / total_weight;
    // few articles -> lower confidence
    let coverage = (n / 10.0).min(1.0);

    SentimentAggregate {
        label: SentimentLabel::from_score(score),
        score,
        confidence: (weighted_confidence / total_weight) * (0.5 + 0.5 * coverage),
        positive_ratio: positive as f64 / n,
        negative_ratio: negative as f64 / n,
        neutral_ratio: neutral as f64 / n,
        article_count: headlines.len(),
    }
}
