use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::lexicon::SentimentScore;

#[derive(Error, Debug)]
pub enum FinbertError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type FinbertResult<T> = Result<T, FinbertError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinbertPrediction {
    pub label: String,
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl FinbertPrediction {
    pub fn to_score(&self) -> SentimentScore {
        SentimentScore::from_probabilities(self.positive, self.negative, self.neutral)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinbertResponse {
    pub predictions: Vec<FinbertPrediction>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct FinbertRequest<'a> {
    texts: &'a [String],
}

/// Client for an external FinBERT inference service
#[derive(Clone)]
pub struct FinbertClient {
    client: reqwest::Client,
    base_url: String,
}

impl FinbertClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Score each text. One prediction comes back per input, in order.
    pub async fn predict(&self, texts: &[String]) -> FinbertResult<Vec<SentimentScore>> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&FinbertRequest { texts })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FinbertError::ServiceUnavailable(format!("Status: {}", response.status())));
        }

        let body = response.json::<FinbertResponse>().await?;
        if body.predictions.len() != texts.len() {
            return Err(FinbertError::InvalidResponse(format!(
                "expected {} predictions, got {}",
                texts.len(),
                body.predictions.len()
            )));
        }

        Ok(body.predictions.iter().map(FinbertPrediction::to_score).collect())
    }

    /// Check service health
    pub async fn health(&self) -> FinbertResult<bool> {
        let response = self.client.get(format!("{}/health", self.base_url)).send().await?;
        Ok(response.status().is_success())
    }
}
