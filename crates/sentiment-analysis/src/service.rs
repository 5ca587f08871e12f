use analysis_core::NewsArticle;
use serde::Serialize;

use crate::finbert::FinbertClient;
use crate::lexicon::{LexiconSentimentModel, SentimentScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentModelKind {
    Finbert,
    Lexicon,
}

impl SentimentModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentModelKind::Finbert => "finbert",
            SentimentModelKind::Lexicon => "lexicon",
        }
    }
}

/// Scores plus the model that produced them
#[derive(Debug, Clone, Serialize)]
pub struct ScoredTexts {
    pub model: SentimentModelKind,
    pub scores: Vec<SentimentScore>,
}

/// FinBERT when configured, word-list model otherwise or on any failure
pub struct SentimentService {
    lexicon: LexiconSentimentModel,
    finbert: Option<FinbertClient>,
}

impl SentimentService {
    pub fn new(finbert: Option<FinbertClient>) -> Self {
        Self {
            lexicon: LexiconSentimentModel::new(),
            finbert,
        }
    }

    pub fn lexicon_only() -> Self {
        Self::new(None)
    }

    pub fn has_finbert(&self) -> bool {
        self.finbert.is_some()
    }

    async fn try_finbert(&self, texts: &[String]) -> Option<Vec<SentimentScore>> {
        let client = self.finbert.as_ref()?;
        match client.predict(texts).await {
            Ok(scores) => {
                tracing::info!("FinBERT scored {} texts", scores.len());
                Some(scores)
            }
            Err(e) => {
                tracing::warn!("FinBERT unavailable, falling back to word-list: {}", e);
                None
            }
        }
    }

    pub async fn score_texts(&self, texts: &[String]) -> ScoredTexts {
        if texts.is_empty() {
            return ScoredTexts {
                model: SentimentModelKind::Lexicon,
                scores: Vec::new(),
            };
        }

        if let Some(scores) = self.try_finbert(texts).await {
            return ScoredTexts {
                model: SentimentModelKind::Finbert,
                scores,
            };
        }

        ScoredTexts {
            model: SentimentModelKind::Lexicon,
            scores: texts.iter().map(|t| self.lexicon.score_text(t)).collect(),
        }
    }

    /// FinBERT sees headlines only; the word-list model also reads descriptions.
    pub async fn score_articles(&self, articles: &[NewsArticle]) -> ScoredTexts {
        if !articles.is_empty() {
            let titles: Vec<String> = articles.iter().map(|a| a.title.clone()).collect();
            if let Some(scores) = self.try_finbert(&titles).await {
                return ScoredTexts {
                    model: SentimentModelKind::Finbert,
                    scores,
                };
            }
        }

        ScoredTexts {
            model: SentimentModelKind::Lexicon,
            scores: articles.iter().map(|a| self.lexicon.score_article(a)).collect(),
        }
    }
}

impl Default for SentimentService {
    fn default() -> Self {
        Self::lexicon_only()
    }
}
