use analysis_core::NewsArticle;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const POSITIVE_WORDS: &[&str] = &[
    "bullish", "rally", "rallies", "surge", "surges", "soar", "soars", "gain", "gains", "profit",
    "profits", "growth", "beat", "beats", "upgrade", "outperform", "strong", "positive", "rise",
    "rises", "increase", "breakthrough", "innovation", "success", "exceed", "exceeds", "momentum",
    "buy", "recommend", "optimistic", "record", "high", "advance", "jump", "jumps",
    // Financial-specific terms
    "dividend", "buyback", "repurchase", "accretive", "upside", "recovery", "rebound", "expansion",
    "robust", "accelerating", "overweight", "raised", "upgraded", "outpacing", "tailwind",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bearish", "decline", "declines", "loss", "losses", "fall", "falls", "plunge", "plunges", "crash",
    "miss", "misses", "downgrade", "underperform", "weak", "negative", "drop", "drops", "decrease",
    "concern", "concerns", "risk", "fail", "fails", "disappoint", "disappoints", "slump", "sell",
    "warning", "pessimistic", "low", "retreat", "fear", "fears", "trouble", "tumble", "tumbles",
    // Financial-specific terms
    "dilution", "dilutive", "headwind", "lawsuit", "litigation", "recall", "investigation", "probe",
    "default", "bankruptcy", "restructuring", "layoff", "layoffs", "downside", "overvalued", "bubble",
    "underweight", "lowered", "suspended", "downgraded",
];

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "aren't", "wasn't", "weren't",
    "won't", "wouldn't", "couldn't", "shouldn't", "hardly", "barely", "neither", "nor", "without",
];

const INTENSIFIER_WORDS: &[&str] = &[
    "very", "sharply", "significantly", "substantially", "strongly", "extremely", "highly", "hugely",
    "dramatically", "massively", "deeply", "steeply", "heavily", "sharp", "massive", "huge", "steep",
];

const NEGATION_WINDOW: usize = 3;

/// Weight of a polarity word directly preceded by an intensifier
const INTENSIFIER_WEIGHT: f64 = 1.5;

/// Scores with |score| below this read as neutral
pub const NEUTRAL_BAND: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > NEUTRAL_BAND {
            SentimentLabel::Positive
        } else if score < -NEUTRAL_BAND {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

/// Class probabilities and a signed score in [-1, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub label: SentimentLabel,
    pub score: f64,
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
    pub confidence: f64,
}

impl SentimentScore {
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
            positive: 0.0,
            negative: 0.0,
            neutral: 1.0,
            confidence: 1.0,
        }
    }

    /// Build from class probabilities. Probabilities are renormalised.
    pub fn from_probabilities(positive: f64, negative: f64, neutral: f64) -> Self {
        let total = positive + negative + neutral;
        if !(total > 0.0) {
            return Self::neutral();
        }
        let (positive, negative, neutral) = (positive / total, negative / total, neutral / total);
        let score = (positive - negative).clamp(-1.0, 1.0);

        Self {
            label: SentimentLabel::from_score(score),
            score,
            positive,
            negative,
            neutral,
            confidence: positive.max(negative).max(neutral),
        }
    }
}

/// Weighted polarity hits found in a text
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Hits {
    positive: f64,
    negative: f64,
}

impl std::ops::Add for Hits {
    type Output = Hits;

    fn add(self, other: Hits) -> Hits {
        Hits {
            positive: self.positive + other.positive,
            negative: self.negative + other.negative,
        }
    }
}

impl Hits {
    fn scaled(self, weight: f64) -> Hits {
        Hits {
            positive: self.positive * weight,
            negative: self.negative * weight,
        }
    }
}

/// Financial word-list model.
///
/// A polarity word preceded by a negation within three tokens flips sign,
/// and one directly preceded by an intensifier ("sharply", "very") counts
/// 1.5 times. Each hit adds to its class; one pseudo-count goes to neutral
/// so a single word never reads as certainty.
pub struct LexiconSentimentModel {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
    negation: HashSet<&'static str>,
    intensifiers: HashSet<&'static str>,
}

impl LexiconSentimentModel {
    pub fn new() -> Self {
        Self {
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
            negation: NEGATION_WORDS.iter().copied().collect(),
            intensifiers: INTENSIFIER_WORDS.iter().copied().collect(),
        }
    }

    fn hits(&self, text: &str) -> Hits {
        let text_lower = text.to_lowercase();
        let words: Vec<&str> = text_lower
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '.' | '!' | '?' | ':' | '"' | '(' | ')'))
            .filter(|w| !w.is_empty())
            .collect();

        let negation_positions: Vec<usize> = words
            .iter()
            .enumerate()
            .filter(|(_, w)| self.negation.contains(*w))
            .map(|(i, _)| i)
            .collect();

        let mut hits = Hits::default();
        for (i, word) in words.iter().enumerate() {
            let is_positive = self.positive.contains(*word);
            let is_negative = self.negative.contains(*word);
            if !is_positive && !is_negative {
                continue;
            }

            let negated = negation_positions
                .iter()
                .any(|&neg_pos| neg_pos < i && i - neg_pos <= NEGATION_WINDOW);

            let weight = if i > 0 && self.intensifiers.contains(words[i - 1]) {
                INTENSIFIER_WEIGHT
            } else {
                1.0
            };

            if is_positive != negated {
                hits.positive += weight;
            } else {
                hits.negative += weight;
            }
        }

        hits
    }

    fn score_hits(hits: Hits) -> SentimentScore {
        if hits.positive == 0.0 && hits.negative == 0.0 {
            return SentimentScore::neutral();
        }
        SentimentScore::from_probabilities(hits.positive, hits.negative, 1.0)
    }

    pub fn score_text(&self, text: &str) -> SentimentScore {
        Self::score_hits(self.hits(text))
    }

    /// Title counts double; the description counts once.
    pub fn score_article(&self, article: &NewsArticle) -> SentimentScore {
        let mut hits = self.hits(&article.title).scaled(2.0);
        if let Some(desc) = &article.description {
            hits = hits + self.hits(desc);
        }
        Self::score_hits(hits)
    }
}

impl Default for LexiconSentimentModel {
    fn default() -> Self {
        Self::new()
    }
}
