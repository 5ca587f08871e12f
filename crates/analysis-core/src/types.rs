use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Trading date of the bar (UTC)
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Sort bars ascending by timestamp and drop duplicate timestamps (last one wins).
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Latest quote for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: Option<f64>,
    pub previous_close: Option<f64>,
    pub open: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub latest_trading_day: Option<String>,
    pub source: String,
}

/// News headline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: String,
    pub title: String,
    pub publisher: Option<String>,
    pub published_utc: DateTime<Utc>,
    pub article_url: String,
    pub description: Option<String>,
    pub tickers: Vec<String>,
}

/// Signal strength
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalStrength {
    StrongBuy,
    Buy,
    WeakBuy,
    Neutral,
    WeakSell,
    Sell,
    StrongSell,
}

impl SignalStrength {
    /// Convert to numeric score (-100 to 100)
    pub fn to_score(&self) -> i32 {
        match self {
            SignalStrength::StrongBuy => 100,
            SignalStrength::Buy => 60,
            SignalStrength::WeakBuy => 30,
            SignalStrength::Neutral => 0,
            SignalStrength::WeakSell => -30,
            SignalStrength::Sell => -60,
            SignalStrength::StrongSell => -100,
        }
    }

    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 70 => SignalStrength::StrongBuy,
            s if s >= 30 => SignalStrength::Buy,
            s if s >= 5 => SignalStrength::WeakBuy,
            s if s >= -5 => SignalStrength::Neutral,
            s if s >= -30 => SignalStrength::WeakSell,
            s if s >= -70 => SignalStrength::Sell,
            _ => SignalStrength::StrongSell,
        }
    }

    /// Human-readable label for the signal
    pub fn to_label(&self) -> &'static str {
        match self {
            SignalStrength::StrongBuy => "Strong Buy",
            SignalStrength::Buy => "Buy",
            SignalStrength::WeakBuy => "Weak Buy",
            SignalStrength::Neutral => "Neutral",
            SignalStrength::WeakSell => "Weak Sell",
            SignalStrength::Sell => "Sell",
            SignalStrength::StrongSell => "Strong Sell",
        }
    }
}

/// Analysis result from any analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub signal: SignalStrength,
    pub confidence: f64, // 0.0 to 1.0
    pub reason: String,
    pub metrics: serde_json::Value,
}

/// Direction call of a price prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictionLabel {
    Bullish,
    Bearish,
    Neutral,
}

impl PredictionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionLabel::Bullish => "BULLISH",
            PredictionLabel::Bearish => "BEARISH",
            PredictionLabel::Neutral => "NEUTRAL",
        }
    }
}

/// Model output for one symbol. Produced per request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub symbol: String,
    pub prediction: PredictionLabel,
    pub current_price: f64,
    pub predicted_price: f64,
    pub predicted_change_percent: f64,
    pub confidence: f64, // 0.0 to 1.0
    pub model_type: String,
    pub horizon_days: usize,
    pub metrics: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}
