use analysis_core::{AnalysisError, AnalysisResult, Bar, SignalStrength, TechnicalAnalyzer};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::indicators::*;
use crate::snapshot::IndicatorSnapshot;

pub const MIN_BARS: usize = 50;

pub struct TechnicalAnalysisEngine;

impl TechnicalAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    /// Weighted (name, weight, bullish) votes from the latest bars
    fn build_signals(&self, bars: &[Bar], closes: &[f64]) -> Vec<(&'static str, i32, bool)> {
        let mut signals: Vec<(&'static str, i32, bool)> = Vec::new();
        let Some(&current_price) = closes.last() else {
            return signals;
        };

        // RSI Analysis (deeper oversold = stronger reversal signal)
        if let Some(&last_rsi) = rsi(closes, 14).last() {
            if last_rsi < 25.0 {
                signals.push(("RSI Deeply Oversold", 3, true));
            } else if last_rsi < 30.0 {
                signals.push(("RSI Oversold", 2, true));
            } else if last_rsi > 75.0 {
                signals.push(("RSI Deeply Overbought", 3, false));
            } else if last_rsi > 70.0 {
                signals.push(("RSI Overbought", 2, false));
            }
        }

        // MACD crossovers
        let macd_result = macd(closes, 12, 26, 9);
        if let &[.., prev_hist, last_hist] = macd_result.histogram.as_slice() {
            if last_hist > 0.0 && prev_hist <= 0.0 {
                signals.push(("MACD Bullish Cross", 3, true));
            } else if last_hist < 0.0 && prev_hist >= 0.0 {
                signals.push(("MACD Bearish Cross", 3, false));
            } else if last_hist > 0.0 {
                signals.push(("MACD Above Signal", 1, true));
            } else if last_hist < 0.0 {
                signals.push(("MACD Below Signal", 1, false));
            }
        }

        // Moving Average trend
        let sma_20 = sma(closes, 20);
        let sma_50 = sma(closes, 50);
        if let (Some(&last_sma_20), Some(&last_sma_50)) = (sma_20.last(), sma_50.last()) {
            if current_price > last_sma_20 && current_price > last_sma_50 {
                signals.push(("Price Above MAs", 2, true));
            }
            if current_price < last_sma_20 && current_price < last_sma_50 {
                signals.push(("Price Below MAs", 2, false));
            }

            if let ([.., prev_sma_20, _], [.., prev_sma_50, _]) = (&sma_20[..], &sma_50[..]) {
                if last_sma_20 > last_sma_50 && prev_sma_20 <= prev_sma_50 {
                    signals.push(("Golden Cross", 4, true));
                }
                if last_sma_20 < last_sma_50 && prev_sma_20 >= prev_sma_50 {
                    signals.push(("Death Cross", 4, false));
                }
            }
        }

        // Bollinger Bands
        let bb = bollinger_bands(closes, 20, 2.0);
        if let (Some(&upper), Some(&lower)) = (bb.upper.last(), bb.lower.last()) {
            if current_price < lower {
                signals.push(("Below Lower BB", 2, true));
            } else if current_price > upper {
                signals.push(("Above Upper BB", 2, false));
            }
        }

        // Stochastic Oscillator
        if let Some(&last_k) = stochastic(bars, 14, 3).k.last() {
            if last_k < 20.0 {
                signals.push(("Stochastic Oversold", 2, true));
            } else if last_k > 80.0 {
                signals.push(("Stochastic Overbought", 2, false));
            }
        }

        signals
    }

    pub fn analyze_sync(&self, symbol: &str, bars: &[Bar]) -> Result<AnalysisResult, AnalysisError> {
        if bars.len() < MIN_BARS {
            return Err(AnalysisError::InsufficientData(format!(
                "Need at least {} bars for technical analysis, got {}",
                MIN_BARS,
                bars.len()
            )));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let signals = self.build_signals(bars, &closes);

        let mut total_score = 0;
        let mut total_weight = 0;
        for (_, weight, bullish) in &signals {
            total_weight += weight;
            total_score += if *bullish { *weight } else { -weight };
        }

        let normalized_score = if total_weight > 0 {
            (total_score as f64 / total_weight as f64) * 100.0
        } else {
            0.0
        };

        let signal = SignalStrength::from_score(normalized_score as i32);
        let confidence = (total_weight as f64 / 12.0).min(1.0);

        let reason = if signals.is_empty() {
            "No technical signals triggered".to_string()
        } else {
            signals
                .iter()
                .map(|(name, _, bullish)| format!("{} {}", if *bullish { "+" } else { "-" }, name))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let snapshot = IndicatorSnapshot::from_bars(bars)?;
        let metrics = json!({
            "score": normalized_score,
            "signal_count": signals.len(),
            "rsi": snapshot.rsi,
            "macd_histogram": snapshot.macd_histogram,
            "sma_20": snapshot.sma_20,
            "sma_50": snapshot.sma_50,
            "bb_percent_b": snapshot.bb_percent_b,
            "bb_width": snapshot.bb_width,
            "stochastic_k": snapshot.stochastic_k,
            "atr": snapshot.atr,
        });

        Ok(AnalysisResult {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            signal,
            confidence,
            reason,
            metrics,
        })
    }
}

#[async_trait]
impl TechnicalAnalyzer for TechnicalAnalysisEngine {
    async fn analyze(&self, symbol: &str, bars: &[Bar]) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_sync(symbol, bars)
    }
}

impl Default for TechnicalAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap() + Duration::days(i as i64),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn test_requires_fifty_bars() {
        let engine = TechnicalAnalysisEngine::new();
        let bars = bars_from_closes(&vec![100.0; 49]);
        assert!(matches!(engine.analyze_sync("AAPL", &bars), Err(AnalysisError::InsufficientData(_))));
    }

    #[test]
    fn test_collapse_reads_bullish_reversal_votes() {
        // Steady climb then a sharp sell-off: oversold oscillators dominate
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.2).collect();
        let last = *closes.last().unwrap();
        closes.extend((1..=10).map(|i| last - i as f64 * 3.0));

        let result = TechnicalAnalysisEngine::new().analyze_sync("TEST", &bars_from_closes(&closes)).unwrap();
        assert!(result.reason.contains("RSI Deeply Oversold"));
        assert!(result.reason.contains("Stochastic Oversold"));
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_steady_uptrend_metrics() {
        let closes: Vec<f64> = (0..80).map(|i| 50.0 + i as f64).collect();
        let result = TechnicalAnalysisEngine::new().analyze_sync("UP", &bars_from_closes(&closes)).unwrap();

        assert!(result.reason.contains("Price Above MAs"));
        assert_eq!(result.metrics["rsi"], 100.0);
        assert_eq!(result.symbol, "UP");
    }

    #[test]
    fn test_flat_series_is_neutral() {
        let result = TechnicalAnalysisEngine::new()
            .analyze_sync("FLAT", &bars_from_closes(&vec![100.0; 60]))
            .unwrap();
        assert_eq!(result.signal, SignalStrength::Neutral);
        assert_eq!(result.reason, "No technical signals triggered");
    }
}
