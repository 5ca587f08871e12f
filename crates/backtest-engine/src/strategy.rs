use analysis_core::{AnalysisError, Bar};
use serde::{Deserialize, Serialize};
use technical_analysis::{align, bollinger_bands, macd, rsi, sma};

use crate::models::{Signal, SignalAction};

/// Upper bound on any lookback window
pub const MAX_PERIOD: usize = 1_000;

fn default_fast() -> usize {
    20
}
fn default_slow() -> usize {
    50
}
fn default_rsi_period() -> usize {
    14
}
fn default_oversold() -> f64 {
    30.0
}
fn default_overbought() -> f64 {
    70.0
}
fn default_macd_fast() -> usize {
    12
}
fn default_macd_slow() -> usize {
    26
}
fn default_macd_signal() -> usize {
    9
}
fn default_bb_period() -> usize {
    20
}
fn default_bb_std() -> f64 {
    2.0
}

/// Rule-based strategies, tagged by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    SmaCrossover {
        #[serde(default = "default_fast")]
        fast: usize,
        #[serde(default = "default_slow")]
        slow: usize,
    },
    RsiReversion {
        #[serde(default = "default_rsi_period")]
        period: usize,
        #[serde(default = "default_oversold")]
        oversold: f64,
        #[serde(default = "default_overbought")]
        overbought: f64,
    },
    MacdCrossover {
        #[serde(default = "default_macd_fast")]
        fast: usize,
        #[serde(default = "default_macd_slow")]
        slow: usize,
        #[serde(default = "default_macd_signal")]
        signal: usize,
    },
    BollingerReversion {
        #[serde(default = "default_bb_period")]
        period: usize,
        #[serde(default = "default_bb_std")]
        std_dev: f64,
    },
    BuyAndHold,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::SmaCrossover { .. } => "sma_crossover",
            Strategy::RsiReversion { .. } => "rsi_reversion",
            Strategy::MacdCrossover { .. } => "macd_crossover",
            Strategy::BollingerReversion { .. } => "bollinger_reversion",
            Strategy::BuyAndHold => "buy_and_hold",
        }
    }

    /// Strategy with default parameters, by name
    pub fn from_name(name: &str) -> Result<Self, AnalysisError> {
        match name.trim().to_lowercase().as_str() {
            "sma_crossover" | "sma" => Ok(Strategy::SmaCrossover {
                fast: default_fast(),
                slow: default_slow(),
            }),
            "rsi_reversion" | "rsi" => Ok(Strategy::RsiReversion {
                period: default_rsi_period(),
                oversold: default_oversold(),
                overbought: default_overbought(),
            }),
            "macd_crossover" | "macd" => Ok(Strategy::MacdCrossover {
                fast: default_macd_fast(),
                slow: default_macd_slow(),
                signal: default_macd_signal(),
            }),
            "bollinger_reversion" | "bollinger" => Ok(Strategy::BollingerReversion {
                period: default_bb_period(),
                std_dev: default_bb_std(),
            }),
            "buy_and_hold" => Ok(Strategy::BuyAndHold),
            other => Err(AnalysisError::InvalidData(format!("unknown strategy '{}'", other))),
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let invalid = |msg: &str| -> Result<(), AnalysisError> {
            Err(AnalysisError::InvalidData(format!("{}: {}", self.name(), msg)))
        };
        if self.periods().iter().any(|&p| p > MAX_PERIOD) {
            return invalid(&format!("periods must be at most {}", MAX_PERIOD));
        }
        match *self {
            Strategy::SmaCrossover { fast, slow } if fast < 2 || fast >= slow => {
                invalid("need 2 <= fast < slow")
            }
            Strategy::RsiReversion {
                period,
                oversold,
                overbought,
            } if period < 2 || !(0.0..100.0).contains(&oversold) || oversold >= overbought || overbought > 100.0 => {
                invalid("need period >= 2 and 0 <= oversold < overbought <= 100")
            }
            Strategy::MacdCrossover { fast, slow, signal } if fast < 1 || fast >= slow || signal < 1 => {
                invalid("need 1 <= fast < slow and signal >= 1")
            }
            Strategy::BollingerReversion { period, std_dev } if period < 2 || std_dev <= 0.0 => {
                invalid("need period >= 2 and std_dev > 0")
            }
            _ => Ok(()),
        }
    }

    fn periods(&self) -> Vec<usize> {
        match *self {
            Strategy::SmaCrossover { fast, slow } => vec![fast, slow],
            Strategy::RsiReversion { period, .. } => vec![period],
            Strategy::MacdCrossover { fast, slow, signal } => vec![fast, slow, signal],
            Strategy::BollingerReversion { period, .. } => vec![period],
            Strategy::BuyAndHold => Vec::new(),
        }
    }

    /// Bars needed before the first signal can fire
    pub fn warmup_bars(&self) -> usize {
        match *self {
            Strategy::SmaCrossover { slow, .. } => slow + 1,
            Strategy::RsiReversion { period, .. } => period + 2,
            Strategy::MacdCrossover { slow, signal, .. } => slow + signal,
            Strategy::BollingerReversion { period, .. } => period + 1,
            Strategy::BuyAndHold => 1,
        }
    }

    /// Signals in bar order. Each one only looks at bars up to its own date.
    pub fn generate_signals(&self, bars: &[Bar]) -> Vec<Signal> {
        let n = bars.len();
        if n == 0 {
            return Vec::new();
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let signal = |i: usize, action: SignalAction, reason: String| Signal {
            date: bars[i].date(),
            action,
            price: closes[i],
            reason,
        };

        match *self {
            Strategy::BuyAndHold => vec![signal(0, SignalAction::Buy, "Buy and hold entry".to_string())],

            Strategy::SmaCrossover { fast, slow } => {
                let fast_ma = align(&sma(&closes, fast), n);
                let slow_ma = align(&sma(&closes, slow), n);
                crossings(n, |i| Some(fast_ma[i]? - slow_ma[i]?))
                    .into_iter()
                    .map(|(i, up)| {
                        if up {
                            signal(i, SignalAction::Buy, format!("SMA{} crossed above SMA{}", fast, slow))
                        } else {
                            signal(i, SignalAction::Sell, format!("SMA{} crossed below SMA{}", fast, slow))
                        }
                    })
                    .collect()
            }

            Strategy::MacdCrossover { fast, slow, signal: signal_period } => {
                let result = macd(&closes, fast, slow, signal_period);
                let hist = align(&result.histogram, n);
                crossings(n, |i| hist[i])
                    .into_iter()
                    .map(|(i, up)| {
                        if up {
                            signal(i, SignalAction::Buy, "MACD crossed above signal line".to_string())
                        } else {
                            signal(i, SignalAction::Sell, "MACD crossed below signal line".to_string())
                        }
                    })
                    .collect()
            }

            Strategy::RsiReversion {
                period,
                oversold,
                overbought,
            } => {
                let values = align(&rsi(&closes, period), n);
                let mut signals = Vec::new();
                for i in 1..n {
                    let (Some(prev), Some(cur)) = (values[i - 1], values[i]) else {
                        continue;
                    };
                    if cur < oversold && prev >= oversold {
                        signals.push(signal(i, SignalAction::Buy, format!("RSI {:.1} fell below {}", cur, oversold)));
                    } else if cur > overbought && prev <= overbought {
                        signals.push(signal(i, SignalAction::Sell, format!("RSI {:.1} rose above {}", cur, overbought)));
                    }
                }
                signals
            }

            Strategy::BollingerReversion { period, std_dev } => {
                let bands = bollinger_bands(&closes, period, std_dev);
                let lower = align(&bands.lower, n);
                let middle = align(&bands.middle, n);
                let mut signals = Vec::new();
                for i in 1..n {
                    let (Some(prev_lower), Some(cur_lower)) = (lower[i - 1], lower[i]) else {
                        continue;
                    };
                    let (Some(prev_mid), Some(cur_mid)) = (middle[i - 1], middle[i]) else {
                        continue;
                    };
                    if closes[i] < cur_lower && closes[i - 1] >= prev_lower {
                        signals.push(signal(i, SignalAction::Buy, "Close fell below lower band".to_string()));
                    } else if closes[i] > cur_mid && closes[i - 1] <= prev_mid {
                        signals.push(signal(i, SignalAction::Sell, "Close reverted above middle band".to_string()));
                    }
                }
                signals
            }
        }
    }
}

/// Indices where `diff` changes sign, with `true` for an upward cross
fn crossings(n: usize, diff: impl Fn(usize) -> Option<f64>) -> Vec<(usize, bool)> {
    (1..n)
        .filter_map(|i| {
            let (prev, cur) = (diff(i - 1)?, diff(i)?);
            if prev <= 0.0 && cur > 0.0 {
                Some((i, true))
            } else if prev >= 0.0 && cur < 0.0 {
                Some((i, false))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn test_sma_crossover_signals() {
        // falls, then rallies: fast SMA crosses above slow once
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        closes.extend((0..20).map(|i| 81.0 + i as f64 * 2.0));
        let bars = bars_from(&closes);

        let signals = Strategy::SmaCrossover { fast: 3, slow: 8 }.generate_signals(&bars);
        let buys: Vec<_> = signals.iter().filter(|s| s.action == SignalAction::Buy).collect();

        assert_eq!(buys.len(), 1);
        assert!(buys[0].date > bars[19].date());
        assert!(signals.iter().all(|s| s.action == SignalAction::Buy));
    }

    #[test]
    fn test_signals_are_point_in_time() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.3).sin() * 10.0).collect();
        let bars = bars_from(&closes);
        let strategy = Strategy::MacdCrossover {
            fast: 5,
            slow: 10,
            signal: 4,
        };

        let full = strategy.generate_signals(&bars);
        let truncated = strategy.generate_signals(&bars[..50]);
        let cutoff = bars[49].date();
        let full_prefix: Vec<_> = full.iter().filter(|s| s.date <= cutoff).map(|s| (s.date, s.action)).collect();
        let prefix: Vec<_> = truncated.iter().map(|s| (s.date, s.action)).collect();

        assert!(!prefix.is_empty());
        assert_eq!(full_prefix, prefix);
    }

    #[test]
    fn test_buy_and_hold_single_entry() {
        let bars = bars_from(&[10.0, 11.0, 12.0]);
        let signals = Strategy::BuyAndHold.generate_signals(&bars);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].date, bars[0].date());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let strategy: Strategy = serde_json::from_str(r#"{"type": "rsi_reversion", "oversold": 25}"#).unwrap();
        assert_eq!(
            strategy,
            Strategy::RsiReversion {
                period: 14,
                oversold: 25.0,
                overbought: 70.0
            }
        );
        assert_eq!(Strategy::from_name("MACD").unwrap().name(), "macd_crossover");
        assert!(Strategy::from_name("martingale").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Strategy::SmaCrossover { fast: 50, slow: 20 }.validate().is_err());
        assert!(Strategy::BollingerReversion { period: 20, std_dev: 0.0 }.validate().is_err());
        assert!(Strategy::from_name("rsi").unwrap().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_huge_periods() {
        let strategy: Strategy = serde_json::from_str(
            r#"{"type": "rsi_reversion", "period": 18446744073709551615, "oversold": 30, "overbought": 70}"#,
        )
        .unwrap();
        assert!(matches!(strategy.validate(), Err(AnalysisError::InvalidData(_))));

        assert!(Strategy::SmaCrossover { fast: 20, slow: MAX_PERIOD + 1 }.validate().is_err());
        assert!(Strategy::SmaCrossover { fast: 20, slow: MAX_PERIOD }.validate().is_ok());
    }
}
