use analysis_core::{AnalysisError, Bar};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::indicators::*;

pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const RSI_OVERSOLD: f64 = 30.0;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiZone {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPosition {
    AboveUpper,
    BelowLower,
    Inside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Bullish,
    Bearish,
}

/// Long-term moving average regime (50-day vs 200-day, or 20 vs 50 on short histories)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossState {
    GoldenCross,
    DeathCross,
}

/// Latest indicator readings plus the flags the dashboard renders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub date: NaiveDate,
    pub price: f64,
    pub volume: f64,
    pub avg_volume_20: Option<f64>,

    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,

    pub rsi: Option<f64>,
    pub rsi_zone: Option<RsiZone>,

    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub macd_momentum: Option<Momentum>,

    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_percent_b: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_position: Option<BandPosition>,

    pub atr: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    pub obv: Option<f64>,
    pub vwap: Option<f64>,

    pub cross_state: Option<CrossState>,
    pub change_1d: Option<f64>,
    pub change_5d: Option<f64>,
    pub change_20d: Option<f64>,
    /// Annualised volatility of daily returns over the last 20 bars, in percent
    pub volatility_annualized: Option<f64>,
}

fn change_over(closes: &[f64], lookback: usize) -> Option<f64> {
    let n = closes.len();
    if n <= lookback {
        return None;
    }
    let base = closes[n - 1 - lookback];
    (base != 0.0).then(|| (closes[n - 1] / base - 1.0) * 100.0)
}

impl IndicatorSnapshot {
    pub fn from_bars(bars: &[Bar]) -> Result<Self, AnalysisError> {
        let last = bars
            .last()
            .ok_or_else(|| AnalysisError::InsufficientData("No bars to summarise".to_string()))?;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let price = last.close;

        let sma_20 = sma(&closes, 20).last().copied();
        let sma_50 = sma(&closes, 50).last().copied();
        let sma_200 = sma(&closes, 200).last().copied();

        let rsi_value = rsi(&closes, 14).last().copied();
        let rsi_zone = rsi_value.map(|r| {
            if r > RSI_OVERBOUGHT {
                RsiZone::Overbought
            } else if r < RSI_OVERSOLD {
                RsiZone::Oversold
            } else {
                RsiZone::Neutral
            }
        });

        let macd_result = macd(&closes, 12, 26, 9);
        let macd_value = macd_result.macd_line.last().copied();
        let macd_signal = macd_result.signal_line.last().copied();
        let macd_momentum = match (macd_value, macd_signal) {
            (Some(m), Some(s)) if m > s => Some(Momentum::Bullish),
            (Some(_), Some(_)) => Some(Momentum::Bearish),
            _ => None,
        };

        let bb = bollinger_bands(&closes, 20, 2.0);
        let (bb_upper, bb_middle, bb_lower) = (bb.upper.last().copied(), bb.middle.last().copied(), bb.lower.last().copied());
        let (bb_percent_b, bb_width, bb_position) = match (bb_upper, bb_middle, bb_lower) {
            (Some(upper), Some(middle), Some(lower)) => {
                let range = upper - lower;
                let percent_b = if range != 0.0 { (price - lower) / range } else { 0.5 };
                let width = if middle != 0.0 { range / middle } else { 0.0 };
                let position = if price > upper {
                    BandPosition::AboveUpper
                } else if price < lower {
                    BandPosition::BelowLower
                } else {
                    BandPosition::Inside
                };
                (Some(percent_b), Some(width), Some(position))
            }
            _ => (None, None, None),
        };

        let cross_state = match (sma_50, sma_200, sma_20) {
            (Some(mid), Some(long), _) => Some(if mid > long { CrossState::GoldenCross } else { CrossState::DeathCross }),
            (Some(mid), None, Some(short)) => Some(if short > mid { CrossState::GoldenCross } else { CrossState::DeathCross }),
            _ => None,
        };

        let stoch = stochastic(bars, 14, 3);

        let returns = pct_returns(&closes);
        let volatility_annualized = (returns.len() >= 20).then(|| {
            let recent = &returns[returns.len() - 20..];
            recent.iter().std_dev() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0
        });

        Ok(Self {
            date: last.date(),
            price,
            volume: last.volume,
            avg_volume_20: sma(&volumes, 20).last().copied(),
            sma_20,
            sma_50,
            sma_200,
            ema_12: ema(&closes, 12).last().copied(),
            ema_26: ema(&closes, 26).last().copied(),
            rsi: rsi_value,
            rsi_zone,
            macd: macd_value,
            macd_signal,
            macd_histogram: macd_result.histogram.last().copied(),
            macd_momentum,
            bb_upper,
            bb_middle,
            bb_lower,
            bb_percent_b,
            bb_width,
            bb_position,
            atr: atr(bars, 14).last().copied(),
            stochastic_k: stoch.k.last().copied(),
            stochastic_d: stoch.d.last().copied(),
            obv: obv(bars).last().copied(),
            vwap: vwap(bars).last().copied(),
            cross_state,
            change_1d: change_over(&closes, 1),
            change_5d: change_over(&closes, 5),
            change_20d: change_over(&closes, 20),
            volatility_annualized,
        })
    }
}
