use analysis_core::Bar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::indicators::*;

/// Left-pad `values` with `None` so the last value lines up with the last of
/// `len` bars. Excess leading values are dropped.
pub fn align(values: &[f64], len: usize) -> Vec<Option<f64>> {
    if values.len() >= len {
        return values[values.len() - len..].iter().copied().map(Some).collect();
    }

    let mut out = vec![None; len - values.len()];
    out.extend(values.iter().copied().map(Some));
    out
}

/// Per-bar indicator columns for charting. Every column has one entry per bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub dates: Vec<NaiveDate>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub sma_20: Vec<Option<f64>>,
    pub sma_50: Vec<Option<f64>>,
    pub sma_200: Vec<Option<f64>>,
    pub ema_12: Vec<Option<f64>>,
    pub ema_26: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub macd_histogram: Vec<Option<f64>>,
    pub bb_upper: Vec<Option<f64>>,
    pub bb_middle: Vec<Option<f64>>,
    pub bb_lower: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn from_bars(bars: &[Bar]) -> Self {
        let n = bars.len();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let macd_result = macd(&closes, 12, 26, 9);
        let bb = bollinger_bands(&closes, 20, 2.0);

        Self {
            dates: bars.iter().map(Bar::date).collect(),
            volume: bars.iter().map(|b| b.volume).collect(),
            sma_20: align(&sma(&closes, 20), n),
            sma_50: align(&sma(&closes, 50), n),
            sma_200: align(&sma(&closes, 200), n),
            ema_12: align(&ema(&closes, 12), n),
            ema_26: align(&ema(&closes, 26), n),
            rsi: align(&rsi(&closes, 14), n),
            macd: align(&macd_result.macd_line, n),
            macd_signal: align(&macd_result.signal_line, n),
            macd_histogram: align(&macd_result.histogram, n),
            bb_upper: align(&bb.upper, n),
            bb_middle: align(&bb.middle, n),
            bb_lower: align(&bb.lower, n),
            close: closes,
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}
