use analysis_core::Bar;
use chrono::NaiveDate;
use technical_analysis::{align, bollinger_bands, macd, pct_returns, rolling_std, rsi, sma};

pub const FEATURE_NAMES: [&str; 10] = [
    "return_1d",
    "return_5d",
    "return_10d",
    "rsi_14",
    "macd_hist_ratio",
    "bb_percent_b",
    "close_sma20_gap",
    "close_sma50_gap",
    "volatility_10d",
    "volume_ratio_20d",
];

/// Feature vector for one bar
#[derive(Debug, Clone)]
pub struct FeatureRow {
    /// Index into the source bars
    pub index: usize,
    pub date: NaiveDate,
    pub close: f64,
    pub values: Vec<f64>,
}

/// Rows with a known outcome `horizon` bars later
#[derive(Debug, Clone, Default)]
pub struct LabeledDataset {
    pub rows: Vec<Vec<f64>>,
    /// 1 when close[t + h] > close[t]
    pub direction: Vec<u32>,
    /// close[t + h] / close[t]
    pub target_ratio: Vec<f64>,
    pub dates: Vec<NaiveDate>,
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn ratio(a: f64, b: f64) -> Option<f64> {
    (b != 0.0).then(|| a / b)
}

pub struct FeatureBuilder;

impl FeatureBuilder {
    /// One row per bar where every feature is defined, in bar order
    pub fn build(bars: &[Bar]) -> Vec<FeatureRow> {
        let n = bars.len();
        if n == 0 {
            return Vec::new();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let rsi_14 = align(&rsi(&closes, 14), n);
        let macd_hist = align(&macd(&closes, 12, 26, 9).histogram, n);
        let bb = bollinger_bands(&closes, 20, 2.0);
        let bb_upper = align(&bb.upper, n);
        let bb_lower = align(&bb.lower, n);
        let sma_20 = align(&sma(&closes, 20), n);
        let sma_50 = align(&sma(&closes, 50), n);
        let volatility = align(&rolling_std(&pct_returns(&closes), 10), n);
        let volume_avg = align(&sma(&volumes, 20), n);

        let mut rows = Vec::new();
        for t in 10..n {
            let close = closes[t];
            let features = (|| {
                let percent_b = {
                    let (upper, lower) = (bb_upper[t]?, bb_lower[t]?);
                    ratio(close - lower, upper - lower).unwrap_or(0.5)
                };
                let volume_ratio = ratio(volumes[t], volume_avg[t]?).unwrap_or(1.0);

                Some(vec![
                    ratio(close, closes[t - 1])? - 1.0,
                    ratio(close, closes[t - 5])? - 1.0,
                    ratio(close, closes[t - 10])? - 1.0,
                    rsi_14[t]?,
                    ratio(macd_hist[t]?, close)?,
                    percent_b,
                    ratio(close, sma_20[t]?)? - 1.0,
                    ratio(close, sma_50[t]?)? - 1.0,
                    volatility[t]?,
                    volume_ratio,
                ])
            })();

            if let Some(values) = features {
                if values.iter().all(|v| v.is_finite()) {
                    rows.push(FeatureRow {
                        index: t,
                        date: bars[t].date(),
                        close,
                        values,
                    });
                }
            }
        }

        rows
    }

    /// Feature rows paired with their outcome `horizon` bars ahead
    pub fn labeled(bars: &[Bar], horizon: usize) -> LabeledDataset {
        let mut dataset = LabeledDataset::default();
        if horizon == 0 {
            return dataset;
        }

        for row in Self::build(bars) {
            let Some(future) = bars.get(row.index + horizon) else {
                break;
            };
            let Some(target) = ratio(future.close, row.close) else {
                continue;
            };

            dataset.direction.push(u32::from(future.close > row.close));
            dataset.target_ratio.push(target);
            dataset.dates.push(row.date);
            dataset.rows.push(row.values);
        }

        dataset
    }

    /// Features of the most recent bar, if it has a full row
    pub fn latest(bars: &[Bar]) -> Option<FeatureRow> {
        let last_index = bars.len().checked_sub(1)?;
        Self::build(bars).pop().filter(|row| row.index == last_index)
    }
}
