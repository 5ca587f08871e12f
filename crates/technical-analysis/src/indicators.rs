use analysis_core::Bar;
use statrs::statistics::Statistics;

// Every function returns only fully warmed-up values. Output index 0 lines up
// with input index `warmup`, where the warm-up is noted on each function.

/// Simple Moving Average. Warm-up: `period - 1`.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut sum: f64 = data[..period].iter().sum();
    result.push(sum / period as f64);

    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result.push(sum / period as f64);
    }
    result
}

/// Exponential Moving Average seeded with the SMA of the first `period`
/// values. Warm-up: `period - 1`.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result.push(prev);

    for &value in &data[period..] {
        prev = (value - prev) * multiplier + prev;
        result.push(prev);
    }

    result
}

/// Relative Strength Index with Wilder smoothing. Warm-up: `period`.
///
/// A flat window reads 50; a window with gains and no losses reads 100.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() <= period {
        return vec![];
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = data
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(data.len() - period);
    rsi_values.push(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// MACD (Moving Average Convergence Divergence)
#[derive(Debug, Clone, Default)]
pub struct MacdResult {
    /// Warm-up: `slow - 1`
    pub macd_line: Vec<f64>,
    /// Warm-up: `slow + signal - 2`
    pub signal_line: Vec<f64>,
    /// Same alignment as `signal_line`
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    if fast_period == 0 || signal_period == 0 || slow_period <= fast_period {
        return MacdResult::default();
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);
    if ema_slow.is_empty() {
        return MacdResult::default();
    }

    let offset = slow_period - fast_period;
    let macd_line: Vec<f64> = ema_slow
        .iter()
        .enumerate()
        .map(|(i, slow)| ema_fast[i + offset] - slow)
        .collect();

    let signal_line = ema(&macd_line, signal_period);
    let hist_offset = macd_line.len().saturating_sub(signal_line.len());
    let histogram = signal_line
        .iter()
        .enumerate()
        .map(|(i, signal)| macd_line[i + hist_offset] - signal)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Bollinger Bands (population standard deviation). Warm-up: `period - 1`.
#[derive(Debug, Clone, Default)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    if period == 0 || data.len() < period {
        return BollingerBands::default();
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for (window, &mean) in data.windows(period).zip(&middle) {
        let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();

        upper.push(mean + std_dev * std);
        lower.push(mean - std_dev * std);
    }

    BollingerBands { upper, middle, lower }
}

/// Average True Range with Wilder smoothing. Warm-up: `period`.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() <= period {
        return vec![];
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let high_low = w[1].high - w[1].low;
            let high_close = (w[1].high - w[0].close).abs();
            let low_close = (w[1].low - w[0].close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect();

    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    let mut atr_values = Vec::with_capacity(true_ranges.len() - period + 1);
    atr_values.push(atr);

    for tr in &true_ranges[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(atr);
    }

    atr_values
}

/// Stochastic Oscillator
#[derive(Debug, Clone, Default)]
pub struct StochasticResult {
    /// Warm-up: `k_period - 1`
    pub k: Vec<f64>,
    /// Warm-up: `k_period + d_period - 2`
    pub d: Vec<f64>,
}

pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticResult {
    if k_period == 0 || bars.len() < k_period {
        return StochasticResult::default();
    }

    let k_values: Vec<f64> = bars
        .windows(k_period)
        .map(|window| {
            let highest = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let close = window[window.len() - 1].close;

            if highest == lowest {
                50.0
            } else {
                100.0 * (close - lowest) / (highest - lowest)
            }
        })
        .collect();

    let d_values = sma(&k_values, d_period);

    StochasticResult {
        k: k_values,
        d: d_values,
    }
}

/// On-Balance Volume. No warm-up.
pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let Some(first) = bars.first() else {
        return vec![];
    };

    let mut obv_values = Vec::with_capacity(bars.len());
    let mut running = first.volume;
    obv_values.push(running);

    for w in bars.windows(2) {
        if w[1].close > w[0].close {
            running += w[1].volume;
        } else if w[1].close < w[0].close {
            running -= w[1].volume;
        }
        obv_values.push(running);
    }

    obv_values
}

/// Cumulative Volume-Weighted Average Price. No warm-up.
pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    let mut vwap_values = Vec::with_capacity(bars.len());
    let mut cumulative_tpv = 0.0;
    let mut cumulative_volume = 0.0;

    for bar in bars {
        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        cumulative_tpv += typical_price * bar.volume;
        cumulative_volume += bar.volume;

        vwap_values.push(if cumulative_volume > 0.0 {
            cumulative_tpv / cumulative_volume
        } else {
            typical_price
        });
    }

    vwap_values
}

/// Rolling sample standard deviation. Warm-up: `period - 1`.
pub fn rolling_std(data: &[f64], period: usize) -> Vec<f64> {
    if period < 2 || data.len() < period {
        return vec![];
    }
    data.windows(period).map(|w| w.iter().std_dev()).collect()
}

/// Simple period-over-period returns. Warm-up: 1.
///
/// A zero previous value yields a 0.0 return rather than infinity.
pub fn pct_returns(data: &[f64]) -> Vec<f64> {
    data.windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}
