use analysis_core::{Interval, Period};

/// Cache key for a bar series: `bars:{TICKER}:{period}:{interval}`
pub fn bars_key(symbol: &str, period: Period, interval: Interval) -> String {
    format!("{}{}:{}", bars_prefix(symbol), period.as_str(), interval.as_str())
}

/// Prefix shared by every bar series of one ticker
pub fn bars_prefix(symbol: &str) -> String {
    format!("bars:{}:", symbol)
}

pub fn quote_key(symbol: &str) -> String {
    format!("quote:{}", symbol)
}

pub fn news_key(symbol: &str) -> String {
    format!("news:{}", symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_key_layout() {
        assert_eq!(bars_key("CBA.AX", Period::Month6, Interval::Day1), "bars:CBA.AX:6mo:1d");
    }

    #[test]
    fn test_prefix_does_not_overlap_other_tickers() {
        let prefix = bars_prefix("AA");
        assert!(!bars_key("AAPL", Period::Year1, Interval::Day1).starts_with(&prefix));
        assert!(bars_key("AA", Period::Year1, Interval::Day1).starts_with(&prefix));
    }
}
