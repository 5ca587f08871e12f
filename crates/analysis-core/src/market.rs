use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::AnalysisError;

/// History range, named the way Yahoo's chart endpoint names them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1mo")]
    Month1,
    #[serde(rename = "3mo")]
    Month3,
    #[serde(rename = "6mo")]
    Month6,
    #[default]
    #[serde(rename = "1y")]
    Year1,
    #[serde(rename = "2y")]
    Year2,
    #[serde(rename = "5y")]
    Year5,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Month1 => "1mo",
            Period::Month3 => "3mo",
            Period::Month6 => "6mo",
            Period::Year1 => "1y",
            Period::Year2 => "2y",
            Period::Year5 => "5y",
            Period::Max => "max",
        }
    }

    /// Calendar days covered; `None` for the full history
    pub fn approx_days(&self) -> Option<i64> {
        match self {
            Period::Month1 => Some(31),
            Period::Month3 => Some(92),
            Period::Month6 => Some(183),
            Period::Year1 => Some(366),
            Period::Year2 => Some(731),
            Period::Year5 => Some(1827),
            Period::Max => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1mo" | "1m" | "30d" | "1month" => Ok(Period::Month1),
            "3mo" | "3m" | "90d" | "3months" => Ok(Period::Month3),
            "6mo" | "6m" | "180d" | "6months" => Ok(Period::Month6),
            "1y" | "12mo" | "1yr" | "1year" | "365d" => Ok(Period::Year1),
            "2y" | "24mo" | "2yr" | "2years" => Ok(Period::Year2),
            "5y" | "60mo" | "5yr" | "5years" => Ok(Period::Year5),
            "max" | "all" => Ok(Period::Max),
            other => Err(AnalysisError::InvalidData(format!("unsupported period '{}'", other))),
        }
    }
}

/// Bar size. Only daily and coarser bars are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1wk")]
    Week1,
    #[serde(rename = "1mo")]
    Month1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Day1 => "1d",
            Interval::Week1 => "1wk",
            Interval::Month1 => "1mo",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" | "d" | "day" | "daily" => Ok(Interval::Day1),
            "1wk" | "1w" | "w" | "week" | "weekly" => Ok(Interval::Week1),
            "1mo" | "mo" | "month" | "monthly" => Ok(Interval::Month1),
            other => Err(AnalysisError::InvalidData(format!("unsupported interval '{}'", other))),
        }
    }
}

const MAX_SYMBOL_LEN: usize = 15;

/// A validated, upper-cased ticker symbol such as `AAPL`, `CBA.AX` or `^GSPC`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize user input. When `default_suffix` is set (e.g. `.AX`) it is
    /// appended to plain tickers that carry no exchange suffix.
    pub fn parse(raw: &str, default_suffix: Option<&str>) -> Result<Self, AnalysisError> {
        let mut symbol = raw.trim().to_uppercase();

        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
            return Err(AnalysisError::InvalidSymbol(raw.to_string()));
        }
        let valid = symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
        if !valid || symbol.starts_with('.') || symbol.ends_with('.') {
            return Err(AnalysisError::InvalidSymbol(raw.to_string()));
        }

        if let Some(suffix) = default_suffix.map(str::trim).filter(|s| !s.is_empty()) {
            let is_special = symbol.starts_with('^') || symbol.contains('=');
            if !is_special && !symbol.contains('.') {
                let suffix = suffix.to_uppercase();
                if suffix.starts_with('.') {
                    symbol.push_str(&suffix);
                } else {
                    symbol.push('.');
                    symbol.push_str(&suffix);
                }
            }
        }

        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ticker without its exchange suffix (`CBA.AX` -> `CBA`)
    pub fn base(&self) -> &str {
        match self.0.rsplit_once('.') {
            Some((base, _)) if !base.is_empty() => base,
            _ => &self.0,
        }
    }

    /// Exchange suffix without the dot, if any
    pub fn suffix(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(_, s)| s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_aliases() {
        assert_eq!("1Y".parse::<Period>().unwrap(), Period::Year1);
        assert_eq!("3m".parse::<Period>().unwrap(), Period::Month3);
        assert_eq!("all".parse::<Period>().unwrap(), Period::Max);
        assert!("7d".parse::<Period>().is_err());
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("daily".parse::<Interval>().unwrap(), Interval::Day1);
        assert_eq!("1wk".parse::<Interval>().unwrap(), Interval::Week1);
        assert!("5m".parse::<Interval>().is_err());
    }

    #[test]
    fn test_symbol_normalizes_case_and_whitespace() {
        let s = Symbol::parse("  aapl ", None).unwrap();
        assert_eq!(s.as_str(), "AAPL");
        assert_eq!(s.suffix(), None);
    }

    #[test]
    fn test_symbol_appends_market_suffix() {
        let s = Symbol::parse("cba", Some(".AX")).unwrap();
        assert_eq!(s.as_str(), "CBA.AX");
        assert_eq!(s.base(), "CBA");
        assert_eq!(s.suffix(), Some("AX"));

        let s = Symbol::parse("bhp", Some("ax")).unwrap();
        assert_eq!(s.as_str(), "BHP.AX");
    }

    #[test]
    fn test_symbol_keeps_existing_suffix_and_indices() {
        assert_eq!(Symbol::parse("VOD.L", Some(".AX")).unwrap().as_str(), "VOD.L");
        assert_eq!(Symbol::parse("^GSPC", Some(".AX")).unwrap().as_str(), "^GSPC");
        assert_eq!(Symbol::parse("EURUSD=X", Some(".AX")).unwrap().as_str(), "EURUSD=X");
    }

    #[test]
    fn test_symbol_rejects_garbage() {
        assert!(Symbol::parse("", None).is_err());
        assert!(Symbol::parse("AAPL; DROP", None).is_err());
        assert!(Symbol::parse("../etc", None).is_err());
        assert!(Symbol::parse("ABCDEFGHIJKLMNOP", None).is_err());
    }
}
