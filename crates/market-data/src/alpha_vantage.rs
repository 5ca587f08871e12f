use analysis_core::{normalize_bars, AnalysisError, Bar, Interval, Period, PriceSource, Quote};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;

use crate::http::{endpoint, HttpFetcher, ProviderConfig};
use crate::resample::resample;

/// `outputsize=compact` returns the latest 100 trading days (~140 calendar days)
const COMPACT_CALENDAR_DAYS: i64 = 140;

#[derive(Clone)]
pub struct AlphaVantageClient {
    api_key: String,
    http: HttpFetcher,
    base_url: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, ProviderConfig::alpha_vantage())
    }

    pub fn with_config(api_key: String, config: ProviderConfig) -> Self {
        Self {
            api_key,
            http: HttpFetcher::new("alpha_vantage", &config),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Requests left in today's quota
    pub async fn remaining_today(&self) -> Option<u32> {
        self.http.limiter().remaining_today().await
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Value, AnalysisError> {
        let url = endpoint(&self.base_url, &["query"])?;
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("apikey", self.api_key.clone()));

        let json = self.http.get_json(url, &query).await?;
        check_api_messages(&json)?;
        Ok(json)
    }

    /// Daily OHLCV history via TIME_SERIES_DAILY, trimmed to `period`
    pub async fn get_daily_series(&self, symbol: &str, period: Period) -> Result<Vec<Bar>, AnalysisError> {
        let outputsize = match period.approx_days() {
            Some(days) if days <= COMPACT_CALENDAR_DAYS => "compact",
            _ => "full",
        };

        let json = self
            .query(&[
                ("function", "TIME_SERIES_DAILY".to_string()),
                ("symbol", symbol.to_string()),
                ("outputsize", outputsize.to_string()),
            ])
            .await?;

        let bars = parse_daily_series(symbol, &json)?;
        let bars = trim_to_period(bars, period, Utc::now());
        if bars.is_empty() {
            return Err(AnalysisError::NotFound(format!("Alpha Vantage returned no bars for {}", symbol)));
        }
        tracing::debug!("Alpha Vantage: {} daily bars for {} ({})", bars.len(), symbol, period);
        Ok(bars)
    }

    /// Latest quote via GLOBAL_QUOTE
    pub async fn get_global_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
        let json = self
            .query(&[
                ("function", "GLOBAL_QUOTE".to_string()),
                ("symbol", symbol.to_string()),
            ])
            .await?;

        parse_global_quote(symbol, &json)
    }
}

#[async_trait]
impl PriceSource for AlphaVantageClient {
    fn name(&self) -> &'static str {
        "alpha_vantage"
    }

    async fn get_bars(&self, symbol: &str, period: Period, interval: Interval) -> Result<Vec<Bar>, AnalysisError> {
        let daily = self.get_daily_series(symbol, period).await?;
        Ok(resample(&daily, interval))
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
        self.get_global_quote(symbol).await
    }
}

/// Map Alpha Vantage's in-body error conventions to errors.
/// The service answers HTTP 200 for all of them.
fn check_api_messages(json: &Value) -> Result<(), AnalysisError> {
    if let Some(error) = json.get("Error Message").and_then(|v| v.as_str()) {
        return if error.contains("Invalid API call") {
            Err(AnalysisError::NotFound(format!("Alpha Vantage: {}", error)))
        } else {
            Err(AnalysisError::ApiError(format!("Alpha Vantage error: {}", error)))
        };
    }

    for key in ["Note", "Information"] {
        if let Some(note) = json.get(key).and_then(|v| v.as_str()) {
            return Err(AnalysisError::RateLimited(format!("Alpha Vantage: {}", note)));
        }
    }

    Ok(())
}

fn field(values: &Value, key: &str) -> Option<f64> {
    values.get(key)?.as_str()?.trim().parse::<f64>().ok()
}

/// Parse the `Time Series (Daily)` object. Values arrive as strings.
pub fn parse_daily_series(symbol: &str, json: &Value) -> Result<Vec<Bar>, AnalysisError> {
    let series = json
        .get("Time Series (Daily)")
        .and_then(|v| v.as_object())
        .ok_or_else(|| AnalysisError::NotFound(format!("No daily series found for {}", symbol)))?;

    let mut bars = Vec::with_capacity(series.len());
    for (date, values) in series {
        let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            tracing::debug!("Skipping unparseable Alpha Vantage date {}", date);
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(values, "1. open"),
            field(values, "2. high"),
            field(values, "3. low"),
            field(values, "4. close"),
        ) else {
            continue;
        };
        let Some(timestamp) = day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()) else {
            continue;
        };

        bars.push(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume: field(values, "5. volume").unwrap_or(0.0),
        });
    }

    Ok(normalize_bars(bars))
}

/// Keep bars newer than `now - period`
pub fn trim_to_period(bars: Vec<Bar>, period: Period, now: DateTime<Utc>) -> Vec<Bar> {
    match period.approx_days() {
        Some(days) => {
            let cutoff = now - Duration::days(days);
            bars.into_iter().filter(|b| b.timestamp >= cutoff).collect()
        }
        None => bars,
    }
}

pub fn parse_global_quote(symbol: &str, json: &Value) -> Result<Quote, AnalysisError> {
    let quote = json
        .get("Global Quote")
        .and_then(|v| v.as_object())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AnalysisError::NotFound(format!("No quote found for {}", symbol)))?;
    let quote = Value::Object(quote.clone());

    let price = field(&quote, "05. price")
        .ok_or_else(|| AnalysisError::InvalidData(format!("Quote for {} has no price", symbol)))?;
    let change_percent = quote
        .get("10. change percent")
        .and_then(|v| v.as_str())
        .and_then(|s| s.trim().trim_end_matches('%').parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        change: field(&quote, "09. change").unwrap_or(0.0),
        change_percent,
        volume: field(&quote, "06. volume"),
        previous_close: field(&quote, "08. previous close"),
        open: field(&quote, "02. open"),
        day_high: field(&quote, "03. high"),
        day_low: field(&quote, "04. low"),
        latest_trading_day: quote
            .get("07. latest trading day")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        source: "alpha_vantage".to_string(),
    })
}
