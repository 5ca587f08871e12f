use analysis_core::{normalize_bars, AnalysisError, Bar, Interval, NewsArticle, Period, PriceSource, Quote};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::http::{endpoint, HttpFetcher, ProviderConfig};

/// Yahoo Finance chart and search endpoints (no API key)
#[derive(Clone)]
pub struct YahooFinanceClient {
    http: HttpFetcher,
    base_url: String,
}

/// Parsed `chart.result[0]`
#[derive(Debug)]
pub struct ChartData {
    pub bars: Vec<Bar>,
    pub meta: Value,
}

impl YahooFinanceClient {
    pub fn new() -> Self {
        Self::with_config(ProviderConfig::yahoo())
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        Self {
            http: HttpFetcher::new("yahoo", &config),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_chart(&self, symbol: &str, range: &str, interval: &str) -> Result<ChartData, AnalysisError> {
        let url = endpoint(&self.base_url, &["v8", "finance", "chart", symbol])?;
        let json = self
            .http
            .get_json(
                url,
                &[
                    ("range", range.to_string()),
                    ("interval", interval.to_string()),
                    ("includeAdjustedClose", "true".to_string()),
                ],
            )
            .await?;

        parse_chart(symbol, &json)
    }

    /// Get historical price data
    pub async fn get_historical_data(&self, symbol: &str, period: Period, interval: Interval) -> Result<Vec<Bar>, AnalysisError> {
        let chart = self.fetch_chart(symbol, period.as_str(), interval.as_str()).await?;
        if chart.bars.is_empty() {
            return Err(AnalysisError::NotFound(format!("Yahoo returned no bars for {}", symbol)));
        }
        tracing::debug!("Yahoo: {} bars for {} ({}, {})", chart.bars.len(), symbol, period, interval);
        Ok(chart.bars)
    }

    /// Get quote data for a symbol, read from the chart metadata
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
        let chart = self.fetch_chart(symbol, "5d", "1d").await?;
        quote_from_chart(symbol, &chart)
    }

    /// Recent headlines from the search endpoint
    pub async fn get_news(&self, symbol: &str, limit: usize) -> Result<Vec<NewsArticle>, AnalysisError> {
        let url = endpoint(&self.base_url, &["v1", "finance", "search"])?;
        let json = self
            .http
            .get_json(
                url,
                &[
                    ("q", symbol.to_string()),
                    ("quotesCount", "0".to_string()),
                    ("newsCount", limit.to_string()),
                ],
            )
            .await?;

        Ok(parse_news(symbol, &json, limit))
    }
}

impl Default for YahooFinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for YahooFinanceClient {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn get_bars(&self, symbol: &str, period: Period, interval: Interval) -> Result<Vec<Bar>, AnalysisError> {
        self.get_historical_data(symbol, period, interval).await
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
        YahooFinanceClient::get_quote(self, symbol).await
    }
}

/// Parse a v8 chart response. Rows with a null open/high/low/close are
/// skipped; a null volume counts as zero.
pub fn parse_chart(symbol: &str, json: &Value) -> Result<ChartData, AnalysisError> {
    let chart = json
        .get("chart")
        .ok_or_else(|| AnalysisError::InvalidData("Yahoo response has no chart".to_string()))?;

    if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(|v| v.as_str()).unwrap_or("");
        let description = error
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return if code.eq_ignore_ascii_case("Not Found") || description.contains("No data found") {
            Err(AnalysisError::NotFound(format!("{}: {}", symbol, description)))
        } else {
            Err(AnalysisError::ApiError(format!("Yahoo error for {}: {} {}", symbol, code, description)))
        };
    }

    let result = chart
        .get("result")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| AnalysisError::NotFound(format!("No chart data found for {}", symbol)))?;

    let meta = result.get("meta").cloned().unwrap_or(Value::Null);

    // A valid symbol with no trades in range comes back without timestamps
    let Some(timestamps) = result.get("timestamp").and_then(|v| v.as_array()) else {
        return Ok(ChartData { bars: vec![], meta });
    };

    let quote = result
        .get("indicators")
        .and_then(|v| v.get("quote"))
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| AnalysisError::InvalidData(format!("No quote block for {}", symbol)))?;

    let opens = series(quote, "open", symbol)?;
    let highs = series(quote, "high", symbol)?;
    let lows = series(quote, "low", symbol)?;
    let closes = series(quote, "close", symbol)?;
    let volumes = quote.get("volume").and_then(|v| v.as_array());

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let value = |s: &Vec<Value>| s.get(i).and_then(|v| v.as_f64());
        let (Some(ts), Some(open), Some(high), Some(low), Some(close)) =
            (ts.as_i64(), value(opens), value(highs), value(lows), value(closes))
        else {
            continue;
        };
        let Some(timestamp) = DateTime::from_timestamp(ts, 0) else {
            continue;
        };
        let volume = volumes.and_then(|v| v.get(i)).and_then(|v| v.as_f64()).unwrap_or(0.0);

        bars.push(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Ok(ChartData {
        bars: normalize_bars(bars),
        meta,
    })
}

fn series<'a>(quote: &'a Value, name: &str, symbol: &str) -> Result<&'a Vec<Value>, AnalysisError> {
    quote
        .get(name)
        .and_then(|v| v.as_array())
        .ok_or_else(|| AnalysisError::InvalidData(format!("No {} series for {}", name, symbol)))
}

fn quote_from_chart(symbol: &str, chart: &ChartData) -> Result<Quote, AnalysisError> {
    let meta = &chart.meta;
    let num = |key: &str| meta.get(key).and_then(|v| v.as_f64());

    let price = num("regularMarketPrice")
        .or_else(|| chart.bars.last().map(|b| b.close))
        .ok_or_else(|| AnalysisError::NotFound(format!("No price available for {}", symbol)))?;

    let previous_close = num("previousClose")
        .or_else(|| {
            // Second-to-last daily close when the last bar is today's session
            let n = chart.bars.len();
            (n >= 2).then(|| chart.bars[n - 2].close)
        })
        .or_else(|| num("chartPreviousClose"));

    let change = previous_close.map(|p| price - p).unwrap_or(0.0);
    let change_percent = match previous_close {
        Some(p) if p != 0.0 => change / p * 100.0,
        _ => 0.0,
    };

    let latest_trading_day = meta
        .get("regularMarketTime")
        .and_then(|v| v.as_i64())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .or_else(|| chart.bars.last().map(|b| b.timestamp))
        .map(|ts| ts.format("%Y-%m-%d").to_string());

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        change,
        change_percent,
        volume: num("regularMarketVolume").or_else(|| chart.bars.last().map(|b| b.volume)),
        previous_close,
        open: chart.bars.last().map(|b| b.open),
        day_high: num("regularMarketDayHigh").or_else(|| chart.bars.last().map(|b| b.high)),
        day_low: num("regularMarketDayLow").or_else(|| chart.bars.last().map(|b| b.low)),
        latest_trading_day,
        source: "yahoo".to_string(),
    })
}

fn parse_news(symbol: &str, json: &Value, limit: usize) -> Vec<NewsArticle> {
    let Some(items) = json.get("news").and_then(|v| v.as_array()) else {
        return vec![];
    };

    items
        .iter()
        .filter_map(|item| {
            let title = item.get("title")?.as_str()?.trim();
            if title.is_empty() {
                return None;
            }
            let published_utc = item
                .get("providerPublishTime")
                .and_then(|v| v.as_i64())
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now);
            let tickers = item
                .get("relatedTickers")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
                .unwrap_or_else(|| vec![symbol.to_string()]);

            Some(NewsArticle {
                id: item
                    .get("uuid")
                    .and_then(|v| v.as_str())
                    .unwrap_or(title)
                    .to_string(),
                title: title.to_string(),
                publisher: item.get("publisher").and_then(|v| v.as_str()).map(str::to_string),
                published_utc,
                article_url: item.get("link").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                description: item.get("summary").and_then(|v| v.as_str()).map(str::to_string),
                tickers,
            })
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn chart_json() -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "AAPL",
                        "regularMarketPrice": 103.0,
                        "previousClose": 100.0,
                        "regularMarketVolume": 5000,
                        "regularMarketTime": 1704412800
                    },
                    "timestamp": [1704326400, 1704153600, 1704240000, 1704412800],
                    "indicators": {
                        "quote": [{
                            "open":   [101.0, 99.0, null, 102.0],
                            "high":   [102.0, 100.0, 101.0, 104.0],
                            "low":    [100.0, 98.0, 99.0, 101.0],
                            "close":  [101.5, 99.5, 100.5, 103.0],
                            "volume": [1000, 2000, 3000, null]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    fn test_client(base_url: String) -> YahooFinanceClient {
        YahooFinanceClient::with_config(ProviderConfig {
            base_url,
            requests_per_minute: 100,
            min_interval: Duration::ZERO,
            daily_quota: None,
            timeout: Duration::from_secs(5),
            max_attempts: 1,
            retry_delay: Duration::from_millis(1),
        })
    }

    #[test]
    fn test_parse_chart_skips_null_rows_and_sorts() {
        let chart = parse_chart("AAPL", &chart_json()).unwrap();
        assert_eq!(chart.bars.len(), 3);
        assert!(chart.bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(chart.bars[0].close, 99.5);
        // Null volume becomes zero
        assert_eq!(chart.bars[2].volume, 0.0);
    }

    #[test]
    fn test_parse_chart_not_found_error() {
        let json = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let err = parse_chart("ZZZZ", &json).unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }

    #[test]
    fn test_quote_from_chart_uses_meta() {
        let chart = parse_chart("AAPL", &chart_json()).unwrap();
        let quote = quote_from_chart("AAPL", &chart).unwrap();
        assert_eq!(quote.price, 103.0);
        assert_eq!(quote.previous_close, Some(100.0));
        assert!((quote.change - 3.0).abs() < 1e-9);
        assert!((quote.change_percent - 3.0).abs() < 1e-9);
        assert_eq!(quote.latest_trading_day.as_deref(), Some("2024-01-05"));
    }

    #[test]
    fn test_parse_news_respects_limit() {
        let json = json!({
            "news": [
                {"uuid": "a", "title": "Apple beats estimates", "publisher": "Reuters",
                 "link": "https://example.com/a", "providerPublishTime": 1704412800,
                 "relatedTickers": ["AAPL"]},
                {"uuid": "b", "title": "  ", "link": "https://example.com/b"},
                {"uuid": "c", "title": "Apple supplier warns", "link": "https://example.com/c"}
            ]
        });
        let news = parse_news("AAPL", &json, 1);
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].publisher.as_deref(), Some("Reuters"));

        let all = parse_news("AAPL", &json, 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].tickers, vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn test_get_historical_data_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("range".into(), "6mo".into()),
                mockito::Matcher::UrlEncoded("interval".into(), "1d".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chart_json().to_string())
            .create_async()
            .await;

        let client = test_client(server.url());
        let bars = client
            .get_historical_data("AAPL", Period::Month6, Interval::Day1)
            .await
            .unwrap();

        assert_eq!(bars.len(), 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_symbol_404_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v8/finance/chart/NOPE")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body(r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        let err = client
            .get_historical_data("NOPE", Period::Year1, Interval::Day1)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }
}
