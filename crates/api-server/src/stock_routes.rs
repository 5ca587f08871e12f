//! Price history, quotes, indicators and service health.

use analysis_core::{AnalysisResult, Bar, Interval, Period, Quote};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use market_data::Fetched;
use price_cache::CacheStats;
use serde::{Deserialize, Serialize};
use technical_analysis::{IndicatorSeries, IndicatorSnapshot, MIN_BARS};

use crate::{ApiResponse, AppError, AppState};

#[derive(Deserialize)]
pub struct StockQuery {
    pub period: Option<String>,
    pub interval: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub providers: Vec<&'static str>,
    pub sentiment_model: &'static str,
    pub cache: CacheStats,
    pub trained_models: usize,
    pub backtest_store: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub symbol: String,
    pub period: Period,
    pub interval: Interval,
    pub source: String,
    pub cached: bool,
    pub fetched_at: DateTime<Utc>,
    pub bars: Vec<Bar>,
    /// Chart series aligned one-to-one with `bars`
    pub indicators: IndicatorSeries,
    pub snapshot: Option<IndicatorSnapshot>,
    /// Absent when there are fewer than 50 bars
    pub analysis: Option<AnalysisResult>,
}

#[derive(Serialize)]
pub struct IndicatorsResponse {
    pub symbol: String,
    pub period: Period,
    pub bar_count: usize,
    pub snapshot: IndicatorSnapshot,
    pub analysis: Option<AnalysisResult>,
}

pub fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stock/:symbol", get(get_stock))
        .route("/api/quote/:symbol", get(get_quote))
        .route("/api/indicators/:symbol", get(get_indicators))
}

pub(crate) fn parse_period(raw: Option<&str>, default: Period) -> Result<Period, AppError> {
    Ok(raw.map(str::parse).transpose()?.unwrap_or(default))
}

fn parse_interval(raw: Option<&str>) -> Result<Interval, AppError> {
    Ok(raw.map(str::parse).transpose()?.unwrap_or_default())
}

/// Technical verdict, or `None` when history is too short to score
pub(crate) fn technical_signal(state: &AppState, symbol: &str, bars: &[Bar]) -> Option<AnalysisResult> {
    if bars.len() < MIN_BARS {
        return None;
    }
    match state.technical.analyze_sync(symbol, bars) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!("Technical analysis failed for {}: {}", symbol, e);
            None
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        providers: state.market.provider_names(),
        sentiment_model: if state.sentiment.service().has_finbert() {
            "finbert"
        } else {
            "lexicon"
        },
        cache: state.market.cache().stats().await,
        trained_models: state.models.len(),
        backtest_store: state.backtest_db.is_some(),
        timestamp: Utc::now(),
    }))
}

async fn get_stock(
    State(state): State<AppState>,
    Path(raw_symbol): Path<String>,
    Query(query): Query<StockQuery>,
) -> Result<Json<ApiResponse<StockResponse>>, AppError> {
    let symbol = state.parse_symbol(&raw_symbol)?;
    let period = parse_period(query.period.as_deref(), Period::Year1)?;
    let interval = parse_interval(query.interval.as_deref())?;

    let fetched = state.market.get_bars(symbol.as_str(), period, interval).await?;
    let bars = fetched.data;

    let indicators = IndicatorSeries::from_bars(&bars);
    let snapshot = IndicatorSnapshot::from_bars(&bars).ok();
    let analysis = technical_signal(&state, symbol.as_str(), &bars);

    Ok(Json(ApiResponse::success(StockResponse {
        symbol: symbol.to_string(),
        period,
        interval,
        source: fetched.source,
        cached: fetched.cached,
        fetched_at: fetched.fetched_at,
        bars,
        indicators,
        snapshot,
        analysis,
    })))
}

async fn get_quote(
    State(state): State<AppState>,
    Path(raw_symbol): Path<String>,
) -> Result<Json<ApiResponse<Fetched<Quote>>>, AppError> {
    let symbol = state.parse_symbol(&raw_symbol)?;
    let quote = state.market.get_quote(symbol.as_str()).await?;
    Ok(Json(ApiResponse::success(quote)))
}

async fn get_indicators(
    State(state): State<AppState>,
    Path(raw_symbol): Path<String>,
    Query(query): Query<StockQuery>,
) -> Result<Json<ApiResponse<IndicatorsResponse>>, AppError> {
    let symbol = state.parse_symbol(&raw_symbol)?;
    let period = parse_period(query.period.as_deref(), Period::Year1)?;

    let bars = state.market.get_bars(symbol.as_str(), period, Interval::Day1).await?.data;
    let snapshot = IndicatorSnapshot::from_bars(&bars)?;
    let analysis = technical_signal(&state, symbol.as_str(), &bars);

    Ok(Json(ApiResponse::success(IndicatorsResponse {
        symbol: symbol.to_string(),
        period,
        bar_count: bars.len(),
        snapshot,
        analysis,
    })))
}
