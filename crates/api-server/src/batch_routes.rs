//! Multi-symbol snapshot fetch. Tickers are fetched one after another
//! with the configured delay; failures are reported per symbol.

use analysis_core::{AnalysisError, Interval, Period, SignalStrength};
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use technical_analysis::IndicatorSnapshot;

use crate::stock_routes::{parse_period, technical_signal};
use crate::{ApiJson, ApiResponse, AppError, AppState};

const MAX_BATCH_SYMBOLS: usize = 50;

#[derive(Deserialize)]
pub struct BatchRequest {
    pub symbols: Vec<String>,
    pub period: Option<String>,
}

#[derive(Serialize)]
pub struct BatchEntry {
    pub symbol: String,
    pub source: Option<String>,
    pub cached: bool,
    pub bar_count: usize,
    pub snapshot: Option<IndicatorSnapshot>,
    pub signal: Option<SignalStrength>,
    pub error: Option<String>,
}

impl BatchEntry {
    fn failed(symbol: String, error: String) -> Self {
        Self {
            symbol,
            source: None,
            cached: false,
            bar_count: 0,
            snapshot: None,
            signal: None,
            error: Some(error),
        }
    }
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
}

pub fn batch_routes() -> Router<AppState> {
    Router::new().route("/api/batch", post(batch))
}

async fn batch(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BatchRequest>,
) -> Result<Json<ApiResponse<BatchResponse>>, AppError> {
    if req.symbols.is_empty() {
        return Err(AnalysisError::InvalidData("symbols must not be empty".to_string()).into());
    }
    if req.symbols.len() > MAX_BATCH_SYMBOLS {
        return Err(AnalysisError::InvalidData(format!("at most {} symbols per batch", MAX_BATCH_SYMBOLS)).into());
    }
    let period = parse_period(req.period.as_deref(), Period::Year1)?;

    let requested = req.symbols.len();
    let mut results = Vec::with_capacity(requested);
    let mut valid = Vec::new();
    for raw in &req.symbols {
        match state.parse_symbol(raw) {
            Ok(symbol) => valid.push(symbol.to_string()),
            Err(e) => results.push(BatchEntry::failed(raw.clone(), e.to_string())),
        }
    }

    for outcome in state.market.get_bars_batch(&valid, period, Interval::Day1).await {
        let entry = match outcome.result {
            Ok(fetched) => BatchEntry {
                signal: technical_signal(&state, &outcome.symbol, &fetched.data).map(|a| a.signal),
                snapshot: IndicatorSnapshot::from_bars(&fetched.data).ok(),
                bar_count: fetched.data.len(),
                source: Some(fetched.source),
                cached: fetched.cached,
                symbol: outcome.symbol,
                error: None,
            },
            Err(e) => BatchEntry::failed(outcome.symbol, e),
        };
        results.push(entry);
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    tracing::info!("Batch of {}: {} ok, {} failed", requested, requested - failed, failed);

    Ok(Json(ApiResponse::success(BatchResponse {
        requested,
        succeeded: requested - failed,
        failed,
        results,
    })))
}
