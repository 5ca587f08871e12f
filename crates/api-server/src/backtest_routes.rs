use std::sync::Arc;

use analysis_core::{AnalysisError, Interval, Period};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use backtest_engine::{BacktestConfig, BacktestDb, BacktestEngine, BacktestResult, BacktestSummary, Strategy};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::stock_routes::parse_period;
use crate::{ApiJson, ApiResponse, AppError, AppState};

/// Either a strategy name with default parameters (`"sma"`) or a full
/// parameter object (`{"type": "sma_crossover", "fast": 10, "slow": 30}`)
#[derive(Deserialize)]
#[serde(untagged)]
pub enum StrategyInput {
    Name(String),
    Params(Strategy),
}

impl StrategyInput {
    fn resolve(self) -> Result<Strategy, AnalysisError> {
        match self {
            StrategyInput::Name(name) => Strategy::from_name(&name),
            StrategyInput::Params(strategy) => Ok(strategy),
        }
    }
}

#[derive(Deserialize)]
pub struct RunBacktestRequest {
    pub symbol: String,
    pub strategy: StrategyInput,
    pub period: Option<String>,
    pub initial_capital: Option<f64>,
    pub position_size_percent: Option<f64>,
    pub commission_rate: Option<f64>,
    pub slippage_rate: Option<f64>,
    pub stop_loss_percent: Option<f64>,
    pub take_profit_percent: Option<f64>,
    #[serde(default)]
    pub save: bool,
}

pub fn backtest_routes() -> Router<AppState> {
    Router::new()
        .route("/api/backtest", post(run_backtest))
        .route("/api/backtest/results", get(get_all_backtests))
        .route("/api/backtest/results/:id", get(get_backtest).delete(delete_backtest))
}

fn backtest_db(state: &AppState) -> Result<&Arc<BacktestDb>, AppError> {
    state
        .backtest_db
        .as_ref()
        .ok_or_else(|| AnalysisError::DatabaseError("Backtest database not configured".to_string()).into())
}

/// Run a backtest
async fn run_backtest(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RunBacktestRequest>,
) -> Result<Json<ApiResponse<BacktestResult>>, AppError> {
    let symbol = state.parse_symbol(&req.symbol)?;
    let strategy = req.strategy.resolve()?;
    let period = parse_period(req.period.as_deref(), Period::Year1)?;

    let mut config = BacktestConfig::new(symbol.as_str(), strategy);
    if let Some(capital) = req.initial_capital {
        config.initial_capital = Decimal::from_f64(capital)
            .ok_or_else(|| AnalysisError::InvalidData(format!("initial_capital {} is not a valid amount", capital)))?;
    }
    if let Some(size) = req.position_size_percent {
        config.position_size_percent = size;
    }
    if let Some(rate) = req.commission_rate {
        config.commission_rate = rate;
    }
    if let Some(rate) = req.slippage_rate {
        config.slippage_rate = rate;
    }
    config.stop_loss_percent = req.stop_loss_percent;
    config.take_profit_percent = req.take_profit_percent;

    // fail on a missing store before doing the work
    let db = if req.save { Some(backtest_db(&state)?.clone()) } else { None };

    let bars = state.market.get_bars(symbol.as_str(), period, Interval::Day1).await?.data;
    let engine = BacktestEngine::new(config);
    let mut result = engine.run_strategy(&bars)?;

    tracing::info!(
        "Backtest {} {}: {} trades, {:.2}% return",
        result.symbol,
        result.strategy_name,
        result.total_trades,
        result.total_return_percent
    );

    if let Some(db) = db {
        let id = db.save_backtest(&result).await?;
        result.id = Some(id);
    }

    Ok(Json(ApiResponse::success(result)))
}

/// Get all backtest results
async fn get_all_backtests(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<BacktestSummary>>>, AppError> {
    let results = backtest_db(&state)?.list_backtests().await?;
    Ok(Json(ApiResponse::success(results)))
}

/// Get specific backtest result
async fn get_backtest(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BacktestResult>>, AppError> {
    let result = backtest_db(&state)?
        .get_backtest(id)
        .await?
        .ok_or_else(|| AnalysisError::NotFound(format!("Backtest {} not found", id)))?;

    Ok(Json(ApiResponse::success(result)))
}

/// Delete backtest result
async fn delete_backtest(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    if !backtest_db(&state)?.delete_backtest(id).await? {
        return Err(AnalysisError::NotFound(format!("Backtest {} not found", id)).into());
    }
    Ok(Json(ApiResponse::success(format!("Backtest {} deleted", id))))
}
