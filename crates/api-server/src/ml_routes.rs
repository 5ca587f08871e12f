use std::sync::Arc;

use analysis_core::{Bar, Interval, Period, PredictionResult};
use anyhow::anyhow;
use axum::{extract::State, routing::get, routing::post, Json, Router};
use ml_engine::{ModelParams, ModelSummary, PricePredictor, TrainedModel, TrainingReport};
use serde::Deserialize;

use crate::stock_routes::parse_period;
use crate::{ApiJson, ApiResponse, AppError, AppState};

#[derive(Deserialize)]
pub struct PredictRequest {
    pub symbol: String,
    pub period: Option<String>,
    #[serde(default = "default_horizon")]
    pub horizon_days: usize,
}

#[derive(Deserialize)]
pub struct TrainRequest {
    pub symbol: String,
    pub period: Option<String>,
    #[serde(default = "default_horizon")]
    pub horizon_days: usize,
    pub n_trees: Option<usize>,
    pub max_depth: Option<u16>,
    pub min_samples_split: Option<usize>,
    pub test_fraction: Option<f64>,
}

fn default_horizon() -> usize {
    5
}

pub fn ml_routes() -> Router<AppState> {
    Router::new()
        .route("/api/predict", post(predict))
        .route("/api/train", post(train))
        .route("/api/models", get(list_models))
}

async fn training_bars(state: &AppState, symbol: &str, period: Option<&str>) -> Result<Vec<Bar>, AppError> {
    let period = parse_period(period, Period::Year2)?;
    Ok(state.market.get_bars(symbol, period, Interval::Day1).await?.data)
}

/// Forest fitting is CPU-bound; keep it off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, analysis_core::AnalysisError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow!("Model task failed: {}", e)))?
        .map_err(AppError::from)
}

/// POST /api/predict
///
/// Uses a registered model for the symbol and horizon while it is fresh;
/// otherwise fits a throwaway model on the requested history.
async fn predict(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PredictRequest>,
) -> Result<Json<ApiResponse<PredictionResult>>, AppError> {
    let symbol = state.parse_symbol(&req.symbol)?.to_string();
    let bars = training_bars(&state, &symbol, req.period.as_deref()).await?;

    let registered = state.models.get_fresh(&symbol, req.horizon_days);
    let from_registry = registered.is_some();
    let sym = symbol.clone();
    let horizon = req.horizon_days;

    let mut prediction = match registered {
        Some(model) => {
            tracing::debug!("Predicting {} with registered {}d model", symbol, horizon);
            blocking(move || model.predict(&sym, &bars)).await?
        }
        None => blocking(move || PricePredictor::fit_predict(&sym, &bars, horizon, ModelParams::default())).await?,
    };

    if let Some(metrics) = prediction.metrics.as_object_mut() {
        metrics.insert("from_registry".to_string(), from_registry.into());
    }

    tracing::info!(
        "{} {}d prediction: {:?} ({:.2}%)",
        symbol,
        prediction.horizon_days,
        prediction.prediction,
        prediction.predicted_change_percent
    );
    Ok(Json(ApiResponse::success(prediction)))
}

/// POST /api/train
async fn train(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TrainRequest>,
) -> Result<Json<ApiResponse<TrainingReport>>, AppError> {
    let symbol = state.parse_symbol(&req.symbol)?.to_string();
    let defaults = ModelParams::default();
    let params = ModelParams {
        n_trees: req.n_trees.unwrap_or(defaults.n_trees),
        max_depth: req.max_depth.unwrap_or(defaults.max_depth),
        min_samples_split: req.min_samples_split.unwrap_or(defaults.min_samples_split),
        test_fraction: req.test_fraction.unwrap_or(defaults.test_fraction),
    };
    params.validate()?;

    let bars = training_bars(&state, &symbol, req.period.as_deref()).await?;
    let horizon = req.horizon_days;
    let sym = symbol.clone();
    let model: TrainedModel = blocking(move || PricePredictor::train(&sym, &bars, horizon, params)).await?;

    let model: Arc<TrainedModel> = state.models.insert(model);
    tracing::info!(
        "Trained {} {}d model: accuracy {:.3}, MAE {:.2}%",
        symbol,
        model.horizon_days(),
        model.report.accuracy,
        model.report.mae_percent
    );
    Ok(Json(ApiResponse::success(model.report.clone())))
}

/// GET /api/models
async fn list_models(State(state): State<AppState>) -> Json<ApiResponse<Vec<ModelSummary>>> {
    Json(ApiResponse::success(state.models.list()))
}
