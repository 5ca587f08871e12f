use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use price_cache::CacheStats;

use crate::{ApiResponse, AppError, AppState};

pub fn cache_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/:symbol", delete(invalidate_symbol))
}

async fn cache_stats(State(state): State<AppState>) -> Json<ApiResponse<CacheStats>> {
    Json(ApiResponse::success(state.market.cache().stats().await))
}

async fn clear_cache(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    state.market.cache().clear().await;
    tracing::info!("Cache cleared");
    Json(ApiResponse::success("Cache cleared".to_string()))
}

async fn invalidate_symbol(
    State(state): State<AppState>,
    Path(raw_symbol): Path<String>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let symbol = state.parse_symbol(&raw_symbol)?;
    state.market.cache().invalidate_symbol(symbol.as_str()).await;
    Ok(Json(ApiResponse::success(format!("Cache entries for {} removed", symbol))))
}
