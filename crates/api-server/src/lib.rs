//! HTTP API and dashboard for StockPulse.
//!
//! Every JSON route answers with the same envelope,
//! `{ "success": bool, "data": ..., "error": ... }`, and errors are mapped
//! to status codes in one place ([`AppError`]).

use std::sync::Arc;
use std::time::Duration;

use analysis_core::{AnalysisError, Symbol};
use anyhow::Context;
use axum::error_handling::HandleErrorLayer;
use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Json, Router};
use backtest_engine::BacktestDb;
use market_data::{AlphaVantageClient, MarketDataService, ProviderConfig, YahooFinanceClient};
use ml_engine::ModelRegistry;
use price_cache::PriceCache;
use sentiment_analysis::{FinbertClient, SentimentAnalysisEngine, SentimentService};
use serde::Serialize;
use technical_analysis::TechnicalAnalysisEngine;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub mod backtest_routes;
pub mod batch_routes;
pub mod cache_routes;
pub mod config;
pub mod embedded_frontend;
pub mod ml_routes;
pub mod sentiment_routes;
pub mod stock_routes;

pub use config::ServerConfig;

/// Shared handles for all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub market: Arc<MarketDataService>,
    pub technical: Arc<TechnicalAnalysisEngine>,
    pub sentiment: Arc<SentimentAnalysisEngine>,
    pub models: Arc<ModelRegistry>,
    pub backtest_db: Option<Arc<BacktestDb>>,
}

impl AppState {
    /// Normalize a ticker from the request, applying the default market suffix
    pub fn parse_symbol(&self, raw: &str) -> Result<Symbol, AnalysisError> {
        Symbol::parse(raw, self.config.default_market_suffix.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// JSON body extractor whose rejections use the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug)]
pub enum AppError {
    Analysis(AnalysisError),
    /// Request body missing, malformed, or of the wrong shape
    Body(JsonRejection),
    /// Handler did not finish within the route timeout
    Timeout(Duration),
    Internal(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Analysis(e) => match e {
                AnalysisError::InvalidSymbol(_) | AnalysisError::InvalidData(_) => StatusCode::BAD_REQUEST,
                AnalysisError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AnalysisError::NotFound(_) => StatusCode::NOT_FOUND,
                AnalysisError::RateLimited(_) | AnalysisError::QuotaExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
                AnalysisError::ApiError(_) => StatusCode::BAD_GATEWAY,
                AnalysisError::CacheError(_)
                | AnalysisError::DatabaseError(_)
                | AnalysisError::ModelError(_)
                | AnalysisError::CalculationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Body(rejection) => rejection.status(),
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Analysis(e) => e.to_string(),
            AppError::Body(rejection) => rejection.body_text(),
            AppError::Timeout(limit) => format!("Request did not complete within {}s", limit.as_secs_f64()),
            AppError::Internal(e) => format!("{:#}", e),
        };
        if status.is_server_error() {
            tracing::error!("{} {}", status, message);
        } else {
            tracing::debug!("{} {}", status, message);
        }
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        AppError::Analysis(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Body(rejection)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

/// Wire up providers, cache, models and the backtest store from config.
pub async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    let pool = price_cache::open_sqlite_pool(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let cache = Arc::new(PriceCache::with_pool(pool.clone(), config.cache_ttl).await?);
    let purged = cache.purge_expired().await;
    if purged > 0 {
        tracing::info!("Purged {} expired cache entries", purged);
    }

    let yahoo = YahooFinanceClient::with_config(ProviderConfig {
        requests_per_minute: config.yahoo_per_minute,
        timeout: config.request_timeout,
        ..ProviderConfig::yahoo()
    });

    let mut market = MarketDataService::new(cache)
        .with_provider(Arc::new(yahoo.clone()))
        .with_news(yahoo)
        .with_quote_ttl(config.quote_cache_ttl)
        .with_batch_delay(config.batch_delay);

    match &config.alpha_vantage_api_key {
        Some(key) => {
            let client = AlphaVantageClient::with_config(
                key.clone(),
                ProviderConfig {
                    requests_per_minute: config.alpha_vantage_per_minute,
                    daily_quota: Some(config.alpha_vantage_daily_limit),
                    timeout: config.request_timeout,
                    ..ProviderConfig::alpha_vantage()
                },
            );
            market = market.with_provider(Arc::new(client));
            tracing::info!(
                "Alpha Vantage fallback enabled ({} requests/day)",
                config.alpha_vantage_daily_limit
            );
        }
        None => tracing::info!("ALPHA_VANTAGE_API_KEY not set, Yahoo Finance only"),
    }

    let finbert = config.finbert_url.as_ref().map(|url| {
        tracing::info!("FinBERT service at {}", url);
        FinbertClient::new(url.clone(), config.request_timeout)
    });

    let backtest_db = match BacktestDb::new(pool).await {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            tracing::warn!("Backtest store unavailable: {:#}", e);
            None
        }
    };

    let max_age = chrono::Duration::from_std(config.model_max_age).unwrap_or(chrono::Duration::hours(24));

    Ok(AppState {
        config: Arc::new(config),
        market: Arc::new(market),
        technical: Arc::new(TechnicalAnalysisEngine::new()),
        sentiment: Arc::new(SentimentAnalysisEngine::new(SentimentService::new(finbert))),
        models: Arc::new(ModelRegistry::new(max_age)),
        backtest_db,
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Bound every route by `limit`, answering with the error envelope on expiry.
pub fn with_route_timeout<S>(router: Router<S>, limit: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(move |err: BoxError| async move { route_error(err, limit) }))
            .layer(TimeoutLayer::new(limit)),
    )
}

fn route_error(err: BoxError, limit: Duration) -> AppError {
    if err.is::<Elapsed>() {
        AppError::Timeout(limit)
    } else {
        AppError::Internal(anyhow::anyhow!("middleware error: {}", err))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let route_timeout = state.config.route_timeout;

    let routes = Router::new()
        .merge(embedded_frontend::dashboard_routes())
        .merge(stock_routes::stock_routes())
        .merge(ml_routes::ml_routes())
        .merge(sentiment_routes::sentiment_routes())
        .merge(backtest_routes::backtest_routes())
        .merge(batch_routes::batch_routes())
        .merge(cache_routes::cache_routes());

    with_route_timeout(routes, route_timeout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `RUST_LOG` filter (default `info`); JSON lines when `RUST_LOG_FORMAT=json`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json { builder.json().try_init() } else { builder.try_init() };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env()?;
    let addr = config.bind_addr();
    let state = build_state(config).await?;
    tracing::info!("Providers: {:?}", state.market.provider_names());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("StockPulse listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_error_status_mapping() {
        let status = |e: AnalysisError| AppError::from(e).status();
        assert_eq!(status(AnalysisError::InvalidSymbol("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(AnalysisError::InsufficientData("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(AnalysisError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(AnalysisError::QuotaExhausted("x".into())), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status(AnalysisError::ApiError("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::Timeout(std::time::Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/stock/MISSING").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["data"].is_null());
        assert!(body["error"].as_str().unwrap().contains("MISSING"));
    }

    #[tokio::test]
    async fn test_dashboard_served() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_route_timeout_uses_envelope() {
        let slow = Router::new().route(
            "/slow",
            axum::routing::get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                "late"
            }),
        );
        let app = with_route_timeout(slow, std::time::Duration::from_millis(20));

        let response = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("0.02s"));
    }

    #[tokio::test]
    async fn test_fast_route_passes_timeout() {
        let fast = Router::new().route("/fast", axum::routing::get(|| async { "ok" }));
        let app = with_route_timeout(fast, std::time::Duration::from_secs(1));

        let response = app
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
