//! Sentiment Routes
//!
//! Free-text scoring and per-symbol news sentiment.

use analysis_core::{AnalysisError, AnalysisResult};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sentiment_analysis::{
    aggregate_headlines, ScoredHeadline, SentimentAggregate, SentimentModelKind, SentimentScore,
};
use serde::{Deserialize, Serialize};

use crate::{ApiJson, ApiResponse, AppError, AppState};

const MAX_TEXTS: usize = 100;
const MAX_NEWS: usize = 50;

#[derive(Deserialize)]
pub struct ScoreTextsRequest {
    pub texts: Vec<String>,
}

#[derive(Serialize)]
pub struct ScoreTextsResponse {
    pub model: SentimentModelKind,
    pub results: Vec<TextSentiment>,
    pub aggregate: SentimentAggregate,
}

#[derive(Serialize)]
pub struct TextSentiment {
    pub text: String,
    pub sentiment: SentimentScore,
}

#[derive(Deserialize)]
pub struct NewsQuery {
    /// Number of headlines to score (default: 20)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Serialize)]
pub struct SymbolSentimentResponse {
    pub symbol: String,
    pub model: SentimentModelKind,
    pub source: String,
    pub cached: bool,
    pub aggregate: SentimentAggregate,
    pub analysis: AnalysisResult,
    pub headlines: Vec<ScoredHeadline>,
}

pub fn sentiment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sentiment", post(score_texts))
        .route("/api/sentiment/:symbol", get(symbol_sentiment))
}

/// POST /api/sentiment
async fn score_texts(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ScoreTextsRequest>,
) -> Result<Json<ApiResponse<ScoreTextsResponse>>, AppError> {
    let texts: Vec<String> = req
        .texts
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if texts.is_empty() {
        return Err(AnalysisError::InvalidData("texts must contain at least one non-empty string".into()).into());
    }
    if texts.len() > MAX_TEXTS {
        return Err(AnalysisError::InvalidData(format!("at most {} texts per request", MAX_TEXTS)).into());
    }

    let scored = state.sentiment.service().score_texts(&texts).await;

    // free text has no publication time, so every entry weighs the same
    let now = Utc::now();
    let as_headlines: Vec<ScoredHeadline> = texts
        .iter()
        .zip(&scored.scores)
        .map(|(text, sentiment)| ScoredHeadline {
            title: text.clone(),
            publisher: None,
            url: None,
            published_utc: now,
            sentiment: sentiment.clone(),
        })
        .collect();
    let aggregate = aggregate_headlines(&as_headlines, now);

    let results = texts
        .into_iter()
        .zip(scored.scores)
        .map(|(text, sentiment)| TextSentiment { text, sentiment })
        .collect();

    Ok(Json(ApiResponse::success(ScoreTextsResponse {
        model: scored.model,
        results,
        aggregate,
    })))
}

/// GET /api/sentiment/:symbol
async fn symbol_sentiment(
    State(state): State<AppState>,
    Path(raw_symbol): Path<String>,
    Query(query): Query<NewsQuery>,
) -> Result<Json<ApiResponse<SymbolSentimentResponse>>, AppError> {
    let symbol = state.parse_symbol(&raw_symbol)?;
    let limit = query.limit.clamp(1, MAX_NEWS);

    let news = state.market.get_news(symbol.as_str(), limit).await?;
    let sentiment = state.sentiment.score_news(&news.data).await;
    let analysis = state.sentiment.to_analysis(symbol.as_str(), &sentiment);

    tracing::debug!(
        "{}: {} headlines scored via {}",
        symbol,
        sentiment.headlines.len(),
        sentiment.model.as_str()
    );

    Ok(Json(ApiResponse::success(SymbolSentimentResponse {
        symbol: symbol.to_string(),
        model: sentiment.model,
        source: news.source,
        cached: news.cached,
        aggregate: sentiment.aggregate,
        analysis,
        headlines: sentiment.headlines,
    })))
}

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::test_support::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    async fn post_texts(payload: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/sentiment")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }

    #[tokio::test]
    async fn test_score_texts() {
        let (status, body) = post_texts(json!({
            "texts": [
                "Company beats earnings expectations, shares surge on record profit",
                "Regulator launches fraud investigation, stock plunges",
            ]
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["model"], "lexicon");
        let results = data["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0]["sentiment"]["score"].as_f64().unwrap() > 0.0);
        assert!(results[1]["sentiment"]["score"].as_f64().unwrap() < 0.0);
        assert_eq!(data["aggregate"]["article_count"], 2);
    }

    #[tokio::test]
    async fn test_empty_texts_rejected() {
        let (status, body) = post_texts(json!({ "texts": ["   "] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_symbol_sentiment_without_news_provider() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/sentiment/AAPL").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
