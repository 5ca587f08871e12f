use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::Embed;

use crate::AppState;

/// Single-page dashboard compiled into the binary
#[derive(Embed)]
#[folder = "dashboard/"]
#[exclude = "*.map"]
pub struct DashboardAssets;

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/static/*path", get(static_asset))
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn serve(path: &str) -> Response {
    match DashboardAssets::get(path) {
        Some(file) => ([(header::CONTENT_TYPE, content_type(path))], file.data.into_owned()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{} not found", path),
        )
            .into_response(),
    }
}

async fn index() -> Response {
    serve("index.html")
}

async fn static_asset(Path(path): Path<String>) -> Response {
    serve(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_embedded() {
        let index = DashboardAssets::get("index.html").unwrap();
        let html = String::from_utf8_lossy(&index.data);
        assert!(html.contains("/api/stock/"));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("app.JS"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("style.css"), "text/css; charset=utf-8");
        assert_eq!(content_type("LICENSE"), "application/octet-stream");
    }
}
