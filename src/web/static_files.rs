use axum::{
    body::Body,
    extract::State,
    http::{header, Response, StatusCode},
};
use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Serve the viewer page for `/`
pub async fn index_handler(State(state): State<Arc<AppState>>) -> Result<Response<Body>> {
    serve_file(&state.config.web.client_html).await
}

async fn serve_file(path: &Path) -> Result<Response<Body>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Viewer page not found: {}", path.display());
            return Err(AppError::NotFound(format!("{} not found", path.display())));
        }
        Err(e) => return Err(e.into()),
    };

    let mime = mime_guess::from_path(path)
        .first_or(mime_guess::mime::TEXT_HTML_UTF_8)
        .to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(data))
        .map_err(|e| AppError::Io(std::io::Error::other(e)))
}
