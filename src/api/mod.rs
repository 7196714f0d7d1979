//! HTTP read/write access to the price document.

mod prices;

use crate::storage::DocumentError;
use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub prices_path: Arc<PathBuf>,
}

impl ApiState {
    pub fn new(prices_path: impl Into<PathBuf>) -> Self {
        Self {
            prices_path: Arc::new(prices_path.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("price file not found")]
    Missing,

    #[error("failed to read price file: {0}")]
    Unreadable(String),

    #[error("price file is not a mapping of products")]
    NotAMapping,

    /// The document itself carries a top-level error marker
    #[error("{0}")]
    Marked(String),

    #[error("product not found")]
    ProductNotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("failed to save prices: {0}")]
    WriteFailed(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Missing | Self::ProductNotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unreadable(_) | Self::NotAMapping | Self::Marked(_) | Self::WriteFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Missing(_) => Self::Missing,
            other => Self::Unreadable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the router with CORS open to every origin
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(prices::index))
        .route(
            "/prices",
            get(prices::all_prices)
                .post(prices::replace_prices)
                .put(prices::replace_prices),
        )
        .route("/prices/products", get(prices::product_names))
        .route("/prices/produtos", get(prices::product_names_legacy))
        .route("/prices/:product", get(prices::product_prices))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the price document until the process is stopped
pub async fn serve(addr: SocketAddr, prices_path: PathBuf) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "🌐 Serving {} on http://{}",
        prices_path.display(),
        listener.local_addr().unwrap_or(addr)
    );

    axum::serve(listener, router(ApiState::new(prices_path)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")
}
