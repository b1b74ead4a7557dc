//! REST control surface sharing the multiplexed listener.
//!
//! `/actions` is a placeholder trigger endpoint for future orchestration
//! commands; it accepts any payload and replies 200. Unmatched paths fall
//! through to axum's 404 so unclassifiable traffic always gets a response.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

/// Build the REST router.
pub fn router() -> Router {
    Router::new()
        .route("/actions", post(post_action))
        .route("/healthz", get(healthz))
}

async fn post_action() -> StatusCode {
    info!("action trigger accepted");
    StatusCode::OK
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
