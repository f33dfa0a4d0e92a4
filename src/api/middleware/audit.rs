//! Access logging middleware.
//!
//! Logs every API request with the account id (when authenticated),
//! method, path, status and latency.

use std::time::Instant;

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::AccountContext;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let account_id = req
        .extensions()
        .get::<AccountContext>()
        .map(|c| c.account.id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        tracing::warn!(%account_id, %method, %path, status, latency_ms, "API request failed");
    } else {
        tracing::info!(%account_id, %method, %path, status, latency_ms, "API request");
    }
    response
}
