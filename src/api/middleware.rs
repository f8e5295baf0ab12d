use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, warn};

/// Log every 4xx at warn and every 5xx at error. Query strings are left out
/// since they may carry access tokens.
pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_client_error() {
        warn!(%method, path, %status, elapsed_ms, "Client error");
    } else if status.is_server_error() {
        error!(%method, path, %status, elapsed_ms, "Server error");
    }

    response
}
