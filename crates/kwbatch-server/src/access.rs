use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Request log: method, path, status, client IP and latency on `kwbatch::access`.
///
/// The client IP is only known when the server was started with connect info.
pub async fn access_log(request: Request<axum::body::Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    if status >= 500 {
        tracing::warn!(
            target: "kwbatch::access",
            %method, %path, status, %client_ip, latency_ms,
            "Request completed"
        );
    } else {
        tracing::info!(
            target: "kwbatch::access",
            %method, %path, status, %client_ip, latency_ms,
            "Request completed"
        );
    }

    response
}
