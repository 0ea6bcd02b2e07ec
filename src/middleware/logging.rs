//! Request logging for the Compliance API.
//!
//! Every request gets a span tagged with the API resource it hit (the
//! first path segment — `oracle`, `classify-jurisdiction`, ...) rather
//! than the raw path, so `/oracle/pending/<id>/approve` calls for
//! different ids aggregate under one tracing target instead of
//! fragmenting one span per id.

use axum::{body::Body, extract::ConnectInfo, http::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Span};

fn resource_group(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("root")
}

/// Logs at INFO for 2xx/4xx, WARN for 5xx. Skips `/health` to keep
/// liveness-probe traffic out of the log stream.
pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let resource = resource_group(&path).to_string();
    let start = Instant::now();

    let span = tracing::info_span!(
        "compliance_api_request",
        method = %method,
        resource = %resource,
        path = %path,
        client_ip = %addr.ip(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );
    let _guard = span.enter();

    let response = next.run(request).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    Span::current().record("status", status);
    Span::current().record("latency_ms", latency_ms);

    if status >= 500 {
        warn!(
            method = %method,
            resource = %resource,
            status,
            latency_ms,
            client_ip = %addr.ip(),
            "compliance API request failed"
        );
    } else {
        info!(
            method = %method,
            resource = %resource,
            status,
            latency_ms,
            client_ip = %addr.ip(),
            "compliance API request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::resource_group;

    #[test]
    fn groups_oracle_subpaths_together() {
        assert_eq!(resource_group("/oracle/pending/chg_abc123/approve"), "oracle");
        assert_eq!(resource_group("/oracle/history/US"), "oracle");
    }

    #[test]
    fn top_level_endpoints_are_their_own_group() {
        assert_eq!(resource_group("/classify-jurisdiction"), "classify-jurisdiction");
        assert_eq!(resource_group("/resolve-conflicts"), "resolve-conflicts");
    }

    #[test]
    fn root_path_falls_back_to_root() {
        assert_eq!(resource_group("/"), "root");
    }
}
