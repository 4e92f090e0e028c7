//! Reverse proxying to an upstream HTTP server.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error, warn};

/// How long an upstream may take to produce response headers.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Forward: Send + Sync {
    /// Send `req` to `target` (scheme, host and optional base path) and
    /// return the upstream response or a gateway error.
    async fn forward(&self, req: Request<Body>, target: &str) -> Response;
}

/// hyper-util pooled client. Plain `http://` upstreams only.
#[derive(Clone)]
pub struct HyperForwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Default for HyperForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperForwarder {
    pub fn new() -> Self {
        Self::with_timeout(UPSTREAM_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }
}

/// `target` joined with the request's path and query.
pub fn upstream_uri(target: &str, req: &Request<Body>) -> String {
    let path = req.uri().path();
    let query = req
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    format!("{}{}{}", target.trim_end_matches('/'), path, query)
}

#[async_trait]
impl Forward for HyperForwarder {
    async fn forward(&self, req: Request<Body>, target: &str) -> Response {
        if target.to_ascii_lowercase().starts_with("https://") {
            warn!(target = %target, "!! https upstreams are not supported");
            return (
                StatusCode::BAD_GATEWAY,
                format!("Proxy error: https upstream {target} is not supported"),
            )
                .into_response();
        }

        let target_uri = upstream_uri(target, &req);
        debug!(method = %req.method(), target = %target_uri, "-> proxy");

        let mut proxy_req_builder = Request::builder().method(req.method()).uri(&target_uri);

        // Copy headers (except Host)
        for (name, value) in req.headers() {
            if name != header::HOST {
                proxy_req_builder = proxy_req_builder.header(name, value);
            }
        }

        let proxy_req = match proxy_req_builder.body(req.into_body()) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, target = %target_uri, "!! invalid upstream request");
                return (StatusCode::BAD_GATEWAY, format!("Proxy error: {}", e)).into_response();
            }
        };

        match tokio::time::timeout(self.timeout, self.client.request(proxy_req)).await {
            Ok(Ok(res)) => {
                debug!(status = %res.status(), target = %target_uri, "<- upstream response");
                let (parts, body) = res.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Ok(Err(e)) => {
                error!(error = %e, target = %target_uri, "!! upstream error");
                (StatusCode::BAD_GATEWAY, format!("Proxy error: {}", e)).into_response()
            }
            Err(_) => {
                error!(target = %target_uri, timeout = ?self.timeout, "!! upstream timeout");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    format!("Upstream {} did not answer within {:?}", target, self.timeout),
                )
                    .into_response()
            }
        }
    }
}
