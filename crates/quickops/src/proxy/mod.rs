//! Per-listener request handling: mock when a rule matches, proxy otherwise.
//!
//! Every listener gets its own axum router with a single fallback handler.
//! For each request the handler:
//!
//! 1. takes the path, ignoring the query string;
//! 2. snapshots the current settings;
//! 3. looks for the first enabled rule of this listener matching method and
//!    path;
//! 4. serves the rule's data, template, JSON file or local file;
//! 5. otherwise forwards to the rule's own target, or to the listener's.

pub mod forward;
pub mod respond;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
};
use quickops_core::{
    MockGenerator, MockRule, ResponseSource, Settings, find_rule, inline_json, normalize_target,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

pub use forward::{Forward, HyperForwarder};

/// Everything one listener needs to answer requests.
pub struct ProxyContext {
    pub proxy_id: String,
    /// Normalized default upstream.
    pub target: Option<String>,
    pub root: PathBuf,
    pub settings: watch::Receiver<Arc<Settings>>,
    pub generator: Arc<dyn MockGenerator>,
    pub forwarder: Arc<dyn Forward>,
}

/// Router for one listener, CORS-enabled for browser clients.
pub fn router(ctx: ProxyContext) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(Arc::new(ctx))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn handle_request(State(ctx): State<Arc<ProxyContext>>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();
    let settings = Arc::clone(&ctx.settings.borrow());

    let Some(rule) = find_rule(&settings.mock, &ctx.proxy_id, &method, &path) else {
        debug!(proxy = %ctx.proxy_id, %method, %path, "-> no rule");
        return forward_default(&ctx, req).await;
    };

    debug!(proxy = %ctx.proxy_id, rule = %rule.id, %method, %path, "=> mock");
    match rule.response_source() {
        ResponseSource::Static(value) => respond::mocked(rule, &value),
        ResponseSource::Template(template) => match inline_json(&template) {
            Ok(template) => respond::mocked(rule, &ctx.generator.generate(&template)),
            Err(e) => {
                warn!(rule = %rule.id, error = %e, "!! rule template is not valid JSON");
                respond::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Mock template for {} is not valid JSON: {}", rule.id, e),
                )
            }
        },
        ResponseSource::JsonFile { path, generate } => {
            serve_json_file(&ctx, &settings, rule, &path, generate, req).await
        }
        ResponseSource::LocalFile { path, disposition } => {
            let full = respond::resolve_path(&ctx.root, settings.mock_dir.as_deref(), &path);
            match read_file(&full).await {
                Ok(bytes) => respond::file(rule, &full, bytes, disposition),
                Err(FileError::NotFound) => {
                    warn!(rule = %rule.id, path = %full.display(), "!! mock file not found");
                    respond::error(
                        StatusCode::NOT_FOUND,
                        format!("File not found: {}", full.display()),
                    )
                }
                Err(e) => respond::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        ResponseSource::Forward { target } => forward_rule(&ctx, rule, Some(&target), req).await,
        ResponseSource::None => forward_default(&ctx, req).await,
    }
}

async fn serve_json_file(
    ctx: &ProxyContext,
    settings: &Settings,
    rule: &MockRule,
    path: &str,
    generate: bool,
    req: Request<Body>,
) -> Response {
    let full = respond::resolve_path(&ctx.root, settings.mock_dir.as_deref(), path);
    let bytes = match read_file(&full).await {
        Ok(bytes) => bytes,
        Err(FileError::NotFound) => {
            warn!(
                rule = %rule.id,
                path = %full.display(),
                "!! mock data file missing, proxying instead"
            );
            return forward_rule(ctx, rule, rule.target.as_deref(), req).await;
        }
        Err(e) => return respond::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!(rule = %rule.id, path = %full.display(), error = %e, "!! malformed mock data");
            return respond::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Malformed JSON in {}: {}", full.display(), e),
            );
        }
    };
    if generate {
        respond::mocked(rule, &ctx.generator.generate(&value))
    } else {
        respond::mocked(rule, &value)
    }
}

/// Forward to the rule's target when it has a usable one, else to the
/// listener's default.
async fn forward_rule(
    ctx: &ProxyContext,
    rule: &MockRule,
    target: Option<&str>,
    req: Request<Body>,
) -> Response {
    match target.and_then(normalize_target) {
        Some(target) => {
            debug!(rule = %rule.id, target = %target, "-> rule target");
            ctx.forwarder.forward(req, &target).await
        }
        None => forward_default(ctx, req).await,
    }
}

async fn forward_default(ctx: &ProxyContext, req: Request<Body>) -> Response {
    match &ctx.target {
        Some(target) => ctx.forwarder.forward(req, target).await,
        None => respond::error(
            StatusCode::BAD_GATEWAY,
            format!("Proxy {} has no upstream target", ctx.proxy_id),
        ),
    }
}

/// How a request would be answered, for dry runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Route<'a> {
    Mock {
        rule: &'a MockRule,
        source: ResponseSource,
    },
    Forward {
        /// The matching rule that had nothing to serve, if any.
        rule: Option<&'a MockRule>,
        target: Option<String>,
    },
}

/// Path part of `url`, which may be a bare path or an absolute URL.
pub fn request_path(url: &str) -> &str {
    let url = url.trim();
    match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            rest.find('/').map(|j| &rest[j..]).unwrap_or("/")
        }
        None => url,
    }
}

/// Decide how proxy `proxy_id` would answer `method url`.
pub fn route<'a>(settings: &'a Settings, proxy_id: &str, method: &str, url: &str) -> Route<'a> {
    let default_target = settings
        .proxy(proxy_id)
        .and_then(|p| normalize_target(&p.target));
    let Some(rule) = find_rule(&settings.mock, proxy_id, method, request_path(url)) else {
        return Route::Forward {
            rule: None,
            target: default_target,
        };
    };
    match rule.response_source() {
        ResponseSource::Forward { target } => Route::Forward {
            rule: Some(rule),
            target: normalize_target(&target).or(default_target),
        },
        ResponseSource::None => Route::Forward {
            rule: Some(rule),
            target: default_target,
        },
        source => Route::Mock { rule, source },
    }
}

#[derive(Debug)]
enum FileError {
    NotFound,
    Io(std::io::Error),
    Timeout,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileError::NotFound => write!(f, "file not found"),
            FileError::Io(e) => write!(f, "failed to read mock file: {}", e),
            FileError::Timeout => write!(
                f,
                "reading mock file took longer than {:?}",
                respond::FILE_READ_TIMEOUT
            ),
        }
    }
}

async fn read_file(path: &std::path::Path) -> Result<Vec<u8>, FileError> {
    match tokio::time::timeout(respond::FILE_READ_TIMEOUT, tokio::fs::read(path)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(FileError::NotFound),
        Ok(Err(e)) => Err(FileError::Io(e)),
        Err(_) => Err(FileError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickops_core::ProxyConfig;
    use serde_json::json;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.proxy.push(ProxyConfig {
            id: "p1".to_string(),
            port: 8080,
            target: "localhost:3000".to_string(),
            enabled: true,
        });
        let mut users = MockRule::new("users", "p1", "GET", "/api/users");
        users.data = Some(json!([{ "id": 1 }]));
        users.mode = quickops_core::MockMode::Custom;
        settings.mock.push(users);
        let mut orders = MockRule::new("orders", "p1", "GET", "/api/orders");
        orders.target = Some("127.0.0.1:4000/".to_string());
        settings.mock.push(orders);
        settings
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path("/api/users?x=1"), "/api/users?x=1");
        assert_eq!(request_path("http://localhost:8080/api/users"), "/api/users");
        assert_eq!(request_path("http://localhost:8080"), "/");
    }

    #[test]
    fn test_route_mock_and_forward() {
        let settings = settings();
        match route(&settings, "p1", "get", "http://localhost:8080/api/users?page=2") {
            Route::Mock { rule, source } => {
                assert_eq!(rule.id, "users");
                assert_eq!(source, ResponseSource::Static(json!([{ "id": 1 }])));
            }
            other => panic!("expected mock, got {other:?}"),
        }

        assert_eq!(
            route(&settings, "p1", "GET", "/api/orders"),
            Route::Forward {
                rule: Some(&settings.mock[1]),
                target: Some("http://127.0.0.1:4000".to_string()),
            }
        );
        assert_eq!(
            route(&settings, "p1", "POST", "/api/users"),
            Route::Forward {
                rule: None,
                target: Some("http://localhost:3000".to_string()),
            }
        );
    }
}
