//! Common test utilities.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode, Uri},
};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use quickops::lifecycle::{HttpServe, ListenSpec, ListenerHandle};
use quickops::notify::{Level, Notifier};
use serde_json::json;

/// Create a temporary workspace with an empty `.quickops` directory.
pub fn create_temp_workspace() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::create_dir_all(temp.path().join(".quickops")).expect("Failed to create .quickops");
    temp
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("No local addr").port()
}

/// Serve `app` on an ephemeral port.
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    addr
}

/// An upstream that answers every request with a JSON echo of it.
pub async fn spawn_upstream() -> SocketAddr {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap) -> Json<serde_json::Value> {
        Json(json!({
            "upstream": true,
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "host": headers.get("host").and_then(|h| h.to_str().ok()),
        }))
    }
    spawn_app(Router::new().fallback(echo)).await
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response is not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn request(method: &str, url: &str) -> TestResponse {
    send(
        Request::builder()
            .method(method)
            .uri(url)
            .body(Body::empty())
            .expect("invalid request"),
    )
    .await
}

/// Send `body` as a JSON request body.
pub async fn request_json(method: &str, url: &str, body: serde_json::Value) -> TestResponse {
    send(
        Request::builder()
            .method(method)
            .uri(url)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("invalid request"),
    )
    .await
}

async fn send(req: Request<Body>) -> TestResponse {
    let client: Client<_, Body> = Client::builder(TokioExecutor::new()).build_http();
    let res = client.request(req).await.expect("request failed");
    let (parts, body) = res.into_parts();
    let body = axum::body::to_bytes(Body::new(body), usize::MAX)
        .await
        .expect("failed to read body");
    TestResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    }
}

pub async fn get(url: &str) -> TestResponse {
    request("GET", url).await
}

/// Collects notifications for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

/// `HttpServe` that records listen calls and refuses configured ports.
#[derive(Default)]
pub struct FakeServe {
    pub listens: Mutex<Vec<ListenSpec>>,
    pub refuse: Mutex<Vec<u16>>,
}

impl FakeServe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_port(&self, port: u16) {
        self.refuse.lock().unwrap().push(port);
    }

    pub fn listen_count(&self) -> usize {
        self.listens.lock().unwrap().len()
    }

    pub fn listened(&self) -> Vec<ListenSpec> {
        self.listens.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpServe for FakeServe {
    async fn listen(&self, spec: &ListenSpec) -> eyre::Result<ListenerHandle> {
        self.listens.lock().unwrap().push(spec.clone());
        if self.refuse.lock().unwrap().contains(&spec.port) {
            eyre::bail!("Address already in use (os error 98)");
        }
        Ok(ListenerHandle::detached(SocketAddr::from((
            [127, 0, 0, 1],
            spec.port,
        ))))
    }
}
