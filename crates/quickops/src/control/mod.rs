//! Control API for one workspace.
//!
//! A small local HTTP server for editor integrations and scripts: proxy and
//! rule CRUD, listener control, read access to anchors, and a WebSocket
//! that pushes change notifications.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{self, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use futures_util::{SinkExt, StreamExt};
use quickops_core::{AnchorEvent, MockRule, ProxyConfig, Settings};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::context::Workspace;
use crate::daemon::watcher::WatcherState;
use crate::lifecycle::SyncReport;
use crate::notify::{Notification, NotificationHub};

/// Default port of the control API.
pub const DEFAULT_PORT: u16 = 5199;

#[derive(Clone)]
struct AppState {
    workspace: Arc<Workspace>,
    hub: Arc<NotificationHub>,
    /// None when no file watcher runs (tests, one-shot tools).
    watcher: Option<Arc<WatcherState>>,
    start_time: Instant,
}

/// API error response (always JSON).
#[derive(Debug, Clone, Serialize)]
struct ApiError {
    error: String,
    code: String,
}

impl ApiError {
    fn respond(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        (
            status,
            Json(ApiError {
                error: msg.into(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }

    fn bad_request(msg: impl Into<String>) -> Response {
        Self::respond(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    fn not_found(msg: impl Into<String>) -> Response {
        Self::respond(StatusCode::NOT_FOUND, "not_found", msg)
    }

    fn internal(msg: impl Into<String>) -> Response {
        Self::respond(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }
}

/// Router for the control API of `workspace`.
pub fn router(
    workspace: Arc<Workspace>,
    hub: Arc<NotificationHub>,
    watcher: Option<Arc<WatcherState>>,
) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(api_health))
        .route("/api/settings", get(api_settings).put(api_replace_settings))
        .route("/api/proxies", post(api_upsert_proxy))
        .route("/api/proxies/{id}", delete(api_remove_proxy))
        .route("/api/proxies/{id}/toggle", post(api_toggle_proxy))
        .route("/api/rules", post(api_upsert_rule))
        .route("/api/rules/{id}", delete(api_remove_rule))
        .route("/api/rules/{id}/toggle", post(api_toggle_rule))
        .route("/api/servers", get(api_servers))
        .route("/api/servers/start", post(api_servers_start))
        .route("/api/servers/stop", post(api_servers_stop))
        .route("/api/servers/sync", post(api_servers_sync))
        .route("/api/anchors", get(api_anchors))
        .route("/api/groups", get(api_groups))
        .route("/api/notifications", get(api_notifications))
        .with_state(AppState {
            workspace,
            hub,
            watcher,
            start_time: Instant::now(),
        })
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the control API on `127.0.0.1:<port>` until `shutdown` resolves.
pub async fn serve(
    workspace: Arc<Workspace>,
    hub: Arc<NotificationHub>,
    watcher: Option<Arc<WatcherState>>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| eyre::eyre!("Failed to bind control API to {}: {}", addr, e))?;
    info!("Control API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(workspace, hub, watcher))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    uptime_secs: u64,
    running_servers: usize,
    watcher_active: bool,
    watcher_error: Option<String>,
    /// Millis since epoch of the last file change batch.
    watcher_last_event_ms: Option<u64>,
    watcher_event_count: u64,
    watched_directories: Vec<String>,
}

async fn api_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (watcher_active, watcher_error, watcher_last_event_ms, watcher_event_count, watched_directories) =
        match &state.watcher {
            Some(watcher) => (
                watcher.is_active(),
                watcher.error(),
                watcher.last_event_ms(),
                watcher.event_count(),
                watcher
                    .watched_dirs()
                    .into_iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            ),
            None => (false, None, None, 0, Vec::new()),
        };
    Json(HealthResponse {
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_servers: state.workspace.servers.running().await.len(),
        watcher_active,
        watcher_error,
        watcher_last_event_ms,
        watcher_event_count,
        watched_directories,
    })
}

// ============================================================================
// Settings
// ============================================================================

async fn api_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(Settings::clone(&state.workspace.settings.snapshot()))
}

/// Answer a settings mutation. Proxy changes resync the listeners even when
/// saving failed, since the new settings are already live.
async fn after_update<T: Serialize>(
    state: &AppState,
    result: eyre::Result<T>,
    resync: bool,
) -> Response {
    let report = if resync {
        Some(state.workspace.servers.sync_servers().await)
    } else {
        None
    };
    match result {
        Ok(value) => Json(json!({ "result": value, "sync": report })).into_response(),
        Err(e) => ApiError::internal(format!("{e:#}")),
    }
}

async fn api_replace_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Response {
    let result = state.workspace.settings.replace(settings).await;
    after_update(&state, result, true).await
}

async fn api_upsert_proxy(State(state): State<AppState>, Json(proxy): Json<ProxyConfig>) -> Response {
    if proxy.id.trim().is_empty() {
        return ApiError::bad_request("Proxy id must not be empty");
    }
    let result = state.workspace.settings.upsert_proxy(proxy).await;
    after_update(&state, result, true).await
}

async fn api_remove_proxy(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.workspace.settings.remove_proxy(&id).await {
        Ok(false) => ApiError::not_found(format!("Proxy {id} not found")),
        result => after_update(&state, result, true).await,
    }
}

async fn api_toggle_proxy(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(enabled) = state
        .workspace
        .settings
        .snapshot()
        .proxy(&id)
        .map(|p| !p.enabled)
    else {
        return ApiError::not_found(format!("Proxy {id} not found"));
    };
    let result = state
        .workspace
        .settings
        .set_proxy_enabled(&id, enabled)
        .await
        .map(|_| enabled);
    after_update(&state, result, true).await
}

async fn api_upsert_rule(State(state): State<AppState>, Json(rule): Json<MockRule>) -> Response {
    if rule.id.trim().is_empty() {
        return ApiError::bad_request("Rule id must not be empty");
    }
    if rule.url.trim().is_empty() {
        return ApiError::bad_request("Rule url must not be empty");
    }
    let result = state.workspace.settings.upsert_rule(rule).await;
    after_update(&state, result, false).await
}

async fn api_remove_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.workspace.settings.remove_rule(&id).await {
        Ok(false) => ApiError::not_found(format!("Rule {id} not found")),
        result => after_update(&state, result, false).await,
    }
}

async fn api_toggle_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(enabled) = state
        .workspace
        .settings
        .snapshot()
        .mock
        .iter()
        .find(|r| r.id == id)
        .map(|r| !r.enabled)
    else {
        return ApiError::not_found(format!("Rule {id} not found"));
    };
    let result = state
        .workspace
        .settings
        .set_rule_enabled(&id, enabled)
        .await
        .map(|_| enabled);
    after_update(&state, result, false).await
}

// ============================================================================
// Listeners
// ============================================================================

async fn api_servers(State(state): State<AppState>) -> Response {
    let servers = &state.workspace.servers;
    Json(json!({
        "running": servers.running().await,
        "states": servers.states(),
    }))
    .into_response()
}

async fn api_servers_start(State(state): State<AppState>) -> Json<SyncReport> {
    Json(state.workspace.servers.start_all().await)
}

async fn api_servers_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stopped = state.workspace.servers.stop_all().await;
    Json(json!({ "stopped": stopped }))
}

async fn api_servers_sync(State(state): State<AppState>) -> Json<SyncReport> {
    Json(state.workspace.servers.sync_servers().await)
}

// ============================================================================
// Anchors
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnchorsQuery {
    file: Option<String>,
}

async fn api_anchors(State(state): State<AppState>, Query(query): Query<AnchorsQuery>) -> Response {
    Json(state.workspace.anchors.anchors(query.file.as_deref())).into_response()
}

async fn api_groups(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.workspace.anchors.groups())
}

async fn api_notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.hub.recent())
}

// ============================================================================
// WebSocket for live updates
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsMessage {
    Anchors { event: &'static str },
    Settings { settings: Settings },
    Notify(Notification),
}

impl WsMessage {
    fn anchors(event: &AnchorEvent) -> Self {
        let event = match event {
            AnchorEvent::AnchorsChanged => "anchorsChanged",
            AnchorEvent::GroupsChanged => "groupsChanged",
        };
        WsMessage::Anchors { event }
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws_client(socket, state))
}

async fn handle_ws_client(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();

    let mut anchors_rx = state.workspace.anchors.subscribe();
    let mut settings_rx = state.workspace.settings.subscribe();
    settings_rx.mark_unchanged();
    let mut notify_rx = state.hub.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                event = anchors_rx.recv() => match event {
                    Ok(event) => WsMessage::anchors(&event),
                    // Missed some; any one event makes the client refetch.
                    Err(RecvError::Lagged(_)) => WsMessage::anchors(&AnchorEvent::AnchorsChanged),
                    Err(RecvError::Closed) => break,
                },
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let settings = Settings::clone(&settings_rx.borrow_and_update());
                    WsMessage::Settings { settings }
                }
                notification = notify_rx.recv() => match notification {
                    Ok(n) => WsMessage::Notify(n),
                    Err(RecvError::Lagged(n)) => {
                        warn!("WebSocket client missed {} notifications", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode WebSocket message: {}", e);
                    continue;
                }
            };
            if tx.send(ws::Message::Text(json.into())).await.is_err() {
                break; // Client disconnected
            }
        }
    });

    // Drain incoming messages, we don't expect any
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(ws::Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    debug!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Level;

    #[test]
    fn test_ws_message_shape() {
        let msg = WsMessage::anchors(&AnchorEvent::GroupsChanged);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "anchors", "event": "groupsChanged" })
        );

        let msg = WsMessage::Notify(Notification {
            level: Level::Error,
            message: "port 8080 in use".to_string(),
            timestamp: 1,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notify");
        assert_eq!(value["level"], "error");
    }
}
