//! Integration tests for proxy listener lifecycle.
//!
//! These tests verify:
//! - `sync_servers` is idempotent and follows config edits
//! - Port conflicts and bind failures are reported, not retried
//! - `start_all` enables the first proxy when none is enabled
//! - Real axum listeners start, answer and stop

mod common;

use std::sync::Arc;

use common::{FakeServe, RecordingNotifier, get, spawn_upstream};
use quickops::config::SettingsStore;
use quickops::lifecycle::{AxumServe, ServerManager, ServerState};
use quickops::notify::Level;
use quickops::persist::MemoryPersistence;
use quickops::proxy::HyperForwarder;
use quickops_core::{ProxyConfig, Settings, TemplateGenerator};

fn proxy(id: &str, port: u16, enabled: bool) -> ProxyConfig {
    ProxyConfig {
        id: id.to_string(),
        port,
        target: "localhost:3000".to_string(),
        enabled,
    }
}

struct Harness {
    mem: Arc<MemoryPersistence>,
    settings: Arc<SettingsStore>,
    serve: Arc<FakeServe>,
    notifier: Arc<RecordingNotifier>,
    manager: ServerManager,
}

fn harness(proxies: Vec<ProxyConfig>) -> Harness {
    let mem = Arc::new(MemoryPersistence::new());
    let settings = Arc::new(SettingsStore::new(
        "/ws/.quickops/settings.json".into(),
        Settings {
            proxy: proxies,
            ..Settings::default()
        },
        mem.clone(),
    ));
    let serve = FakeServe::new();
    let notifier = RecordingNotifier::new();
    let manager = ServerManager::new(settings.clone(), serve.clone(), notifier.clone());
    Harness {
        mem,
        settings,
        serve,
        notifier,
        manager,
    }
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let h = harness(vec![proxy("a", 8001, true), proxy("b", 8002, false)]);

    let report = h.manager.sync_servers().await;
    assert_eq!(report.started, vec!["a"]);
    assert!(report.stopped.is_empty());

    let report = h.manager.sync_servers().await;
    assert!(report.is_empty());
    assert_eq!(h.serve.listen_count(), 1);
    assert_eq!(h.manager.state("a"), ServerState::Running { port: 8001 });
    assert_eq!(h.manager.state("b"), ServerState::Disabled);
}

#[tokio::test]
async fn test_sync_follows_enable_disable_and_edits() {
    let h = harness(vec![proxy("a", 8001, true)]);
    h.manager.sync_servers().await;

    h.settings.set_proxy_enabled("a", false).await.unwrap();
    let report = h.manager.sync_servers().await;
    assert_eq!(report.stopped, vec!["a"]);
    assert!(h.manager.running().await.is_empty());

    h.settings.set_proxy_enabled("a", true).await.unwrap();
    assert_eq!(h.manager.sync_servers().await.started, vec!["a"]);

    // Port change restarts the listener.
    h.settings.upsert_proxy(proxy("a", 9001, true)).await.unwrap();
    let report = h.manager.sync_servers().await;
    assert_eq!(report.stopped, vec!["a"]);
    assert_eq!(report.started, vec!["a"]);
    assert_eq!(h.manager.running().await[0].port, 9001);

    h.settings.remove_proxy("a").await.unwrap();
    assert_eq!(h.manager.sync_servers().await.stopped, vec!["a"]);
}

#[tokio::test]
async fn test_target_is_normalized_and_incomplete_configs_reported() {
    let mut empty = proxy("empty", 8003, true);
    empty.target = "  ".to_string();
    let h = harness(vec![proxy("a", 8001, true), empty, proxy("noport", 0, true)]);

    let report = h.manager.sync_servers().await;
    assert_eq!(report.started, vec!["a"]);
    assert_eq!(h.serve.listened()[0].target, "http://localhost:3000");
    assert_eq!(h.manager.state("empty"), ServerState::Disabled);

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|(level, _)| *level == Level::Warn));
    assert!(messages[0].1.contains("empty") && messages[0].1.contains("no target"));
    assert!(messages[1].1.contains("noport") && messages[1].1.contains("no port"));

    // Reported once, not on every sync.
    h.manager.sync_servers().await;
    assert_eq!(h.notifier.messages().len(), 2);

    // Fixed and broken again: reported again.
    h.settings.upsert_proxy(proxy("empty", 8003, true)).await.unwrap();
    assert_eq!(h.manager.sync_servers().await.started, vec!["empty"]);
    let mut broken = proxy("empty", 8003, true);
    broken.target = String::new();
    h.settings.upsert_proxy(broken).await.unwrap();
    h.manager.sync_servers().await;
    assert_eq!(h.notifier.messages().len(), 3);
}

#[tokio::test]
async fn test_duplicate_port_first_config_wins() {
    let h = harness(vec![proxy("first", 8001, true), proxy("second", 8001, true)]);

    let report = h.manager.sync_servers().await;
    assert_eq!(report.started, vec!["first"]);
    assert_eq!(report.failed, vec!["second"]);
    assert_eq!(h.serve.listen_count(), 1);

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, Level::Error);
    assert!(messages[0].1.contains("8001"));
    assert!(matches!(
        h.manager.state("second"),
        ServerState::Failed { port: 8001, .. }
    ));
}

#[tokio::test]
async fn test_bind_failure_is_not_retried_until_config_changes() {
    let h = harness(vec![proxy("a", 8001, true)]);
    h.serve.refuse_port(8001);

    let report = h.manager.sync_servers().await;
    assert_eq!(report.failed, vec!["a"]);
    assert!(h.notifier.messages()[0].1.contains("8001"));

    // No retry, no alternate port.
    assert!(h.manager.sync_servers().await.is_empty());
    assert_eq!(h.serve.listen_count(), 1);

    h.settings.upsert_proxy(proxy("a", 8002, true)).await.unwrap();
    assert_eq!(h.manager.sync_servers().await.started, vec!["a"]);
    assert_eq!(h.serve.listened()[1].port, 8002);
}

#[tokio::test]
async fn test_start_all_enables_first_proxy() {
    let h = harness(vec![proxy("a", 8001, false), proxy("b", 8002, false)]);

    let report = h.manager.start_all().await;
    assert_eq!(report.started, vec!["a"]);
    assert!(h.settings.snapshot().proxy[0].enabled);
    assert!(!h.settings.snapshot().proxy[1].enabled);
    assert_eq!(h.mem.write_count(), 1);

    // Already enabled: nothing to persist.
    h.manager.start_all().await;
    assert_eq!(h.mem.write_count(), 1);
}

#[tokio::test]
async fn test_start_all_retries_failures() {
    let h = harness(vec![proxy("a", 8001, true)]);
    h.serve.refuse_port(8001);
    h.manager.sync_servers().await;

    let report = h.manager.start_all().await;
    assert_eq!(report.failed, vec!["a"]);
    assert_eq!(h.serve.listen_count(), 2);
}

#[tokio::test]
async fn test_stop_all_closes_everything() {
    let h = harness(vec![proxy("a", 8001, true), proxy("b", 8002, true)]);
    h.manager.start_all().await;
    assert_eq!(h.manager.running().await.len(), 2);

    let mut stopped = h.manager.stop_all().await;
    stopped.sort();
    assert_eq!(stopped, vec!["a", "b"]);
    assert!(h.manager.running().await.is_empty());
    assert_eq!(h.manager.state("a"), ServerState::Disabled);
}

#[tokio::test]
async fn test_axum_listener_serves_and_stops() {
    let temp = common::create_temp_workspace();
    let upstream = spawn_upstream().await;
    let port = common::free_port();

    let settings = Arc::new(SettingsStore::new(
        quickops::settings_path(temp.path()),
        Settings {
            proxy: vec![ProxyConfig {
                id: "web".to_string(),
                port,
                // No scheme: repaired to http://
                target: upstream.to_string(),
                enabled: true,
            }],
            ..Settings::default()
        },
        Arc::new(MemoryPersistence::new()),
    ));
    let serve = Arc::new(AxumServe::new(
        temp.path().to_path_buf(),
        settings.subscribe(),
        Arc::new(TemplateGenerator::new()),
        Arc::new(HyperForwarder::new()),
    ));
    let manager = ServerManager::new(settings.clone(), serve, RecordingNotifier::new());

    let report = manager.sync_servers().await;
    assert_eq!(report.started, vec!["web"]);
    let running = manager.running().await;
    assert_eq!(running[0].addr.port(), port);

    let res = get(&format!("http://127.0.0.1:{port}/health?x=1")).await;
    assert_eq!(res.json()["path"], "/health");

    manager.stop_all().await;
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_axum_listener_port_in_use_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let settings = Arc::new(SettingsStore::new(
        "/ws/.quickops/settings.json".into(),
        Settings {
            proxy: vec![proxy("a", port, true)],
            ..Settings::default()
        },
        Arc::new(MemoryPersistence::new()),
    ));
    let serve = Arc::new(AxumServe::new(
        "/ws".into(),
        settings.subscribe(),
        Arc::new(TemplateGenerator::new()),
        Arc::new(HyperForwarder::new()),
    ));
    let notifier = RecordingNotifier::new();
    let manager = ServerManager::new(settings, serve, notifier.clone());

    let report = manager.sync_servers().await;
    assert_eq!(report.failed, vec!["a"]);
    assert!(notifier.messages()[0].1.contains(&port.to_string()));
    drop(taken);
}
