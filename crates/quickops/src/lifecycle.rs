//! Proxy listener lifecycle.
//!
//! [`ServerManager`] reconciles the set of live listeners with the proxy
//! configuration. `sync_servers` is a declarative diff and is safe to call
//! any number of times: live listeners that no longer match an enabled
//! config are closed, enabled configs without a listener are started.
//!
//! A listener that fails to start is remembered as failed and is not
//! retried by later syncs until its config changes or `start_all` is
//! called. There is no alternate-port fallback.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use quickops_core::{MockGenerator, Settings, normalize_target};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SettingsStore;
use crate::notify::{Level, Notifier};
use crate::proxy::{self, Forward, ProxyContext};

/// What a listener should look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSpec {
    pub proxy_id: String,
    pub port: u16,
    /// Normalized upstream.
    pub target: String,
}

/// Starts HTTP listeners.
#[async_trait]
pub trait HttpServe: Send + Sync {
    async fn listen(&self, spec: &ListenSpec) -> Result<ListenerHandle>;
}

/// A running listener. Dropping the handle also stops it.
#[derive(Debug)]
pub struct ListenerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Grace period for in-flight requests when a listener closes.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

impl ListenerHandle {
    pub fn new(addr: SocketAddr, shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            addr,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// A handle with nothing behind it, for serve implementations that do
    /// not own a task.
    pub fn detached(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown: None,
            task: None,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!(addr = %self.addr, "Listener did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Real listeners: axum on `127.0.0.1:<port>` serving [`proxy::router`].
pub struct AxumServe {
    root: PathBuf,
    settings: watch::Receiver<Arc<Settings>>,
    generator: Arc<dyn MockGenerator>,
    forwarder: Arc<dyn Forward>,
}

impl AxumServe {
    pub fn new(
        root: PathBuf,
        settings: watch::Receiver<Arc<Settings>>,
        generator: Arc<dyn MockGenerator>,
        forwarder: Arc<dyn Forward>,
    ) -> Self {
        Self {
            root,
            settings,
            generator,
            forwarder,
        }
    }
}

#[async_trait]
impl HttpServe for AxumServe {
    async fn listen(&self, spec: &ListenSpec) -> Result<ListenerHandle> {
        let addr = format!("127.0.0.1:{}", spec.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .wrap_err_with(|| format!("Failed to bind {addr}"))?;
        let local = listener.local_addr()?;

        let app = proxy::router(ProxyContext {
            proxy_id: spec.proxy_id.clone(),
            target: Some(spec.target.clone()),
            root: self.root.clone(),
            settings: self.settings.clone(),
            generator: Arc::clone(&self.generator),
            forwarder: Arc::clone(&self.forwarder),
        });

        let (tx, rx) = oneshot::channel::<()>();
        let proxy_id = spec.proxy_id.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.await;
            });
            if let Err(e) = server.await {
                error!(proxy = %proxy_id, error = %e, "Listener stopped with error");
            }
        });

        Ok(ListenerHandle::new(local, tx, task))
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Observable state of one proxy config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ServerState {
    Disabled,
    Starting { port: u16 },
    Running { port: u16 },
    Failed { port: u16, error: String },
}

/// Outcome of one `sync_servers` pass, as proxy ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

/// A live listener, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningServer {
    pub id: String,
    pub port: u16,
    pub target: String,
    pub addr: SocketAddr,
}

struct Live {
    spec: ListenSpec,
    handle: ListenerHandle,
}

#[derive(Default)]
struct Listeners {
    live: BTreeMap<String, Live>,
    /// Specs that failed to start, not retried until they change.
    failed: HashMap<String, ListenSpec>,
    /// Enabled configs without a port or target, already reported.
    unstartable: HashSet<String>,
}

pub struct ServerManager {
    settings: Arc<SettingsStore>,
    serve: Arc<dyn HttpServe>,
    notifier: Arc<dyn Notifier>,
    listeners: Mutex<Listeners>,
    states: StdMutex<BTreeMap<String, ServerState>>,
}

impl ServerManager {
    pub fn new(
        settings: Arc<SettingsStore>,
        serve: Arc<dyn HttpServe>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            serve,
            notifier,
            listeners: Mutex::new(Listeners::default()),
            states: StdMutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    fn set_state(&self, id: &str, state: ServerState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), state);
    }

    /// State of one proxy config; unknown ids are `Disabled`.
    pub fn state(&self, id: &str) -> ServerState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or(ServerState::Disabled)
    }

    pub fn states(&self) -> BTreeMap<String, ServerState> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn running(&self) -> Vec<RunningServer> {
        let listeners = self.listeners.lock().await;
        listeners
            .live
            .iter()
            .map(|(id, live)| RunningServer {
                id: id.clone(),
                port: live.spec.port,
                target: live.spec.target.clone(),
                addr: live.handle.local_addr(),
            })
            .collect()
    }

    /// Bring live listeners in line with the current settings.
    pub async fn sync_servers(&self) -> SyncReport {
        let settings = self.settings.snapshot();
        let mut listeners = self.listeners.lock().await;
        let mut report = SyncReport::default();

        // Desired listeners, in config order.
        let desired: Vec<ListenSpec> = settings
            .proxy
            .iter()
            .filter(|p| p.enabled && p.port != 0)
            .filter_map(|p| {
                normalize_target(&p.target).map(|target| ListenSpec {
                    proxy_id: p.id.clone(),
                    port: p.port,
                    target,
                })
            })
            .collect();
        let wanted = |id: &str| desired.iter().find(|d| d.proxy_id == id);

        // Enabled but missing what a listener needs: refuse, and say so once.
        let mut unstartable = HashSet::new();
        for proxy in settings.proxy.iter().filter(|p| p.enabled) {
            let reason = if proxy.port == 0 {
                "no port configured"
            } else if normalize_target(&proxy.target).is_none() {
                "no target configured"
            } else {
                continue;
            };
            if !listeners.unstartable.contains(&proxy.id) {
                warn!(proxy = %proxy.id, reason, "Proxy not started");
                self.notifier.notify(
                    Level::Warn,
                    &format!("Proxy {} not started: {}", proxy.id, reason),
                );
            }
            unstartable.insert(proxy.id.clone());
        }
        listeners.unstartable = unstartable;

        // Close listeners that are gone, disabled or changed.
        let stale: Vec<String> = listeners
            .live
            .iter()
            .filter(|(id, live)| wanted(id.as_str()) != Some(&live.spec))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(live) = listeners.live.remove(&id) {
                info!(proxy = %id, port = live.spec.port, "Stopping proxy listener");
                live.handle.close().await;
                self.set_state(&id, ServerState::Disabled);
                report.stopped.push(id);
            }
        }

        // Forget failures whose config changed.
        listeners
            .failed
            .retain(|id, spec| wanted(id.as_str()) == Some(&*spec));

        for proxy in &settings.proxy {
            if wanted(proxy.id.as_str()).is_none() && !listeners.live.contains_key(&proxy.id) {
                self.set_state(&proxy.id, ServerState::Disabled);
            }
        }

        for spec in &desired {
            let id = &spec.proxy_id;
            if listeners.live.contains_key(id) || listeners.failed.contains_key(id) {
                continue;
            }

            let conflict = listeners
                .live
                .values()
                .find(|l| l.spec.port == spec.port)
                .map(|l| l.spec.proxy_id.clone());
            let result = match conflict {
                Some(other) => Err(eyre::eyre!(
                    "port {} is already used by proxy {}",
                    spec.port,
                    other
                )),
                None => {
                    self.set_state(id, ServerState::Starting { port: spec.port });
                    self.serve.listen(spec).await
                }
            };

            match result {
                Ok(handle) => {
                    info!(
                        proxy = %id,
                        addr = %handle.local_addr(),
                        target = %spec.target,
                        "Proxy listener started"
                    );
                    self.set_state(id, ServerState::Running { port: spec.port });
                    listeners.live.insert(
                        id.clone(),
                        Live {
                            spec: spec.clone(),
                            handle,
                        },
                    );
                    report.started.push(id.clone());
                }
                Err(e) => {
                    let message = format!(
                        "Failed to start proxy {} on port {}: {:#}",
                        id, spec.port, e
                    );
                    self.notifier.notify(Level::Error, &message);
                    self.set_state(
                        id,
                        ServerState::Failed {
                            port: spec.port,
                            error: format!("{e:#}"),
                        },
                    );
                    listeners.failed.insert(id.clone(), spec.clone());
                    report.failed.push(id.clone());
                }
            }
        }

        // Drop states of configs that no longer exist.
        {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states.retain(|id, _| settings.proxy.iter().any(|p| &p.id == id));
        }

        if !report.is_empty() {
            debug!(?report, "Proxy listeners synced");
        }
        report
    }

    /// Start every enabled proxy. When none is enabled, the first one is
    /// enabled (and saved) first. Previous start failures are retried.
    pub async fn start_all(&self) -> SyncReport {
        let enabled = self
            .settings
            .update(|s| {
                if s.proxy.iter().any(|p| p.enabled) {
                    return None;
                }
                s.proxy.first_mut().map(|p| {
                    p.enabled = true;
                    p.id.clone()
                })
            })
            .await;
        match enabled {
            Ok(Some(id)) => info!(proxy = %id, "No proxy enabled, enabling the first one"),
            Ok(None) => {}
            Err(e) => self
                .notifier
                .notify(Level::Warn, &format!("Failed to save settings: {e:#}")),
        }

        self.listeners.lock().await.failed.clear();
        self.sync_servers().await
    }

    /// Close every listener. Returns the ids that were running.
    pub async fn stop_all(&self) -> Vec<String> {
        let mut listeners = self.listeners.lock().await;
        listeners.failed.clear();
        let live = std::mem::take(&mut listeners.live);
        let mut stopped = Vec::with_capacity(live.len());
        for (id, live) in live {
            info!(proxy = %id, port = live.spec.port, "Stopping proxy listener");
            live.handle.close().await;
            self.set_state(&id, ServerState::Disabled);
            stopped.push(id);
        }
        stopped
    }
}
