//! Per-workspace context.
//!
//! A [`Workspace`] bundles the anchor service, the settings store and the
//! listener manager of one root. [`Workspaces`] keeps one per root so that
//! every consumer of the same folder shares state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quickops_core::TemplateGenerator;
use tracing::info;

use crate::anchors::AnchorService;
use crate::config::SettingsStore;
use crate::lifecycle::{AxumServe, HttpServe, ServerManager};
use crate::notify::{NotificationHub, Notifier};
use crate::persist::Persistence;
use crate::proxy::HyperForwarder;

pub struct Workspace {
    root: PathBuf,
    pub anchors: AnchorService,
    pub settings: Arc<SettingsStore>,
    pub servers: Arc<ServerManager>,
}

impl Workspace {
    /// Open a workspace with real HTTP listeners.
    pub async fn open(
        root: impl Into<PathBuf>,
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let root = root.into();
        let settings = Arc::new(SettingsStore::load(&root, Arc::clone(&persistence)).await);
        let serve = Arc::new(AxumServe::new(
            root.clone(),
            settings.subscribe(),
            Arc::new(TemplateGenerator::new()),
            Arc::new(HyperForwarder::new()),
        ));
        Self::assemble(root, persistence, notifier, settings, serve).await
    }

    /// Open a workspace whose listeners are started by `serve`.
    pub async fn open_with(
        root: impl Into<PathBuf>,
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
        serve: Arc<dyn HttpServe>,
    ) -> Self {
        let root = root.into();
        let settings = Arc::new(SettingsStore::load(&root, Arc::clone(&persistence)).await);
        Self::assemble(root, persistence, notifier, settings, serve).await
    }

    async fn assemble(
        root: PathBuf,
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<SettingsStore>,
        serve: Arc<dyn HttpServe>,
    ) -> Self {
        let anchors = AnchorService::open(root.clone(), persistence, Arc::clone(&notifier)).await;
        let servers = Arc::new(ServerManager::new(Arc::clone(&settings), serve, notifier));
        Self {
            root,
            anchors,
            settings,
            servers,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop listeners and write pending anchor changes.
    pub async fn shutdown(&self) {
        let stopped = self.servers.stop_all().await;
        if !stopped.is_empty() {
            info!("Stopped {} proxy listeners", stopped.len());
        }
        self.anchors.flush().await;
    }
}

/// Open workspaces keyed by root.
pub struct Workspaces {
    persistence: Arc<dyn Persistence>,
    hub: Arc<NotificationHub>,
    open: Mutex<HashMap<PathBuf, Arc<Workspace>>>,
}

impl Workspaces {
    pub fn new(persistence: Arc<dyn Persistence>, hub: Arc<NotificationHub>) -> Self {
        Self {
            persistence,
            hub,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// The workspace for `root`, opening it on first use.
    pub async fn open(&self, root: &Path) -> Arc<Workspace> {
        if let Some(ws) = self.get(root) {
            return ws;
        }
        let notifier: Arc<dyn Notifier> = self.hub.clone();
        let ws = Arc::new(
            Workspace::open(root.to_path_buf(), Arc::clone(&self.persistence), notifier).await,
        );
        // Another caller may have won the race while we were loading.
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            open.entry(root.to_path_buf())
                .or_insert_with(|| Arc::clone(&ws)),
        )
    }

    pub fn get(&self, root: &Path) -> Option<Arc<Workspace>> {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(root)
            .cloned()
    }

    pub async fn shutdown(&self) {
        let all: Vec<Arc<Workspace>> = self
            .open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, ws)| ws)
            .collect();
        for ws in all {
            ws.shutdown().await;
        }
    }
}
