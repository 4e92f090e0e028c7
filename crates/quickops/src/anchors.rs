//! Anchor service: one [`AnchorStore`] per workspace with debounced saves.
//!
//! Every mutation of the store wakes a background persister. The persister
//! waits until no further change arrives for [`PERSIST_DEBOUNCE`] and then
//! writes the whole document once. Memory is authoritative: a failed write
//! is reported through the [`Notifier`] and retried on the next change.
//!
//! Another process (the CLI) may rewrite the anchors file while a daemon
//! holds the store. [`AnchorService::reload`] picks such edits up and
//! ignores the service's own writes by comparing against the bytes it last
//! read or wrote.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use eyre::WrapErr;
use quickops_core::{
    AnchorConfig, AnchorEvent, AnchorPatch, AnchorRecord, AnchorStore, Direction, DocumentText, InsertPosition,
    Neighbor, NewAnchor, Reconciled, normalize_path, reconcile,
};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notify::{Level, Notifier};
use crate::persist::Persistence;

/// Quiet period before pending anchor changes are written.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct AnchorService {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    path: PathBuf,
    store: Mutex<AnchorStore>,
    persistence: Arc<dyn Persistence>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<AnchorEvent>,
    persister: Mutex<Option<JoinHandle<()>>>,
    /// Document last read from or written to `path`.
    synced: Mutex<Option<Vec<u8>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self
            .persister
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

impl AnchorService {
    /// Load `<root>/.quickops/anchors.json` and start the persister.
    ///
    /// Never fails: a missing file gives an empty store, an unreadable or
    /// malformed one is logged and replaced by an empty store.
    pub async fn open(
        root: impl Into<PathBuf>,
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let root = root.into();
        let path = crate::anchors_path(&root);

        let mut synced = None;
        let mut store = match persistence.read(&path).await {
            Ok(Some(bytes)) => match AnchorStore::from_json(&bytes) {
                Ok(store) => {
                    info!(
                        "Loaded {} anchors from {}",
                        store.len(),
                        path.display()
                    );
                    synced = Some(bytes);
                    store
                }
                Err(e) => {
                    warn!("Ignoring malformed {}: {:#}", path.display(), e);
                    AnchorStore::new()
                }
            },
            Ok(None) => {
                debug!("No anchors file at {}", path.display());
                AnchorStore::new()
            }
            Err(e) => {
                warn!("Failed to load anchors: {:#}", e);
                AnchorStore::new()
            }
        };

        let dirty = Arc::new(Notify::new());
        let (events, _) = broadcast::channel(64);
        {
            let dirty = Arc::clone(&dirty);
            let events = events.clone();
            store.subscribe(move |event| {
                dirty.notify_one();
                let _ = events.send(event.clone());
            });
        }

        let inner = Arc::new(Inner {
            root,
            path,
            store: Mutex::new(store),
            persistence,
            notifier,
            events,
            persister: Mutex::new(None),
            synced: Mutex::new(synced),
        });

        let task = tokio::spawn(persist_loop(Arc::downgrade(&inner), dirty));
        *inner
            .persister
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);

        Self { inner }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Change notifications for async consumers (WebSocket, watcher).
    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.inner.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, AnchorStore> {
        self.inner.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the store. Never hold the guard across an await.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut AnchorStore) -> R) -> R {
        f(&mut *self.lock())
    }

    /// Write the current state right away.
    pub async fn flush(&self) -> bool {
        self.inner.persist_now().await
    }

    /// Replace the store with the anchors file on disk if someone else
    /// changed it. Returns true when the store was replaced.
    ///
    /// A missing, unreadable or malformed file leaves the store as it is.
    pub async fn reload(&self) -> bool {
        let bytes = match self.inner.persistence.read(&self.inner.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to read anchors: {:#}", e);
                return false;
            }
        };
        if self.inner.is_synced(&bytes) {
            debug!("Anchors file unchanged since last sync");
            return false;
        }
        let config: AnchorConfig = match serde_json::from_slice(&bytes) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.inner.path.display(), e);
                return false;
            }
        };
        *self.inner.synced.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes);

        let mut store = self.lock();
        store.replace_config(config);
        info!("Reloaded {} anchors from {}", store.len(), self.inner.path.display());
        true
    }

    pub fn add_anchor(&self, new: NewAnchor) -> AnchorRecord {
        self.lock().add_anchor(new)
    }

    pub fn add_child_anchor(&self, parent_id: &str, new: NewAnchor) -> Option<AnchorRecord> {
        self.lock().add_child_anchor(parent_id, new)
    }

    pub fn insert_anchor(
        &self,
        new: NewAnchor,
        target_id: &str,
        position: InsertPosition,
    ) -> AnchorRecord {
        self.lock().insert_anchor(new, target_id, position)
    }

    pub fn move_anchor(&self, id: &str, direction: Direction) -> bool {
        self.lock().move_anchor(id, direction)
    }

    pub fn remove_anchor(&self, id: &str) -> Option<AnchorRecord> {
        self.lock().remove_anchor(id)
    }

    pub fn update_anchor(&self, id: &str, patch: AnchorPatch) -> bool {
        self.lock().update_anchor(id, patch)
    }

    pub fn anchors(&self, file_path: Option<&str>) -> Vec<AnchorRecord> {
        self.lock().anchors(file_path)
    }

    pub fn anchor_by_id(&self, id: &str) -> Option<AnchorRecord> {
        self.lock().anchor_by_id(id)
    }

    pub fn neighbor_anchor(&self, id: &str, neighbor: Neighbor) -> Option<AnchorRecord> {
        self.lock().neighbor_anchor(id, neighbor)
    }

    pub fn groups(&self) -> Vec<String> {
        self.lock().groups().to_vec()
    }

    pub fn add_group(&self, name: &str) -> bool {
        self.lock().add_group(name)
    }

    pub fn remove_group(&self, name: &str) -> bool {
        self.lock().remove_group(name)
    }

    pub fn remove_group_with_anchors(&self, name: &str) -> usize {
        self.lock().remove_group_with_anchors(name)
    }

    pub fn anchor_files(&self) -> BTreeSet<String> {
        self.lock().anchor_files()
    }

    /// Reconcile the anchors of `file_path` against `text`.
    pub fn reconcile_text(&self, file_path: &str, text: &str) -> Vec<Reconciled> {
        let doc = DocumentText::new(text);
        let changes = reconcile(&mut *self.lock(), file_path, &doc);
        if !changes.is_empty() {
            info!("Reconciled {} anchors in {}", changes.len(), file_path);
        }
        changes
    }

    /// Read a saved file from disk and reconcile its anchors.
    ///
    /// `file_path` is workspace-relative. Files without anchors are not read.
    pub async fn reconcile_file(&self, file_path: &str) -> eyre::Result<Vec<Reconciled>> {
        let rel = normalize_path(file_path);
        if !self.anchor_files().contains(&rel) {
            return Ok(Vec::new());
        }
        let full = self.inner.root.join(&rel);
        let text = tokio::fs::read_to_string(&full)
            .await
            .wrap_err_with(|| format!("Failed to read {}", full.display()))?;
        Ok(self.reconcile_text(&rel, &text))
    }
}

impl Inner {
    fn is_synced(&self, bytes: &[u8]) -> bool {
        self.synced
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            == Some(bytes)
    }

    async fn persist_now(&self) -> bool {
        let bytes = {
            let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.to_json()
        };
        let result = match bytes {
            Ok(bytes) => {
                // Recorded before the write lands so the watcher never
                // mistakes it for an outside edit.
                *self.synced.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes.clone());
                self.persistence.write(&self.path, &bytes).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!("Saved anchors to {}", self.path.display());
                true
            }
            Err(e) => {
                self.notifier
                    .notify(Level::Warn, &format!("Failed to save anchors: {e:#}"));
                false
            }
        }
    }
}

/// Trailing-edge debounce: every wake-up restarts the quiet period.
async fn persist_loop(inner: Weak<Inner>, dirty: Arc<Notify>) {
    loop {
        dirty.notified().await;
        while tokio::time::timeout(PERSIST_DEBOUNCE, dirty.notified())
            .await
            .is_ok()
        {}
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.persist_now().await;
    }
}
