//! Proxy and mock settings for a workspace.
//!
//! Settings live at `.quickops/settings.json` relative to the workspace root.
//! The current value is published through a `watch` channel so request
//! handlers take an `Arc` snapshot per request instead of sharing mutable
//! state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use quickops_core::{MockRule, ProxyConfig, Settings};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::persist::Persistence;

pub struct SettingsStore {
    path: PathBuf,
    persistence: Arc<dyn Persistence>,
    tx: watch::Sender<Arc<Settings>>,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load `<root>/.quickops/settings.json`.
    ///
    /// A missing file gives default settings; a malformed one is logged and
    /// replaced by defaults.
    pub async fn load(root: &Path, persistence: Arc<dyn Persistence>) -> Self {
        let path = crate::settings_path(root);
        let settings = read_settings(&path, persistence.as_ref())
            .await
            .unwrap_or_default();
        Self::new(path, settings, persistence)
    }

    pub fn new(path: PathBuf, settings: Settings, persistence: Arc<dyn Persistence>) -> Self {
        let (tx, _) = watch::channel(Arc::new(settings));
        Self {
            path,
            persistence,
            tx,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current settings.
    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.tx.subscribe()
    }

    /// Re-read the file after an external edit. Returns whether anything
    /// changed. An unparsable file keeps the current settings.
    pub async fn reload(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let Some(next) = read_settings(&self.path, self.persistence.as_ref()).await else {
            return false;
        };
        if *self.snapshot() == next {
            debug!("Settings file touched without changes");
            return false;
        }
        info!("Settings reloaded from {}", self.path.display());
        self.tx.send_replace(Arc::new(next));
        true
    }

    /// Apply `f` to a copy of the settings, publish it and save it.
    ///
    /// Nothing is written when `f` leaves the settings unchanged. The new
    /// value is published even if saving fails; the error is returned.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> Result<R> {
        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        let mut next = Settings::clone(&current);
        let out = f(&mut next);
        if next == *current {
            return Ok(out);
        }
        let bytes = serde_json::to_vec_pretty(&next).wrap_err("Failed to serialize settings")?;
        self.tx.send_replace(Arc::new(next));
        self.persistence
            .write(&self.path, &bytes)
            .await
            .wrap_err_with(|| format!("Failed to save {}", self.path.display()))?;
        Ok(out)
    }

    pub async fn replace(&self, settings: Settings) -> Result<()> {
        self.update(|s| *s = settings).await
    }

    /// Insert a proxy, or replace the one with the same id.
    pub async fn upsert_proxy(&self, proxy: ProxyConfig) -> Result<()> {
        self.update(|s| match s.proxy.iter_mut().find(|p| p.id == proxy.id) {
            Some(existing) => *existing = proxy,
            None => s.proxy.push(proxy),
        })
        .await
    }

    /// Remove a proxy together with its rules.
    pub async fn remove_proxy(&self, id: &str) -> Result<bool> {
        self.update(|s| {
            let before = s.proxy.len();
            s.proxy.retain(|p| p.id != id);
            s.mock.retain(|r| r.proxy_id != id);
            s.proxy.len() != before
        })
        .await
    }

    pub async fn set_proxy_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        self.update(|s| match s.proxy.iter_mut().find(|p| p.id == id) {
            Some(proxy) => {
                proxy.enabled = enabled;
                true
            }
            None => false,
        })
        .await
    }

    /// Insert a rule, or replace the one with the same id in place so its
    /// precedence is kept.
    pub async fn upsert_rule(&self, rule: MockRule) -> Result<()> {
        self.update(|s| match s.mock.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => s.mock.push(rule),
        })
        .await
    }

    pub async fn remove_rule(&self, id: &str) -> Result<bool> {
        self.update(|s| {
            let before = s.mock.len();
            s.mock.retain(|r| r.id != id);
            s.mock.len() != before
        })
        .await
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        self.update(|s| match s.mock.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        })
        .await
    }
}

/// `None` when the file is malformed or unreadable; defaults when missing.
async fn read_settings(path: &Path, persistence: &dyn Persistence) -> Option<Settings> {
    match persistence.read(path).await {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("Settings file {} has errors: {}", path.display(), e);
                None
            }
        },
        Ok(None) => Some(Settings::default()),
        Err(e) => {
            warn!("Failed to read settings: {:#}", e);
            None
        }
    }
}
