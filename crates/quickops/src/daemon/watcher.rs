//! File watcher with health monitoring.
//!
//! The whole workspace root is watched recursively. Each debounced batch is
//! classified into [`WatcherEvent`]s:
//!
//! - a change to `.quickops/settings.json` becomes `SettingsChanged`;
//! - a change to `.quickops/anchors.json` becomes `AnchorsChanged`;
//! - changes to other files become `FilesChanged` with workspace-relative
//!   paths, for the anchor reconciler.
//!
//! Version control metadata, the rest of `.quickops/` and build output are
//! ignored.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eyre::{Result, WrapErr};
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Quiet period the debouncer waits for before reporting a batch.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Directories whose contents never matter.
const IGNORED_DIRS: &[&str] = &[".git", ".hg", ".svn", "node_modules", "target"];

/// Events sent from the watcher to the daemon loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// The settings file was edited outside of quickops.
    SettingsChanged,

    /// The anchors file was rewritten, possibly by another process.
    AnchorsChanged,

    /// Files changed, as workspace-relative `/`-separated paths.
    FilesChanged(Vec<String>),
}

// ============================================================================
// Watcher State (Health Monitoring)
// ============================================================================

/// Shared between the watcher thread and the daemon for health reporting.
pub struct WatcherState {
    active: AtomicBool,
    /// Millis since UNIX epoch, 0 before the first event.
    last_event_ms: AtomicU64,
    event_count: AtomicU64,
    watched_dirs: RwLock<Vec<PathBuf>>,
    error: RwLock<Option<String>>,
}

impl WatcherState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark the watcher as active (called on successful startup).
    pub fn mark_active(&self) {
        self.active.store(true, Ordering::SeqCst);
        *self.error.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn mark_failed(&self, error: String) {
        self.active.store(false, Ordering::SeqCst);
        *self.error.write().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    pub fn mark_stopped(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn record_event(&self) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_event_ms.store(now, Ordering::SeqCst);
    }

    pub fn set_watched_dirs(&self, dirs: Vec<PathBuf>) {
        *self.watched_dirs.write().unwrap_or_else(|e| e.into_inner()) = dirs;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Last event timestamp (millis since epoch), or None if no events.
    pub fn last_event_ms(&self) -> Option<u64> {
        let ms = self.last_event_ms.load(Ordering::SeqCst);
        if ms == 0 { None } else { Some(ms) }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.watched_dirs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn error(&self) -> Option<String> {
        self.error.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for WatcherState {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(false),
            last_event_ms: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
            watched_dirs: RwLock::new(Vec::new()),
            error: RwLock::new(None),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Workspace-relative `/`-separated form of `path`, or None when it lies
/// outside `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Sort a batch of changed paths into watcher events.
pub fn classify(root: &Path, paths: &[PathBuf]) -> Vec<WatcherEvent> {
    let settings_rel = format!("{}/settings.json", crate::STATE_DIR);
    let anchors_rel = format!("{}/anchors.json", crate::STATE_DIR);
    let mut settings_changed = false;
    let mut anchors_changed = false;
    let mut files: Vec<String> = Vec::new();

    for path in paths {
        let Some(rel) = relative_path(root, path) else {
            continue;
        };
        if rel == settings_rel {
            settings_changed = true;
            continue;
        }
        if rel == anchors_rel {
            anchors_changed = true;
            continue;
        }
        let first = rel.split('/').next().unwrap_or_default();
        if first == crate::STATE_DIR || rel.split('/').any(|c| IGNORED_DIRS.contains(&c)) {
            continue;
        }
        if !files.contains(&rel) {
            files.push(rel);
        }
    }

    let mut events = Vec::new();
    if settings_changed {
        events.push(WatcherEvent::SettingsChanged);
    }
    // Before file changes, so anchors added elsewhere get reconciled.
    if anchors_changed {
        events.push(WatcherEvent::AnchorsChanged);
    }
    if !files.is_empty() {
        events.push(WatcherEvent::FilesChanged(files));
    }
    events
}

// ============================================================================
// Watching
// ============================================================================

/// Watch `root` recursively, sending classified batches on `tx`.
///
/// The returned debouncer must be kept alive for events to flow.
pub fn watch_root(
    root: &Path,
    tx: mpsc::Sender<WatcherEvent>,
    state: Arc<WatcherState>,
) -> Result<Debouncer<RecommendedWatcher>> {
    // Events carry canonical paths on most platforms.
    let root = root
        .canonicalize()
        .wrap_err_with(|| format!("Failed to resolve {}", root.display()))?;

    let handler_root = root.clone();
    let handler = move |res: DebounceEventResult| {
        let events = match res {
            Ok(events) => events,
            Err(e) => {
                warn!("File watcher error: {}", e);
                return;
            }
        };
        let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
        if paths.is_empty() {
            return;
        }
        state.record_event();

        for event in classify(&handler_root, &paths) {
            debug!(?event, "batched file changes");
            if tx.blocking_send(event).is_err() {
                debug!("Watcher channel closed");
                return;
            }
        }
    };

    let mut debouncer =
        new_debouncer(WATCH_DEBOUNCE, handler).wrap_err("Failed to create file watcher")?;
    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .wrap_err_with(|| format!("Failed to watch {}", root.display()))?;
    info!("Watching directory: {}", root.display());
    Ok(debouncer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_state_lifecycle() {
        let state = WatcherState::new();

        assert!(!state.is_active());
        assert!(state.error().is_none());
        assert_eq!(state.event_count(), 0);
        assert!(state.last_event_ms().is_none());

        state.mark_active();
        assert!(state.is_active());

        state.record_event();
        assert_eq!(state.event_count(), 1);
        assert!(state.last_event_ms().is_some());

        state.mark_failed("inotify limit".to_string());
        assert!(!state.is_active());
        assert_eq!(state.error(), Some("inotify limit".to_string()));

        // Mark active clears error
        state.mark_active();
        assert!(state.error().is_none());
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/ws");
        assert_eq!(
            relative_path(root, Path::new("/ws/src/main.rs")),
            Some("src/main.rs".to_string())
        );
        assert_eq!(relative_path(root, Path::new("/elsewhere/a.rs")), None);
        assert_eq!(relative_path(root, Path::new("/ws")), None);
    }

    #[test]
    fn test_classify_settings_and_files() {
        let root = Path::new("/ws");
        let events = classify(
            root,
            &[
                PathBuf::from("/ws/.quickops/settings.json"),
                PathBuf::from("/ws/src/lib.rs"),
                PathBuf::from("/ws/src/lib.rs"),
                PathBuf::from("/ws/README.md"),
            ],
        );
        assert_eq!(
            events,
            vec![
                WatcherEvent::SettingsChanged,
                WatcherEvent::FilesChanged(vec![
                    "src/lib.rs".to_string(),
                    "README.md".to_string()
                ]),
            ]
        );
    }

    #[test]
    fn test_classify_ignores_state_and_vcs() {
        let root = Path::new("/ws");
        let events = classify(
            root,
            &[
                PathBuf::from("/ws/.quickops/anchors.json.tmp"),
                PathBuf::from("/ws/.git/index"),
                PathBuf::from("/ws/web/node_modules/x/index.js"),
                PathBuf::from("/ws/target/debug/quickops"),
            ],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_classify_anchors_file_before_files() {
        let root = Path::new("/ws");
        let events = classify(
            root,
            &[
                PathBuf::from("/ws/src/lib.rs"),
                PathBuf::from("/ws/.quickops/anchors.json"),
            ],
        );
        assert_eq!(
            events,
            vec![
                WatcherEvent::AnchorsChanged,
                WatcherEvent::FilesChanged(vec!["src/lib.rs".to_string()]),
            ]
        );
    }
}
