//! quickops daemon - long-running process for one workspace.
//!
//! The daemon owns the workspace context: anchors, settings and the proxy
//! listeners. It starts every enabled proxy, watches the workspace for
//! settings edits and saved files, serves the control API, and on Ctrl-C
//! stops all listeners and flushes pending anchor changes.

pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::context::{Workspace, Workspaces};
use crate::notify::NotificationHub;
use crate::persist::FsPersistence;
use watcher::{WatcherEvent, WatcherState};

/// Delay before a failed watcher is restarted.
const WATCHER_RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Control API port, or None to run without it.
    pub control_port: Option<u16>,
}

/// Ensure the .quickops directory exists and is gitignored.
pub fn ensure_state_dir(project_root: &Path) -> Result<PathBuf> {
    let dir = crate::state_dir(project_root);
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("Failed to create {}", dir.display()))?;

    let gitignore_path = project_root.join(".gitignore");
    let content = std::fs::read_to_string(&gitignore_path).unwrap_or_default();
    let needs_entry = !content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == ".quickops" || trimmed == ".quickops/" || trimmed == "/.quickops/"
    });

    if needs_entry {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&gitignore_path)?;
        if !content.is_empty() && !content.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, ".quickops/")?;
        info!("Added .quickops/ to .gitignore");
    }

    Ok(dir)
}

/// Run the daemon for the given workspace.
///
/// This function blocks until Ctrl-C.
pub async fn run(project_root: PathBuf, options: ServeOptions) -> Result<()> {
    info!("Starting quickops for {}", project_root.display());
    ensure_state_dir(&project_root)?;

    let hub = Arc::new(NotificationHub::new());
    let workspaces = Workspaces::new(Arc::new(FsPersistence), Arc::clone(&hub));
    let workspace = workspaces.open(&project_root).await;

    let report = workspace.servers.start_all().await;
    info!(
        "{} proxy listeners started, {} failed",
        report.started.len(),
        report.failed.len()
    );

    // File watcher in its own OS thread with auto-restart
    let watcher_state = WatcherState::new();
    let (watcher_tx, watcher_rx) = mpsc::channel::<WatcherEvent>(16);
    spawn_watcher(
        project_root.clone(),
        watcher_tx,
        Arc::clone(&watcher_state),
    );
    let events_task = tokio::spawn(process_events(Arc::clone(&workspace), watcher_rx));

    let (control_shutdown_tx, control_shutdown_rx) = oneshot::channel::<()>();
    let control_task = options.control_port.map(|port| {
        let workspace = Arc::clone(&workspace);
        let hub = Arc::clone(&hub);
        let watcher = Some(Arc::clone(&watcher_state));
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = control_shutdown_rx.await;
            };
            if let Err(e) = crate::control::serve(workspace, hub, watcher, port, shutdown).await {
                error!("Control API failed: {:#}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let _ = control_shutdown_tx.send(());
    if let Some(task) = control_task {
        let _ = task.await;
    }
    events_task.abort();
    workspaces.shutdown().await;
    watcher_state.mark_stopped();
    Ok(())
}

fn spawn_watcher(
    project_root: PathBuf,
    tx: mpsc::Sender<WatcherEvent>,
    state: Arc<WatcherState>,
) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create runtime for file watcher: {}", e);
                state.mark_failed(e.to_string());
                return;
            }
        };

        rt.block_on(async {
            loop {
                match watcher::watch_root(&project_root, tx.clone(), Arc::clone(&state)) {
                    Ok(debouncer) => {
                        state.mark_active();
                        state.set_watched_dirs(vec![project_root.clone()]);
                        // Keep watching until the daemon drops the receiver.
                        tx.closed().await;
                        drop(debouncer);
                        info!("File watcher stopped cleanly");
                        break;
                    }
                    Err(e) => {
                        let error_msg = format!("{:#}", e);
                        error!("File watcher failed: {}, restarting in 5s", error_msg);
                        state.mark_failed(error_msg);
                        tokio::time::sleep(WATCHER_RESTART_DELAY).await;
                    }
                }
            }
        });
    });
}

/// Apply watcher events to the workspace until the channel closes.
pub async fn process_events(workspace: Arc<Workspace>, mut rx: mpsc::Receiver<WatcherEvent>) {
    while let Some(event) = rx.recv().await {
        handle_event(&workspace, event).await;
    }
}

/// Apply one watcher event.
pub async fn handle_event(workspace: &Workspace, event: WatcherEvent) {
    match event {
        WatcherEvent::SettingsChanged => {
            if workspace.settings.reload().await {
                let report = workspace.servers.sync_servers().await;
                info!(
                    "Settings changed: {} started, {} stopped, {} failed",
                    report.started.len(),
                    report.stopped.len(),
                    report.failed.len()
                );
            }
        }
        WatcherEvent::AnchorsChanged => {
            if workspace.anchors.reload().await {
                debug!("Anchors file changed outside the daemon");
            }
        }
        WatcherEvent::FilesChanged(files) => {
            let anchored = workspace.anchors.anchor_files();
            let relevant: Vec<&String> = files.iter().filter(|f| anchored.contains(*f)).collect();
            if relevant.is_empty() {
                debug!("Filtered out {} file changes (no anchors)", files.len());
                return;
            }
            info!(
                "File change detected: {}",
                relevant
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            for file in relevant {
                match workspace.anchors.reconcile_file(file).await {
                    Ok(changes) => {
                        for change in changes {
                            debug!(
                                id = %change.id,
                                from = change.old_line,
                                to = change.new_line,
                                "anchor moved"
                            );
                        }
                    }
                    // Deleted or unreadable; anchors stay where they were.
                    Err(e) => warn!("Skipping reconcile of {}: {:#}", file, e),
                }
            }
        }
    }
}
