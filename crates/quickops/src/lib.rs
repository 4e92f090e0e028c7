//! quickops library - anchors, mock servers and the daemon that ties them together
//!
//! This library exposes the runtime half of quickops for the binary and for
//! integration tests. The pure engine (anchor tree, reconciler, rule
//! matching, template generator) lives in `quickops-core`.

pub mod anchors;
pub mod config;
pub mod context;
pub mod control;
pub mod daemon;
pub mod lifecycle;
pub mod notify;
pub mod output;
pub mod persist;
pub mod proxy;

use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};

/// Per-workspace state directory, relative to the workspace root.
pub const STATE_DIR: &str = ".quickops";

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// `<root>/.quickops/anchors.json`
pub fn anchors_path(root: &Path) -> PathBuf {
    state_dir(root).join("anchors.json")
}

/// `<root>/.quickops/settings.json`
pub fn settings_path(root: &Path) -> PathBuf {
    state_dir(root).join("settings.json")
}

/// Find the workspace root for the current directory.
pub fn find_project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().wrap_err("Failed to get current directory")?;
    Ok(find_project_root_from(&cwd))
}

/// Walk up from `start` looking for a `.quickops` directory, then for a
/// `.git` entry. Falls back to `start` itself.
pub fn find_project_root_from(start: &Path) -> PathBuf {
    for marker in [STATE_DIR, ".git"] {
        let mut current = start.to_path_buf();
        loop {
            if current.join(marker).exists() {
                return current;
            }
            if !current.pop() {
                break;
            }
        }
    }
    start.to_path_buf()
}
