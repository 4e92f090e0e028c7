//! Anchor records and the tree operations the store is built from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Group new anchors land in when the caller does not pick one.
pub const DEFAULT_GROUP: &str = "default";

/// Groups that always exist, even in a fresh workspace.
pub const BOOTSTRAP_GROUPS: [&str; 4] = ["default", "Default", "TODO", "FIXME"];

/// One bookmark, possibly with nested children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    pub id: String,
    /// Workspace-relative path with forward slashes.
    pub file_path: String,
    /// 1-based line at the last known good position.
    pub line: u32,
    /// Trimmed text of the target line, used as a drift fingerprint.
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Position within the sibling list, contiguous and 1-based.
    #[serde(default)]
    pub sort: u32,
    #[serde(default)]
    pub items: Vec<AnchorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl AnchorRecord {
    pub(crate) fn from_new(new: NewAnchor, sort: u32, pid: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            file_path: normalize_path(&new.file_path),
            line: new.line.max(1),
            content: new.content.trim().to_string(),
            group: new.group,
            description: new.description.filter(|d| !d.is_empty()),
            sort,
            items: Vec::new(),
            pid,
            timestamp: now_millis(),
        }
    }
}

/// Persisted anchor state for one workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorConfig {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub anchors: Vec<AnchorRecord>,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            groups: BOOTSTRAP_GROUPS.iter().map(|g| g.to_string()).collect(),
            anchors: Vec::new(),
        }
    }
}

impl AnchorConfig {
    /// Append any missing bootstrap group, keeping existing order.
    pub fn ensure_bootstrap_groups(&mut self) {
        for group in BOOTSTRAP_GROUPS {
            if !self.groups.iter().any(|g| g == group) {
                self.groups.push(group.to_string());
            }
        }
    }
}

/// The caller-supplied part of a new anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnchor {
    pub file_path: String,
    pub line: u32,
    pub content: String,
    pub group: String,
    pub description: Option<String>,
}

impl NewAnchor {
    pub fn new(file_path: impl Into<String>, line: u32, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            content: content.into(),
            group: default_group(),
            description: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Fields `update_anchor` may change. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorPatch {
    pub line: Option<u32>,
    pub content: Option<String>,
    /// An empty string clears the description.
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

/// Normalize a workspace-relative path: forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let mut rest = path.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.to_string()
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Tree helpers
// ============================================================================

/// Index path from the top-level list down to the record with `id`.
pub(crate) fn locate(list: &[AnchorRecord], id: &str) -> Option<Vec<usize>> {
    for (i, record) in list.iter().enumerate() {
        if record.id == id {
            return Some(vec![i]);
        }
        if let Some(mut rest) = locate(&record.items, id) {
            rest.insert(0, i);
            return Some(rest);
        }
    }
    None
}

/// The list that directly contains the record at `path`.
pub(crate) fn container_mut<'a>(
    list: &'a mut Vec<AnchorRecord>,
    path: &[usize],
) -> Option<&'a mut Vec<AnchorRecord>> {
    let (_, parents) = path.split_last()?;
    let mut current = list;
    for &i in parents {
        current = &mut current.get_mut(i)?.items;
    }
    Some(current)
}

pub(crate) fn record_mut<'a>(
    list: &'a mut [AnchorRecord],
    path: &[usize],
) -> Option<&'a mut AnchorRecord> {
    let (&first, rest) = path.split_first()?;
    let mut current = list.get_mut(first)?;
    for &i in rest {
        current = current.items.get_mut(i)?;
    }
    Some(current)
}

/// Whether two records belong to the same sibling list.
///
/// Top-level anchors are siblings only within their group; nested anchors
/// are siblings of everything under the same parent.
fn same_siblings(top_level: bool, a: &AnchorRecord, b: &AnchorRecord) -> bool {
    !top_level || a.group == b.group
}

/// Re-number `sort` for every sibling list held in `list`.
pub(crate) fn renumber(list: &mut [AnchorRecord], top_level: bool) {
    if !top_level {
        for (i, record) in list.iter_mut().enumerate() {
            record.sort = i as u32 + 1;
        }
        return;
    }
    let mut counters: HashMap<String, u32> = HashMap::new();
    for record in list.iter_mut() {
        let counter = counters.entry(record.group.clone()).or_insert(0);
        *counter += 1;
        record.sort = *counter;
    }
}

/// Index of the closest sibling of `list[index]` in `direction`.
pub(crate) fn sibling_index(
    list: &[AnchorRecord],
    index: usize,
    top_level: bool,
    direction: Direction,
) -> Option<usize> {
    let current = list.get(index)?;
    match direction {
        Direction::Up => (0..index)
            .rev()
            .find(|&i| same_siblings(top_level, &list[i], current)),
        Direction::Down => {
            (index + 1..list.len()).find(|&i| same_siblings(top_level, &list[i], current))
        }
    }
}

/// Depth-first, pre-order copy of every record.
pub(crate) fn flatten(list: &[AnchorRecord], out: &mut Vec<AnchorRecord>) {
    for record in list {
        out.push(record.clone());
        flatten(&record.items, out);
    }
}

/// Overwrite `group` on every descendant of `items`.
pub(crate) fn cascade_group(items: &mut [AnchorRecord], group: &str) {
    for item in items {
        item.group = group.to_string();
        cascade_group(&mut item.items, group);
    }
}
