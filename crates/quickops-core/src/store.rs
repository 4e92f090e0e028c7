//! In-memory anchor store for one workspace root.
//!
//! The store owns the record tree, a flattened cache rebuilt on every
//! mutation, and a list of observers. It never persists anything itself:
//! observers (the service layer) react to [`AnchorEvent`]s and schedule
//! writes.

use std::collections::{BTreeSet, HashMap};

use eyre::{Result, WrapErr};

use crate::anchor::{
    AnchorConfig, AnchorPatch, AnchorRecord, Direction, InsertPosition, Neighbor, NewAnchor,
    cascade_group, container_mut, flatten, locate, normalize_path, record_mut, renumber,
    sibling_index,
};

/// Change notification fired after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorEvent {
    /// The record tree changed.
    AnchorsChanged,
    /// The group list changed.
    GroupsChanged,
}

/// Handle returned by [`AnchorStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&AnchorEvent) + Send + Sync>;

pub struct AnchorStore {
    config: AnchorConfig,
    /// Pre-order copy of every record.
    flat: Vec<AnchorRecord>,
    /// id -> index into `flat`
    index: HashMap<String, usize>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl Default for AnchorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AnchorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorStore")
            .field("groups", &self.config.groups)
            .field("anchors", &self.flat.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl AnchorStore {
    /// Empty store with the bootstrap groups.
    pub fn new() -> Self {
        Self::from_config(AnchorConfig::default())
    }

    pub fn from_config(mut config: AnchorConfig) -> Self {
        config.ensure_bootstrap_groups();
        let mut store = Self {
            config,
            flat: Vec::new(),
            index: HashMap::new(),
            listeners: Vec::new(),
            next_subscription: 1,
        };
        store.rebuild_cache();
        store
    }

    /// Parse a persisted anchors document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: AnchorConfig =
            serde_json::from_slice(bytes).wrap_err("Failed to parse anchors document")?;
        Ok(Self::from_config(config))
    }

    /// Serialize the current state as pretty JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.config).wrap_err("Failed to serialize anchors")
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Swap in a whole document, keeping subscribers. Both events fire.
    pub fn replace_config(&mut self, mut config: AnchorConfig) {
        config.ensure_bootstrap_groups();
        self.config = config;
        self.changed(AnchorEvent::GroupsChanged);
        self.changed(AnchorEvent::AnchorsChanged);
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&AnchorEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    fn changed(&mut self, event: AnchorEvent) {
        if event == AnchorEvent::AnchorsChanged {
            self.rebuild_cache();
        }
        for (_, listener) in &self.listeners {
            listener(&event);
        }
    }

    fn rebuild_cache(&mut self) {
        let mut flat = Vec::with_capacity(self.flat.len());
        flatten(&self.config.anchors, &mut flat);
        self.index = flat
            .iter()
            .enumerate()
            .map(|(i, record)| (record.id.clone(), i))
            .collect();
        self.flat = flat;
    }

    fn ensure_group(&mut self, group: &str) -> bool {
        if group.is_empty() || self.config.groups.iter().any(|g| g == group) {
            return false;
        }
        self.config.groups.push(group.to_string());
        true
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a top-level anchor at the end of its group.
    pub fn add_anchor(&mut self, new: NewAnchor) -> AnchorRecord {
        let sort = self
            .config
            .anchors
            .iter()
            .filter(|a| a.group == new.group)
            .map(|a| a.sort)
            .max()
            .unwrap_or(0)
            + 1;
        let group_added = self.ensure_group(&new.group);
        let record = AnchorRecord::from_new(new, sort, None);
        self.config.anchors.push(record.clone());
        if group_added {
            self.changed(AnchorEvent::GroupsChanged);
        }
        self.changed(AnchorEvent::AnchorsChanged);
        record
    }

    /// Append a child under `parent_id`. Returns `None` if the parent is gone.
    pub fn add_child_anchor(&mut self, parent_id: &str, new: NewAnchor) -> Option<AnchorRecord> {
        let path = locate(&self.config.anchors, parent_id)?;
        let parent = record_mut(&mut self.config.anchors, &path)?;
        let sort = parent.items.iter().map(|a| a.sort).max().unwrap_or(0) + 1;
        let record = AnchorRecord::from_new(new, sort, Some(parent_id.to_string()));
        parent.items.push(record.clone());
        if self.ensure_group(&record.group) {
            self.changed(AnchorEvent::GroupsChanged);
        }
        self.changed(AnchorEvent::AnchorsChanged);
        Some(record)
    }

    /// Insert next to `target_id` in whatever list holds it.
    ///
    /// Falls back to [`AnchorStore::add_anchor`] when the target cannot be found.
    pub fn insert_anchor(
        &mut self,
        new: NewAnchor,
        target_id: &str,
        position: InsertPosition,
    ) -> AnchorRecord {
        let Some(path) = locate(&self.config.anchors, target_id) else {
            return self.add_anchor(new);
        };
        let top_level = path.len() == 1;
        let target_index = path[path.len() - 1];
        let group_added = self.ensure_group(&new.group);

        let Some(list) = container_mut(&mut self.config.anchors, &path) else {
            return self.add_anchor(new);
        };
        let pid = list[target_index].pid.clone();
        let at = match position {
            InsertPosition::Before => target_index,
            InsertPosition::After => target_index + 1,
        };
        let mut record = AnchorRecord::from_new(new, 0, pid);
        list.insert(at, record.clone());
        renumber(list, top_level);
        record.sort = list[at].sort;

        if group_added {
            self.changed(AnchorEvent::GroupsChanged);
        }
        self.changed(AnchorEvent::AnchorsChanged);
        record
    }

    /// Swap an anchor with its neighbouring sibling. No-op at either end.
    pub fn move_anchor(&mut self, id: &str, direction: Direction) -> bool {
        let Some(path) = locate(&self.config.anchors, id) else {
            return false;
        };
        let top_level = path.len() == 1;
        let index = path[path.len() - 1];
        let Some(list) = container_mut(&mut self.config.anchors, &path) else {
            return false;
        };
        let Some(other) = sibling_index(list, index, top_level, direction) else {
            return false;
        };
        list.swap(index, other);
        renumber(list, top_level);
        self.changed(AnchorEvent::AnchorsChanged);
        true
    }

    /// Remove an anchor (and its subtree) from wherever it is nested.
    pub fn remove_anchor(&mut self, id: &str) -> Option<AnchorRecord> {
        let path = locate(&self.config.anchors, id)?;
        let top_level = path.len() == 1;
        let index = path[path.len() - 1];
        let list = container_mut(&mut self.config.anchors, &path)?;
        let removed = list.remove(index);
        renumber(list, top_level);
        self.changed(AnchorEvent::AnchorsChanged);
        Some(removed)
    }

    /// Apply the fields of `patch` that differ from the stored record.
    ///
    /// A new non-empty description is also written into the `group` of
    /// every descendant.
    pub fn update_anchor(&mut self, id: &str, patch: AnchorPatch) -> bool {
        let Some(path) = locate(&self.config.anchors, id) else {
            return false;
        };
        let Some(record) = record_mut(&mut self.config.anchors, &path) else {
            return false;
        };

        let mut touched = false;
        let mut cascaded = None;
        if let Some(line) = patch.line.filter(|l| *l != record.line) {
            record.line = line.max(1);
            touched = true;
        }
        if let Some(content) = patch.content {
            let content = content.trim().to_string();
            if content != record.content {
                record.content = content;
                touched = true;
            }
        }
        if let Some(description) = patch.description {
            let description = Some(description).filter(|d| !d.is_empty());
            if description != record.description {
                if let Some(label) = description.as_ref().filter(|_| !record.items.is_empty()) {
                    cascade_group(&mut record.items, label);
                    cascaded = Some(label.clone());
                }
                record.description = description;
                touched = true;
            }
        }

        if cascaded.is_some_and(|label| self.ensure_group(&label)) {
            self.changed(AnchorEvent::GroupsChanged);
        }
        if touched {
            self.changed(AnchorEvent::AnchorsChanged);
        }
        touched
    }

    pub fn add_group(&mut self, name: &str) -> bool {
        let added = self.ensure_group(name.trim());
        if added {
            self.changed(AnchorEvent::GroupsChanged);
        }
        added
    }

    /// Drop a group name. Member anchors are left alone; see
    /// [`AnchorStore::remove_group_with_anchors`].
    pub fn remove_group(&mut self, name: &str) -> bool {
        let before = self.config.groups.len();
        self.config.groups.retain(|g| g != name);
        let removed = self.config.groups.len() != before;
        if removed {
            self.changed(AnchorEvent::GroupsChanged);
        }
        removed
    }

    /// Drop a group name together with every top-level anchor in it.
    pub fn remove_group_with_anchors(&mut self, name: &str) -> usize {
        let before = self.config.anchors.len();
        self.config.anchors.retain(|a| a.group != name);
        let removed = before - self.config.anchors.len();
        self.remove_group(name);
        if removed > 0 {
            self.changed(AnchorEvent::AnchorsChanged);
        }
        removed
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every anchor regardless of depth, optionally filtered by file.
    pub fn anchors(&self, file_path: Option<&str>) -> Vec<AnchorRecord> {
        match file_path {
            None => self.flat.clone(),
            Some(path) => {
                let path = normalize_path(path);
                self.flat
                    .iter()
                    .filter(|a| a.file_path == path)
                    .cloned()
                    .collect()
            }
        }
    }

    pub fn groups(&self) -> &[String] {
        &self.config.groups
    }

    /// Distinct files that have at least one anchor.
    pub fn anchor_files(&self) -> BTreeSet<String> {
        self.flat.iter().map(|a| a.file_path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    /// Look an anchor up through the flattened index.
    ///
    /// A miss rebuilds the cache once before giving up.
    pub fn anchor_by_id(&mut self, id: &str) -> Option<AnchorRecord> {
        if let Some(record) = self.cached(id) {
            return Some(record);
        }
        self.rebuild_cache();
        self.cached(id)
    }

    fn cached(&self, id: &str) -> Option<AnchorRecord> {
        let &i = self.index.get(id)?;
        self.flat.get(i).filter(|a| a.id == id).cloned()
    }

    /// The previous/next anchor in flattened order within the same group.
    pub fn neighbor_anchor(&mut self, id: &str, neighbor: Neighbor) -> Option<AnchorRecord> {
        let current = self.anchor_by_id(id)?;
        let same_group: Vec<&AnchorRecord> = self
            .flat
            .iter()
            .filter(|a| a.group == current.group)
            .collect();
        let pos = same_group.iter().position(|a| a.id == id)?;
        let target = match neighbor {
            Neighbor::Prev => pos.checked_sub(1)?,
            Neighbor::Next => pos + 1,
        };
        same_group.get(target).map(|a| (*a).clone())
    }
}
