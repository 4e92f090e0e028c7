//! Position reconciliation of anchors against edited document text.
//!
//! This is a heuristic, not a diff. For every anchor in the saved file:
//!
//! 1. the stored line still holds the fingerprint: nothing to do;
//! 2. otherwise the first line (top to bottom) whose trimmed text equals the
//!    fingerprint wins and the anchor moves there;
//! 3. otherwise the content itself changed: the line is kept (clamped to the
//!    document) and the fingerprint is refreshed from it.
//!
//! Duplicate lines are not disambiguated; the first occurrence wins.

use crate::anchor::{AnchorPatch, normalize_path};
use crate::store::AnchorStore;

/// Read access to the text of one document.
pub trait TextSource {
    fn line_count(&self) -> usize;

    /// Text of the 0-based line `index`, without its line terminator.
    fn line_text(&self, index: usize) -> Option<&str>;

    /// The whole document.
    fn text(&self) -> &str;
}

/// A document snapshot held in memory.
#[derive(Debug, Clone)]
pub struct DocumentText {
    text: String,
    lines: Vec<String>,
}

impl DocumentText {
    pub fn new(text: &str) -> Self {
        let lines = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        Self {
            text: text.to_string(),
            lines,
        }
    }
}

impl TextSource for DocumentText {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    fn text(&self) -> &str {
        &self.text
    }
}

/// One anchor that reconciliation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub id: String,
    pub old_line: u32,
    pub new_line: u32,
    /// The fingerprint was refreshed because no line matched it anymore.
    pub content_changed: bool,
}

/// Re-align every anchor of `file_path` with the current `doc` text.
pub fn reconcile(store: &mut AnchorStore, file_path: &str, doc: &dyn TextSource) -> Vec<Reconciled> {
    let line_count = doc.line_count();
    if line_count == 0 {
        return Vec::new();
    }
    let path = normalize_path(file_path);
    let trimmed = |i: usize| doc.line_text(i).map(str::trim);

    let mut changes = Vec::new();
    for anchor in store.anchors(Some(&path)) {
        let current = anchor.line.max(1) as usize - 1;
        if trimmed(current) == Some(anchor.content.as_str()) {
            continue;
        }

        let relocated = (0..line_count).find(|&i| trimmed(i) == Some(anchor.content.as_str()));
        let (patch, change) = match relocated {
            Some(found) => {
                let new_line = found as u32 + 1;
                (
                    AnchorPatch {
                        line: Some(new_line),
                        ..Default::default()
                    },
                    Reconciled {
                        id: anchor.id.clone(),
                        old_line: anchor.line,
                        new_line,
                        content_changed: false,
                    },
                )
            }
            None => {
                let clamped = current.min(line_count - 1);
                let new_line = clamped as u32 + 1;
                let content = trimmed(clamped).unwrap_or_default().to_string();
                (
                    AnchorPatch {
                        line: Some(new_line),
                        content: Some(content),
                        ..Default::default()
                    },
                    Reconciled {
                        id: anchor.id.clone(),
                        old_line: anchor.line,
                        new_line,
                        content_changed: true,
                    },
                )
            }
        };

        if store.update_anchor(&anchor.id, patch) {
            changes.push(change);
        }
    }
    changes
}
