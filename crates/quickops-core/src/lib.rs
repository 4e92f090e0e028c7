//! quickops-core - Core library for the quickops bookmark-and-mock engine
//!
//! This crate provides the pieces of quickops that do not need a runtime:
//! - The anchor (bookmark) hierarchy with its ordering and grouping rules
//! - Position reconciliation of anchors against edited document text
//! - Mock rule matching and response-source resolution for the proxy router
//! - A Mock.js-style template expander for generating fake response data
//!
//! Everything here is synchronous and free of I/O. Persistence, HTTP and file
//! watching live in the `quickops` crate.
//!
//! # Anchors
//!
//! Anchors are organized into named groups and may nest. Every sibling list
//! keeps a contiguous 1-based `sort` field:
//!
//! ```
//! use quickops_core::{AnchorStore, Direction, NewAnchor};
//!
//! let mut store = AnchorStore::new();
//! let first = store.add_anchor(NewAnchor::new("src/main.rs", 3, "fn main() {"));
//! let second = store.add_anchor(NewAnchor::new("src/main.rs", 9, "run()?;"));
//! assert_eq!((first.sort, second.sort), (1, 2));
//!
//! store.move_anchor(&second.id, Direction::Up);
//! let order: Vec<_> = store.anchors(None).into_iter().map(|a| a.id).collect();
//! assert_eq!(order, vec![second.id.clone(), first.id.clone()]);
//! ```
//!
//! # Reconciliation
//!
//! After a save, [`reconcile`] moves anchors to wherever their content went:
//!
//! ```
//! use quickops_core::{AnchorStore, DocumentText, NewAnchor, reconcile};
//!
//! let mut store = AnchorStore::new();
//! let anchor = store.add_anchor(NewAnchor::new("lib.rs", 1, "pub fn answer() {}"));
//!
//! let doc = DocumentText::new("// header\n\npub fn answer() {}\n");
//! let moved = reconcile(&mut store, "lib.rs", &doc);
//! assert_eq!(moved.len(), 1);
//! assert_eq!(store.anchor_by_id(&anchor.id).unwrap().line, 3);
//! ```
//!
//! # Mock rules
//!
//! ```
//! use quickops_core::{MockRule, find_rule};
//!
//! let rules = vec![MockRule::new("r1", "dev", "GET", "/api/user")];
//! let hit = find_rule(&rules, "dev", "get", "/api/user?id=1");
//! assert_eq!(hit.map(|r| r.id.as_str()), Some("r1"));
//! ```

mod anchor;
mod mock;
mod reconcile;
mod store;
mod template;

pub use anchor::{
    AnchorConfig, AnchorPatch, AnchorRecord, BOOTSTRAP_GROUPS, DEFAULT_GROUP, Direction,
    InsertPosition, Neighbor, NewAnchor, normalize_path,
};
pub use mock::{
    FileDisposition, MockMode, MockRule, ProxyConfig, ResponseSource, Settings, find_rule,
    inline_json, normalize_request_path, normalize_target,
};
pub use reconcile::{DocumentText, Reconciled, TextSource, reconcile};
pub use store::{AnchorEvent, AnchorStore, SubscriptionId};
pub use template::{MockGenerator, TemplateGenerator};
