//! Espalier - revision-tracked hierarchical page store
//!
//! Pages live in a per-site tree of slugs, every page is backed by a
//! document, and every edit appends an immutable revision behind the
//! document's current pointer. Permission evaluation, path resolution, and
//! notification fan-out sit on top of one SQLite store.
//!
//! # Pieces
//!
//! | Piece | Purpose |
//! |-------|---------|
//! | `Store` | Pooled SQLite handle; every operation hangs off it |
//! | `Document` | Permission-bearing entity owning a revision chain |
//! | `Revision` | One immutable content snapshot |
//! | `TreeNode` | Named position in a site's path hierarchy |
//! | `ObjectBinding` | Generic document-to-target association |
//! | `ResolvedPath` | A resolved node plus the ancestors walked to reach it |
//!
//! # Quick Start
//!
//! ```no_run
//! use espalier::{RevisionInput, Store};
//!
//! let store = Store::new("espalier.db").unwrap();
//! let site = store.ensure_site("default").unwrap();
//!
//! // Every site needs exactly one root
//! let root = store.ensure_root(site.id, RevisionInput::new("Home", "Welcome!")).unwrap();
//!
//! // Pages hang off the root by slug
//! store.create_page(root.id, "guides", Default::default(),
//!     RevisionInput::new("Guides", "All the guides")).unwrap();
//!
//! // Paths resolve back to nodes
//! let resolved = store.resolve(site.id, "/guides/").unwrap();
//! println!("found node {} at '{}'", resolved.node.id, resolved.path_string());
//! ```

pub mod binding;
pub mod config;
pub mod db;
pub mod document;
pub mod notify;
pub mod path;
pub mod policy;
pub mod revision;
pub mod sanitize;
pub mod schema;

pub use binding::{BindingTarget, TargetKind};
pub use config::Settings;
pub use db::{
    Document, ObjectBinding, PageStoreSchema, Result, Revision, Site, Store, StoreError,
    TreeNode, CURRENT_SCHEMA,
};
pub use document::DocumentInput;
pub use notify::{ChangeEvent, ChangeKind, Notifier, NullNotifier};
pub use path::{normalize, ResolvedPath};
pub use policy::{Actor, DefaultPolicy, PermissionPolicy};
pub use revision::RevisionInput;
pub use sanitize::Sanitizer;
