//! Per-site path tree
//!
//! Strategy: very few fields live on a tree node - content belongs to the
//! bound document's revision chain, so resolution stays slim. Paths are
//! slash-delimited slugs walked from the site root; the ancestors collected
//! during the walk ride along on the returned `ResolvedPath` so the path
//! string can be rebuilt without touching the database again. The ancestor
//! list is scoped to that one result value and never cached anywhere shared.

use crate::binding::{add_binding_in, BindingTarget};
use crate::db::{
    last_insert_rowid, load_current_revision, load_document, load_node, node_children, now,
    site_roots, NewTreeNode, Result, Store, StoreError, TreeNode,
};
use crate::document::{create_document_in, delete_document_in, DocumentInput};
use crate::notify::{ChangeEvent, ChangeKind};
use crate::revision::{add_revision_in, RevisionInput};
use crate::sanitize::Sanitizer;
use crate::schema::{sites, tree_nodes};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use regex::Regex;

lazy_static::lazy_static! {
    /// Slug charset: letters, digits, hyphen, underscore
    static ref SLUG_RE: Regex = Regex::new("^[A-Za-z0-9_-]+$").expect("slug pattern compiles");
}

/// Trim leading and trailing separators. The empty result addresses the root.
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// A resolved node together with the ancestors collected on the way down.
/// Operation-scoped: build it, use it, drop it.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub node: TreeNode,
    /// Root-first chain above the node; empty when the node is the root
    pub ancestors: Vec<TreeNode>,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.node.parent_id.is_none()
    }

    /// Slash-joined slugs of the non-root ancestors plus the node's own
    /// slug, trailing separator included. The root's path string is empty.
    pub fn path_string(&self) -> String {
        if self.is_root() {
            return String::new();
        }
        let mut slugs: Vec<&str> = self
            .ancestors
            .iter()
            .filter(|a| a.parent_id.is_some())
            .filter_map(|a| a.slug.as_deref())
            .collect();
        if let Some(slug) = self.node.slug.as_deref() {
            slugs.push(slug);
        }
        format!("{}/", slugs.join("/"))
    }
}

impl Store {
    /// The site's root node. Zero roots or several are configuration
    /// integrity failures, not lookup misses.
    pub fn root(&self, site_id: i32) -> Result<TreeNode> {
        let mut conn = self.get_conn()?;
        root_in(&mut conn, site_id)
    }

    /// Resolve a slash-delimited path to a node. Accepts paths with or
    /// without leading and trailing separators.
    pub fn resolve(&self, site_id: i32, path: &str) -> Result<ResolvedPath> {
        let mut conn = self.get_conn()?;
        resolve_in(
            &mut conn,
            site_id,
            path,
            self.settings().urls.case_sensitive,
        )
    }

    /// Create the site's root node with a fresh document and first
    /// revision. Fails with a validation error when a root already exists.
    pub fn create_root(&self, site_id: i32, revision: RevisionInput) -> Result<TreeNode> {
        let mut conn = self.get_conn()?;
        let node = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            create_tree_page_in(
                conn,
                self.sanitizer(),
                site_id,
                None,
                None,
                &DocumentInput::default(),
                &revision,
                self.settings().urls.case_sensitive,
            )
        })?;
        self.notify_node_created(&node, &revision.title);
        Ok(node)
    }

    /// Root get-or-create: returns the existing root untouched when the
    /// site already has one.
    pub fn ensure_root(&self, site_id: i32, revision: RevisionInput) -> Result<TreeNode> {
        let mut conn = self.get_conn()?;
        let (node, created) = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let mut roots = site_roots(conn, site_id)?;
            if !roots.is_empty() {
                return Ok((roots.remove(0), false));
            }
            let node = create_tree_page_in(
                conn,
                self.sanitizer(),
                site_id,
                None,
                None,
                &DocumentInput::default(),
                &revision,
                self.settings().urls.case_sensitive,
            )?;
            Ok((node, true))
        })?;
        if created {
            self.notify_node_created(&node, &revision.title);
        }
        Ok(node)
    }

    /// Create a page under an existing parent node: document, first
    /// revision, tree node, and binding in one transaction.
    pub fn create_page(
        &self,
        parent_id: i32,
        slug: &str,
        input: DocumentInput,
        revision: RevisionInput,
    ) -> Result<TreeNode> {
        let mut conn = self.get_conn()?;
        let node = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let parent = load_node(conn, parent_id)?;
            create_tree_page_in(
                conn,
                self.sanitizer(),
                parent.site_id,
                Some(&parent),
                Some(slug),
                &input,
                &revision,
                self.settings().urls.case_sensitive,
            )
        })?;
        self.notify_node_created(&node, &revision.title);
        Ok(node)
    }

    /// Full subtree of a node in pre-order, paired with depth below the node
    pub fn descendants(&self, node_id: i32) -> Result<Vec<(TreeNode, u32)>> {
        let mut conn = self.get_conn()?;
        let node = load_node(&mut conn, node_id)?;
        subtree_in(&mut conn, &node, false)
    }

    /// Delete a single childless node along with its bound document.
    /// Refused before any mutation when children exist.
    pub fn delete_node(&self, node_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let node = load_node(conn, node_id)?;
            if !node_children(conn, node_id)?.is_empty() {
                return Err(StoreError::Precondition(format!(
                    "tree node {} still has children; use delete_subtree",
                    node_id
                )));
            }
            match node.document_id {
                Some(document_id) => delete_document_in(conn, document_id),
                None => {
                    // Unbound node: nothing cascades, drop the row
                    diesel::delete(tree_nodes::table.filter(tree_nodes::id.eq(node_id)))
                        .execute(conn)?;
                    Ok(())
                }
            }
        })
    }

    /// Purge a node, every descendant, and ALL of their documents and
    /// revisions. This cannot be undone. Runs in one transaction: a failure
    /// anywhere rolls the whole subtree back.
    pub fn delete_subtree(&self, node_id: i32) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let result = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let node = load_node(conn, node_id)?;
            let root_event = match node.document_id {
                Some(document_id) => {
                    let document = load_document(conn, document_id)?;
                    load_current_revision(conn, &document)?
                        .map(|r| (document_id, r.title))
                }
                None => None,
            };

            let mut targets = subtree_in(conn, &node, true)?;
            // Deepest first so children are gone before their parents
            targets.sort_by(|a, b| b.1.cmp(&a.1));

            let mut deleted = 0;
            for (descendant, _) in targets {
                let document_id = descendant.document_id.ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "tree node {} has no bound document",
                        descendant.id
                    ))
                })?;
                delete_document_in(conn, document_id)?;
                deleted += 1;
            }
            Ok((deleted, root_event))
        });

        match result {
            Ok((deleted, root_event)) => {
                tracing::info!(node_id, deleted, "deleted page subtree");
                if let Some((document_id, title)) = root_event {
                    self.notify(&ChangeEvent {
                        document_id,
                        kind: ChangeKind::Deleted,
                        title,
                    });
                }
                Ok(deleted)
            }
            Err(e) => {
                tracing::error!(node_id, error = %e, "subtree deletion failed; rolled back");
                Err(e)
            }
        }
    }

    /// First node on the root-to-node chain whose document's current
    /// revision is flagged deleted
    pub fn first_deleted_ancestor(&self, resolved: &ResolvedPath) -> Result<Option<TreeNode>> {
        let mut conn = self.get_conn()?;
        for node in resolved.ancestors.iter().chain(std::iter::once(&resolved.node)) {
            let Some(document_id) = node.document_id else {
                continue;
            };
            let document = load_document(&mut conn, document_id)?;
            if let Some(revision) = load_current_revision(&mut conn, &document)? {
                if revision.deleted {
                    return Ok(Some(node.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Whether the node or any ancestor is logically deleted
    pub fn is_deleted(&self, resolved: &ResolvedPath) -> Result<bool> {
        Ok(self.first_deleted_ancestor(resolved)?.is_some())
    }

    fn notify_node_created(&self, node: &TreeNode, title: &str) {
        if let Some(document_id) = node.document_id {
            self.notify(&ChangeEvent {
                document_id,
                kind: ChangeKind::Created,
                title: title.to_string(),
            });
        }
    }
}

pub(crate) fn root_in(conn: &mut SqliteConnection, site_id: i32) -> Result<TreeNode> {
    let mut roots = site_roots(conn, site_id)?;
    if roots.is_empty() {
        return Err(StoreError::NoRoot(format!(
            "you need to create a root page on site {}",
            site_id
        )));
    }
    if roots.len() > 1 {
        return Err(StoreError::MultipleRoots(format!(
            "site {} somehow has {} root nodes",
            site_id,
            roots.len()
        )));
    }
    Ok(roots.remove(0))
}

pub(crate) fn resolve_in(
    conn: &mut SqliteConnection,
    site_id: i32,
    path: &str,
    case_sensitive: bool,
) -> Result<ResolvedPath> {
    let trimmed = normalize(path);
    let root = root_in(conn, site_id)?;

    // Root page requested
    if trimmed.is_empty() {
        return Ok(ResolvedPath {
            node: root,
            ancestors: Vec::new(),
        });
    }

    let mut ancestors = Vec::new();
    let mut current = root;
    for segment in trimmed.split('/') {
        let children = node_children(conn, current.id)?;
        let mut matches: Vec<TreeNode> = children
            .into_iter()
            .filter(|child| slug_matches(child.slug.as_deref(), segment, case_sensitive))
            .collect();
        if matches.is_empty() {
            return Err(StoreError::NotFound(format!(
                "no page at '{}': segment '{}' does not exist",
                trimmed, segment
            )));
        }
        if matches.len() > 1 {
            // The uniqueness invariant should make this impossible
            return Err(StoreError::Ambiguous(format!(
                "segment '{}' matches {} sibling nodes",
                segment,
                matches.len()
            )));
        }
        ancestors.push(current);
        current = matches.remove(0);
    }

    Ok(ResolvedPath {
        node: current,
        ancestors,
    })
}

fn slug_matches(slug: Option<&str>, segment: &str, case_sensitive: bool) -> bool {
    match slug {
        Some(s) if case_sensitive => s == segment,
        Some(s) => s.to_lowercase() == segment.to_lowercase(),
        None => false,
    }
}

/// Node invariants, checked before anything persists: the root carries no
/// slug, every non-root carries a valid one, and a site gets exactly one
/// root.
fn validate_node_invariants(
    conn: &mut SqliteConnection,
    site_id: i32,
    parent_id: Option<i32>,
    slug: Option<&str>,
) -> Result<()> {
    match (parent_id, slug) {
        (None, Some(_)) => Err(StoreError::Validation(
            "a root node cannot carry a slug".to_string(),
        )),
        (Some(_), None) => Err(StoreError::Validation(
            "a non-root node must always have a slug".to_string(),
        )),
        (None, None) => {
            if site_roots(conn, site_id)?.is_empty() {
                Ok(())
            } else {
                Err(StoreError::Validation(format!(
                    "there is already a root node on site {}",
                    site_id
                )))
            }
        }
        (Some(_), Some(slug)) => {
            if SLUG_RE.is_match(slug) {
                Ok(())
            } else {
                Err(StoreError::Validation(format!(
                    "invalid slug '{}': use letters, digits, hyphen, underscore",
                    slug
                )))
            }
        }
    }
}

/// Shared creation path for roots and interior pages: validate, create the
/// document and its first revision, insert the node, bind, reconcile.
fn create_tree_page_in(
    conn: &mut SqliteConnection,
    sanitizer: &Sanitizer,
    site_id: i32,
    parent: Option<&TreeNode>,
    slug: Option<&str>,
    input: &DocumentInput,
    revision: &RevisionInput,
    case_sensitive: bool,
) -> Result<TreeNode> {
    // The site must exist before anything hangs off it
    sites::table
        .filter(sites::id.eq(site_id))
        .first::<crate::db::Site>(conn)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("site {}", site_id)))?;

    validate_node_invariants(conn, site_id, parent.map(|p| p.id), slug)?;

    if let (Some(parent), Some(slug)) = (parent, slug) {
        let children = node_children(conn, parent.id)?;
        if children
            .iter()
            .any(|child| slug_matches(child.slug.as_deref(), slug, case_sensitive))
        {
            return Err(StoreError::Validation(format!(
                "a page with slug '{}' already exists under node {}",
                slug, parent.id
            )));
        }
    }

    let document = create_document_in(conn, input)?;
    add_revision_in(conn, sanitizer, document.id, revision)?;

    let stamp = now();
    let new_node = NewTreeNode {
        site_id,
        parent_id: parent.map(|p| p.id),
        slug,
        document_id: None,
        created_at: &stamp,
    };
    diesel::insert_into(tree_nodes::table)
        .values(&new_node)
        .execute(conn)?;
    let node_id = last_insert_rowid(conn)?;

    // Binding reconciliation fills the node's denormalized document pointer
    add_binding_in(conn, document.id, BindingTarget::tree_node(node_id))?;
    load_node(conn, node_id)
}

/// Walk the subtree below a node in pre-order, pairing each descendant with
/// its depth. One children query per visited node.
pub(crate) fn subtree_in(
    conn: &mut SqliteConnection,
    node: &TreeNode,
    include_self: bool,
) -> Result<Vec<(TreeNode, u32)>> {
    let mut out = Vec::new();
    if include_self {
        out.push((node.clone(), 0));
    }
    collect_children(conn, node.id, 1, &mut out)?;
    Ok(out)
}

fn collect_children(
    conn: &mut SqliteConnection,
    parent_id: i32,
    depth: u32,
    out: &mut Vec<(TreeNode, u32)>,
) -> Result<()> {
    for child in node_children(conn, parent_id)? {
        let child_id = child.id;
        out.push((child, depth));
        collect_children(conn, child_id, depth + 1, out)?;
    }
    Ok(())
}
