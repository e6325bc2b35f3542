//! Document lifecycle and authorization
//!
//! A document is created as an empty shell and immediately given its first
//! revision; from then on `current_revision_id` never goes back to null.
//! Deleting a document is an explicit cascade over its revisions, bindings,
//! and bound tree nodes inside one transaction.

use crate::binding::bindings_for_document_in;
use crate::db::{
    last_insert_rowid, load_current_revision, load_document, load_node, now, Document,
    NewDocument, Result, Revision, Store, StoreError,
};
use crate::notify::{ChangeEvent, ChangeKind};
use crate::path::subtree_in;
use crate::policy::{evaluate_read, evaluate_write, Actor};
use crate::revision::{add_revision_in, RevisionInput};
use crate::schema::{documents, object_bindings, revisions, tree_nodes};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Fields for a document about to be created
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub owner_id: Option<i32>,
    pub group_id: Option<i32>,
    pub group_read: bool,
    pub group_write: bool,
    pub other_read: bool,
    pub other_write: bool,
}

impl Default for DocumentInput {
    fn default() -> Self {
        Self {
            owner_id: None,
            group_id: None,
            group_read: true,
            group_write: true,
            other_read: true,
            other_write: true,
        }
    }
}

impl DocumentInput {
    pub fn owned_by(user_id: i32) -> Self {
        Self {
            owner_id: Some(user_id),
            ..Self::default()
        }
    }
}

impl Store {
    /// Create an empty document shell. Callers normally follow up with
    /// `add_revision` immediately; `create_document_with_revision` does both
    /// in one transaction.
    pub fn create_document(&self, input: DocumentInput) -> Result<Document> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction::<_, StoreError, _>(|conn| create_document_in(conn, &input))
    }

    /// Shell plus first revision in one transaction. The revision save
    /// back-fills the current pointer, completing the two-phase lifecycle.
    pub fn create_document_with_revision(
        &self,
        input: DocumentInput,
        revision: RevisionInput,
    ) -> Result<(Document, Revision)> {
        let mut conn = self.get_conn()?;
        let (document, revision) = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let shell = create_document_in(conn, &input)?;
            let revision = add_revision_in(conn, self.sanitizer(), shell.id, &revision)?;
            let document = load_document(conn, shell.id)?;
            Ok((document, revision))
        })?;
        self.notify(&ChangeEvent {
            document_id: document.id,
            kind: ChangeKind::Created,
            title: revision.title.clone(),
        });
        Ok((document, revision))
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    pub fn can_read(&self, document_id: i32, actor: &Actor) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let document = load_document(&mut conn, document_id)?;
        let current = load_current_revision(&mut conn, &document)?;
        Ok(evaluate_read(
            &document,
            current.as_ref(),
            actor,
            self.settings(),
            self.policy(),
        ))
    }

    pub fn can_write(&self, document_id: i32, actor: &Actor) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let document = load_document(&mut conn, document_id)?;
        Ok(evaluate_write(
            &document,
            actor,
            self.settings(),
            self.policy(),
        ))
    }

    pub fn can_delete(&self, document_id: i32, actor: &Actor) -> Result<bool> {
        let document = self.get_document(document_id)?;
        Ok(self.policy().can_delete(&document, actor))
    }

    pub fn can_moderate(&self, document_id: i32, actor: &Actor) -> Result<bool> {
        let document = self.get_document(document_id)?;
        Ok(self.policy().can_moderate(&document, actor))
    }

    pub fn can_assign(&self, document_id: i32, actor: &Actor) -> Result<bool> {
        let document = self.get_document(document_id)?;
        Ok(self.policy().can_assign(&document, actor))
    }

    // ========================================================================
    // Recursive propagation
    // ========================================================================

    /// Documents bound to every descendant of this document's hierarchical
    /// binding targets - the full subtree, not just direct children.
    ///
    /// NB! This traversal is expensive: at least one query per tree level
    /// plus one per descendant. Use it with care.
    pub fn descendant_documents(&self, document_id: i32) -> Result<Vec<Document>> {
        let mut conn = self.get_conn()?;
        let mut result = Vec::new();
        for binding in bindings_for_document_in(&mut conn, document_id)? {
            if !binding.is_hierarchical {
                continue;
            }
            let node = load_node(&mut conn, binding.target_id)?;
            for (descendant, _) in subtree_in(&mut conn, &node, false)? {
                if let Some(doc_id) = descendant.document_id {
                    result.push(load_document(&mut conn, doc_id)?);
                }
            }
        }
        Ok(result)
    }

    /// Copy this document's four permission flags onto every inheriting
    /// descendant document. Returns the number of documents updated.
    ///
    /// NB! Expensive - see `descendant_documents`.
    pub fn set_permissions_recursive(&self, document_id: i32) -> Result<usize> {
        self.propagate_recursive(document_id, |conn, source, descendant_id| {
            diesel::update(documents::table.filter(documents::id.eq(descendant_id)))
                .set((
                    documents::group_read.eq(source.group_read),
                    documents::group_write.eq(source.group_write),
                    documents::other_read.eq(source.other_read),
                    documents::other_write.eq(source.other_write),
                    documents::modified_at.eq(now()),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Copy this document's group onto every inheriting descendant document.
    ///
    /// NB! Expensive - see `descendant_documents`.
    pub fn set_group_recursive(&self, document_id: i32) -> Result<usize> {
        self.propagate_recursive(document_id, |conn, source, descendant_id| {
            diesel::update(documents::table.filter(documents::id.eq(descendant_id)))
                .set((
                    documents::group_id.eq(source.group_id),
                    documents::modified_at.eq(now()),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Copy this document's owner onto every inheriting descendant document.
    ///
    /// NB! Expensive - see `descendant_documents`.
    pub fn set_owner_recursive(&self, document_id: i32) -> Result<usize> {
        self.propagate_recursive(document_id, |conn, source, descendant_id| {
            diesel::update(documents::table.filter(documents::id.eq(descendant_id)))
                .set((
                    documents::owner_id.eq(source.owner_id),
                    documents::modified_at.eq(now()),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    fn propagate_recursive<F>(&self, document_id: i32, apply: F) -> Result<usize>
    where
        F: Fn(&mut SqliteConnection, &Document, i32) -> Result<()>,
    {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let source = load_document(conn, document_id)?;
            let mut updated = 0;
            for binding in bindings_for_document_in(conn, document_id)? {
                if !binding.is_hierarchical {
                    continue;
                }
                let node = load_node(conn, binding.target_id)?;
                for (descendant, _) in subtree_in(conn, &node, false)? {
                    // Inheritance opt-in is a capability of the descendant's
                    // own binding kind
                    let Some(descendant_binding) = node_binding_in(conn, descendant.id)? else {
                        continue;
                    };
                    if !descendant_binding.kind()?.inherits_permissions() {
                        continue;
                    }
                    let Some(descendant_doc_id) = descendant.document_id else {
                        continue;
                    };
                    apply(conn, &source, descendant_doc_id)?;
                    updated += 1;
                }
            }
            tracing::debug!(document_id, updated, "recursive propagation complete");
            Ok(updated)
        })
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Hard-delete a document with its revision chain, bindings, and bound
    /// tree nodes, all in one transaction
    pub fn delete_document(&self, document_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        let title = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let document = load_document(conn, document_id)?;
            let current = load_current_revision(conn, &document)?;
            delete_document_in(conn, document_id)?;
            Ok(current.map(|r| r.title).unwrap_or_default())
        })?;
        self.notify(&ChangeEvent {
            document_id,
            kind: ChangeKind::Deleted,
            title,
        });
        Ok(())
    }
}

pub(crate) fn create_document_in(
    conn: &mut SqliteConnection,
    input: &DocumentInput,
) -> Result<Document> {
    let stamp = now();
    let new_document = NewDocument {
        current_revision_id: None,
        owner_id: input.owner_id,
        group_id: input.group_id,
        group_read: input.group_read,
        group_write: input.group_write,
        other_read: input.other_read,
        other_write: input.other_write,
        created_at: &stamp,
        modified_at: &stamp,
    };
    diesel::insert_into(documents::table)
        .values(&new_document)
        .execute(conn)?;
    let id = last_insert_rowid(conn)?;
    load_document(conn, id)
}

/// Explicit delete cascade. SQLite does not enforce the declared foreign
/// keys unless the pragma is enabled per connection, so the cascade is
/// spelled out: tree nodes bound through hierarchical bindings, then the
/// bindings, the revision chain, and finally the document row.
pub(crate) fn delete_document_in(conn: &mut SqliteConnection, document_id: i32) -> Result<()> {
    load_document(conn, document_id)?;

    for binding in bindings_for_document_in(conn, document_id)? {
        if binding.is_hierarchical {
            diesel::delete(tree_nodes::table.filter(tree_nodes::id.eq(binding.target_id)))
                .execute(conn)?;
        }
    }
    diesel::delete(
        object_bindings::table.filter(object_bindings::document_id.eq(document_id)),
    )
    .execute(conn)?;
    diesel::delete(revisions::table.filter(revisions::document_id.eq(document_id)))
        .execute(conn)?;
    diesel::delete(documents::table.filter(documents::id.eq(document_id))).execute(conn)?;
    Ok(())
}

/// The tree-node binding for a node, if the node is bound at all
fn node_binding_in(
    conn: &mut SqliteConnection,
    node_id: i32,
) -> Result<Option<crate::db::ObjectBinding>> {
    Ok(object_bindings::table
        .filter(object_bindings::target_kind.eq("tree_node"))
        .filter(object_bindings::target_id.eq(node_id))
        .first::<crate::db::ObjectBinding>(conn)
        .optional()?)
}
