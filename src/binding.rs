//! Object bindings: generic document-to-target associations
//!
//! A binding ties a document to exactly one external target, identified by a
//! kind tag plus an id. Tree nodes are the common target; attachments show
//! the layer is not tree-specific. Saving a binding whose target is a tree
//! node synchronously copies the document id onto the node's denormalized
//! pointer - that reconciliation is the only writer of the pointer and runs
//! inside the same transaction as the binding itself.

use crate::db::{
    last_insert_rowid, load_document, now, Document, NewObjectBinding, ObjectBinding, Result,
    Store, StoreError,
};
use crate::schema::{object_bindings, tree_nodes};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Closed set of bindable target kinds. Each kind declares statically
/// whether it participates in the tree-hierarchy protocol and whether
/// permission propagation descends into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    TreeNode,
    Attachment,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::TreeNode => "tree_node",
            TargetKind::Attachment => "attachment",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "tree_node" => Some(TargetKind::TreeNode),
            "attachment" => Some(TargetKind::Attachment),
            _ => None,
        }
    }

    /// Tree-hierarchy targets get the denormalized pointer reconciliation
    /// and participate in subtree traversal
    pub fn is_hierarchical(self) -> bool {
        matches!(self, TargetKind::TreeNode)
    }

    /// Whether recursive permission/owner/group propagation descends into
    /// targets of this kind
    pub fn inherits_permissions(self) -> bool {
        matches!(self, TargetKind::TreeNode)
    }
}

/// One bound external entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTarget {
    pub kind: TargetKind,
    pub id: i32,
}

impl BindingTarget {
    pub fn tree_node(id: i32) -> Self {
        Self {
            kind: TargetKind::TreeNode,
            id,
        }
    }

    pub fn attachment(id: i32) -> Self {
        Self {
            kind: TargetKind::Attachment,
            id,
        }
    }
}

impl ObjectBinding {
    /// Decode the stored kind tag
    pub fn kind(&self) -> Result<TargetKind> {
        TargetKind::parse(&self.target_kind).ok_or_else(|| {
            StoreError::Validation(format!("unknown binding target kind '{}'", self.target_kind))
        })
    }
}

impl Store {
    /// Bind a document to a target, get-or-create on the (kind, id) pair.
    /// A target is bound to exactly one document; rebinding to a different
    /// document is a validation error.
    pub fn add_object_binding(
        &self,
        document_id: i32,
        target: BindingTarget,
    ) -> Result<ObjectBinding> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction::<_, StoreError, _>(|conn| {
            add_binding_in(conn, document_id, target)
        })
    }

    /// Reverse lookup: the document bound to a target
    pub fn document_for_target(&self, target: BindingTarget) -> Result<Document> {
        let mut conn = self.get_conn()?;
        let binding = object_bindings::table
            .filter(object_bindings::target_kind.eq(target.kind.as_str()))
            .filter(object_bindings::target_id.eq(target.id))
            .first::<ObjectBinding>(&mut conn)
            .optional()?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "no binding for {} {}",
                    target.kind.as_str(),
                    target.id
                ))
            })?;
        load_document(&mut conn, binding.document_id)
    }

    /// All bindings owned by a document
    pub fn bindings_for_document(&self, document_id: i32) -> Result<Vec<ObjectBinding>> {
        let mut conn = self.get_conn()?;
        bindings_for_document_in(&mut conn, document_id)
    }
}

pub(crate) fn bindings_for_document_in(
    conn: &mut SqliteConnection,
    document_id: i32,
) -> Result<Vec<ObjectBinding>> {
    Ok(object_bindings::table
        .filter(object_bindings::document_id.eq(document_id))
        .load::<ObjectBinding>(conn)?)
}

/// In-transaction binding get-or-create plus reconciliation
pub(crate) fn add_binding_in(
    conn: &mut SqliteConnection,
    document_id: i32,
    target: BindingTarget,
) -> Result<ObjectBinding> {
    load_document(conn, document_id)?;

    if let Some(existing) = object_bindings::table
        .filter(object_bindings::target_kind.eq(target.kind.as_str()))
        .filter(object_bindings::target_id.eq(target.id))
        .first::<ObjectBinding>(conn)
        .optional()?
    {
        if existing.document_id != document_id {
            return Err(StoreError::Validation(format!(
                "{} {} is already bound to document {}",
                target.kind.as_str(),
                target.id,
                existing.document_id
            )));
        }
        reconcile_in(conn, &existing)?;
        return Ok(existing);
    }

    let created = now();
    let new_binding = NewObjectBinding {
        document_id,
        target_kind: target.kind.as_str(),
        target_id: target.id,
        is_hierarchical: target.kind.is_hierarchical(),
        created_at: &created,
    };
    diesel::insert_into(object_bindings::table)
        .values(&new_binding)
        .execute(conn)?;
    let binding_id = last_insert_rowid(conn)?;
    let binding = object_bindings::table
        .filter(object_bindings::id.eq(binding_id))
        .first::<ObjectBinding>(conn)?;

    reconcile_in(conn, &binding)?;
    Ok(binding)
}

/// Copy the binding's document id onto a tree-node target's denormalized
/// pointer. Runs with every binding save so no reader can observe a binding
/// without the matching pointer.
fn reconcile_in(conn: &mut SqliteConnection, binding: &ObjectBinding) -> Result<()> {
    if !binding.is_hierarchical {
        return Ok(());
    }
    diesel::update(tree_nodes::table.filter(tree_nodes::id.eq(binding.target_id)))
        .set(tree_nodes::document_id.eq(binding.document_id))
        .execute(conn)?;
    tracing::debug!(
        node_id = binding.target_id,
        document_id = binding.document_id,
        "reconciled tree-node document pointer"
    );
    Ok(())
}
