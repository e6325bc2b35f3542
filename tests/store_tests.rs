//! Integration tests for the espalier page store
//!
//! These exercise the library end-to-end against temporary SQLite databases:
//! revision chains, path resolution, permission evaluation, binding
//! reconciliation, and the atomicity of subtree deletion.

use espalier::{
    Actor, BindingTarget, ChangeEvent, ChangeKind, DocumentInput, Notifier, RevisionInput,
    Settings, Store, StoreError,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn open_store() -> (TempDir, PathBuf, Store) {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("test.db");
    let store = Store::open_at(&db_path)
        .expect("open store")
        .with_settings(Settings::default());
    (dir, db_path, store)
}

/// Root plus one page, returning (root node, page node, page document id)
fn seed_page(
    store: &Store,
    site_id: i32,
    slug: &str,
) -> (espalier::TreeNode, espalier::TreeNode, i32) {
    let root = store
        .ensure_root(site_id, RevisionInput::new("Root", ""))
        .expect("root");
    let node = store
        .create_page(
            root.id,
            slug,
            DocumentInput::default(),
            RevisionInput::new("Page", "content"),
        )
        .expect("page");
    let document_id = node.document_id.expect("bound document");
    (root, node, document_id)
}

// =============================================================================
// Revision chain
// =============================================================================

#[test]
fn test_revision_numbers_are_gapless_and_current_is_max() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, _node, document_id) = seed_page(&store, site.id, "page");

    store
        .add_revision(document_id, RevisionInput::new("Page", "v1"))
        .unwrap();
    // Administrative path interleaved with the normal one
    store
        .save_revision(document_id, RevisionInput::new("Page", "v2"), None)
        .unwrap();
    store
        .add_revision(document_id, RevisionInput::new("Page", "v3"))
        .unwrap();

    let revisions = store.revisions(document_id).unwrap();
    let numbers: Vec<i32> = revisions.iter().map(|r| r.revision_number).collect();
    assert_eq!(numbers, vec![0, 1, 2, 3], "no gaps, no duplicates");

    let document = store.get_document(document_id).unwrap();
    let current = store.current_revision(document_id).unwrap().unwrap();
    assert_eq!(document.current_revision_id, Some(current.id));
    assert_eq!(
        current.revision_number,
        *numbers.iter().max().unwrap(),
        "current pointer sits on the highest sequence number"
    );
}

#[test]
fn test_first_revision_starts_at_zero_on_both_paths() {
    let (_dir, _db, store) = open_store();

    let doc_a = store.create_document(DocumentInput::default()).unwrap();
    let rev_a = store
        .add_revision(doc_a.id, RevisionInput::new("A", ""))
        .unwrap();
    assert_eq!(rev_a.revision_number, 0);

    let doc_b = store.create_document(DocumentInput::default()).unwrap();
    let rev_b = store
        .save_revision(doc_b.id, RevisionInput::new("B", ""), None)
        .unwrap();
    assert_eq!(rev_b.revision_number, 0);
}

#[test]
fn test_direct_save_promotes_itself_when_no_current_exists() {
    let (_dir, _db, store) = open_store();
    let document = store.create_document(DocumentInput::default()).unwrap();
    assert!(document.current_revision_id.is_none());

    let revision = store
        .save_revision(document.id, RevisionInput::new("T", "c"), None)
        .unwrap();

    let document = store.get_document(document.id).unwrap();
    assert_eq!(document.current_revision_id, Some(revision.id));
}

#[test]
fn test_direct_save_does_not_steal_the_current_pointer() {
    let (_dir, _db, store) = open_store();
    let document = store.create_document(DocumentInput::default()).unwrap();
    let first = store
        .add_revision(document.id, RevisionInput::new("T", "v0"))
        .unwrap();

    store
        .save_revision(document.id, RevisionInput::new("T", "admin import"), None)
        .unwrap();

    let document = store.get_document(document.id).unwrap();
    assert_eq!(document.current_revision_id, Some(first.id));
}

#[test]
fn test_explicit_sequence_number_keeps_both_paths_consistent() {
    let (_dir, _db, store) = open_store();
    let document = store.create_document(DocumentInput::default()).unwrap();
    store
        .save_revision(document.id, RevisionInput::new("T", ""), Some(10))
        .unwrap();

    let next = store
        .add_revision(document.id, RevisionInput::new("T", ""))
        .unwrap();
    assert_eq!(next.revision_number, 11);
}

#[test]
fn test_previous_revision_links_stay_within_the_document() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (root, _node_a, doc_a) = seed_page(&store, site.id, "a");
    let node_b = store
        .create_page(
            root.id,
            "b",
            DocumentInput::default(),
            RevisionInput::new("B", ""),
        )
        .unwrap();
    let doc_b = node_b.document_id.unwrap();

    // Interleave edits across the two documents
    store.add_revision(doc_a, RevisionInput::new("A", "1")).unwrap();
    store.add_revision(doc_b, RevisionInput::new("B", "1")).unwrap();
    store.add_revision(doc_a, RevisionInput::new("A", "2")).unwrap();

    for document_id in [doc_a, doc_b] {
        let revisions = store.revisions(document_id).unwrap();
        assert_eq!(revisions[0].previous_revision_id, None, "chain ends at null");
        for revision in &revisions {
            if let Some(previous_id) = revision.previous_revision_id {
                let previous = store.get_revision(previous_id).unwrap();
                assert_eq!(previous.document_id, revision.document_id);
            }
        }
    }
}

#[test]
fn test_revision_content_is_cleaned_at_save() {
    let (_dir, _db, store) = open_store();
    let document = store.create_document(DocumentInput::default()).unwrap();
    let revision = store
        .add_revision(
            document.id,
            RevisionInput::new("T", "safe <b>bold</b> <script>alert(1)</script>"),
        )
        .unwrap();
    assert!(revision.content.contains("<b>bold</b>"));
    assert!(!revision.content.contains("script"));
    assert!(!revision.content.contains("alert"));
}

#[test]
fn test_blank_title_is_rejected_before_persistence() {
    let (_dir, _db, store) = open_store();
    let document = store.create_document(DocumentInput::default()).unwrap();
    let err = store
        .add_revision(document.id, RevisionInput::new("  ", "c"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.revisions(document.id).unwrap().is_empty());
}

// =============================================================================
// Path resolution
// =============================================================================

#[test]
fn test_resolve_three_levels_and_separator_variants() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    let a = store
        .create_page(root.id, "a", DocumentInput::default(), RevisionInput::new("A", ""))
        .unwrap();
    let b = store
        .create_page(a.id, "b", DocumentInput::default(), RevisionInput::new("B", ""))
        .unwrap();
    store
        .create_page(b.id, "c", DocumentInput::default(), RevisionInput::new("C", ""))
        .unwrap();

    let resolved = store.resolve(site.id, "a/b/c").unwrap();
    assert_eq!(resolved.path_string(), "a/b/c/");
    assert_eq!(resolved.ancestors.len(), 3);

    let with_separators = store.resolve(site.id, "/a/b/c/").unwrap();
    assert_eq!(with_separators.node.id, resolved.node.id);

    let empty = store.resolve(site.id, "").unwrap();
    assert!(empty.is_root());
    assert_eq!(empty.path_string(), "");
    assert_eq!(empty.node.id, root.id);
}

#[test]
fn test_resolve_without_root_is_a_configuration_error() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let err = store.resolve(site.id, "anything").unwrap_err();
    assert!(matches!(err, StoreError::NoRoot(_)));
}

#[test]
fn test_resolve_missing_segment_is_not_found() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    seed_page(&store, site.id, "exists");
    let err = store.resolve(site.id, "exists/missing").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_case_insensitive_resolution_by_default() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    let created = store
        .create_page(root.id, "Foo", DocumentInput::default(), RevisionInput::new("Foo", ""))
        .unwrap();

    let resolved = store.resolve(site.id, "foo").unwrap();
    assert_eq!(resolved.node.id, created.id);
}

#[test]
fn test_case_sensitive_mode_rejects_wrong_case() {
    let (_dir, db_path, _ignored) = open_store();
    let mut settings = Settings::default();
    settings.urls.case_sensitive = true;
    let store = Store::open_at(&db_path).unwrap().with_settings(settings);

    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    store
        .create_page(root.id, "Foo", DocumentInput::default(), RevisionInput::new("Foo", ""))
        .unwrap();

    assert!(store.resolve(site.id, "Foo").is_ok());
    let err = store.resolve(site.id, "foo").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_second_root_rejected_but_other_sites_unaffected() {
    let (_dir, _db, store) = open_store();
    let site_a = store.ensure_site("a").unwrap();
    let site_b = store.ensure_site("b").unwrap();

    store
        .create_root(site_a.id, RevisionInput::new("Root A", ""))
        .unwrap();
    let err = store
        .create_root(site_a.id, RevisionInput::new("Another", ""))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // Same operation on a different site is fine
    store
        .create_root(site_b.id, RevisionInput::new("Root B", ""))
        .unwrap();

    // ensure_root keeps returning the one root
    let root = store.root(site_a.id).unwrap();
    let ensured = store
        .ensure_root(site_a.id, RevisionInput::new("Ignored", ""))
        .unwrap();
    assert_eq!(root.id, ensured.id);
}

#[test]
fn test_duplicate_sibling_slug_rejected() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (root, _node, _doc) = seed_page(&store, site.id, "page");

    let err = store
        .create_page(root.id, "page", DocumentInput::default(), RevisionInput::new("Dup", ""))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // Case-insensitive resolution makes differently-cased twins ambiguous,
    // so they are rejected up front too
    let err = store
        .create_page(root.id, "PAGE", DocumentInput::default(), RevisionInput::new("Dup", ""))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn test_invalid_slug_rejected() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    let err = store
        .create_page(root.id, "no spaces", DocumentInput::default(), RevisionInput::new("X", ""))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

// =============================================================================
// Deletion
// =============================================================================

#[test]
fn test_delete_subtree_purges_nodes_documents_and_revisions() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node_a, doc_a) = seed_page(&store, site.id, "a");
    let node_b = store
        .create_page(node_a.id, "b", DocumentInput::default(), RevisionInput::new("B", ""))
        .unwrap();
    let doc_b = node_b.document_id.unwrap();

    let deleted = store.delete_subtree(node_a.id).unwrap();
    assert_eq!(deleted, 2);

    assert!(matches!(
        store.resolve(site.id, "a").unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert!(store.get_document(doc_a).is_err());
    assert!(store.get_document(doc_b).is_err());
    assert!(store.revisions(doc_a).unwrap().is_empty());
}

#[test]
fn test_delete_subtree_is_atomic_under_failure() {
    let (_dir, db_path, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node_a, doc_a) = seed_page(&store, site.id, "a");
    let node_b = store
        .create_page(node_a.id, "b", DocumentInput::default(), RevisionInput::new("B", ""))
        .unwrap();
    let node_c = store
        .create_page(node_a.id, "c", DocumentInput::default(), RevisionInput::new("C", ""))
        .unwrap();
    let doc_b = node_b.document_id.unwrap();

    // Break one descendant's document pointer so its deletion must fail
    {
        use diesel::prelude::*;
        let mut conn =
            diesel::SqliteConnection::establish(db_path.to_str().unwrap()).unwrap();
        diesel::sql_query(format!(
            "UPDATE tree_nodes SET document_id = 999999 WHERE id = {}",
            node_c.id
        ))
        .execute(&mut conn)
        .unwrap();
    }

    let err = store.delete_subtree(node_a.id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    // Nothing was deleted: the target, both descendants, and their
    // documents are all intact
    assert!(store.resolve(site.id, "a").is_ok());
    assert!(store.resolve(site.id, "a/b").is_ok());
    assert!(store.resolve(site.id, "a/c").is_ok());
    assert!(store.get_document(doc_a).is_ok());
    assert!(store.get_document(doc_b).is_ok());
    assert!(!store.revisions(doc_a).unwrap().is_empty());
}

#[test]
fn test_single_node_delete_refuses_children() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node_a, _doc_a) = seed_page(&store, site.id, "a");
    let node_b = store
        .create_page(node_a.id, "b", DocumentInput::default(), RevisionInput::new("B", ""))
        .unwrap();

    let err = store.delete_node(node_a.id).unwrap_err();
    assert!(matches!(err, StoreError::Precondition(_)));
    assert!(store.resolve(site.id, "a/b").is_ok());

    // Leaf deletion is fine and cascades to the document
    let doc_b = node_b.document_id.unwrap();
    store.delete_node(node_b.id).unwrap();
    assert!(store.get_document(doc_b).is_err());
    store.delete_node(node_a.id).unwrap();
}

// =============================================================================
// Permissions
// =============================================================================

#[test]
fn test_group_read_gate() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    let node = store
        .create_page(
            root.id,
            "internal",
            DocumentInput {
                group_id: Some(10),
                group_read: true,
                other_read: false,
                ..DocumentInput::default()
            },
            RevisionInput::new("Internal", ""),
        )
        .unwrap();
    let document_id = node.document_id.unwrap();

    let outsider = Actor::user(7);
    let member = Actor::user(8).with_groups(vec![10]);
    assert!(!store.can_read(document_id, &outsider).unwrap());
    assert!(store.can_read(document_id, &member).unwrap());
}

#[test]
fn test_logical_deletion_blocks_readers_without_delete_rights() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node, document_id) = seed_page(&store, site.id, "page");
    let member = Actor::user(8).with_groups(vec![10]);
    assert!(store.can_read(document_id, &member).unwrap());

    // Flag the document deleted through its history
    let current = store.current_revision(document_id).unwrap().unwrap();
    let mut input = RevisionInput::inheriting(&current);
    input.deleted = true;
    store.add_revision(document_id, input).unwrap();

    assert!(!store.can_read(document_id, &member).unwrap());

    // The deleted state is visible to ancestor scans as well
    let resolved = store.resolve(site.id, "page").unwrap();
    assert!(store.is_deleted(&resolved).unwrap());
    assert_eq!(
        store
            .first_deleted_ancestor(&resolved)
            .unwrap()
            .map(|n| n.id),
        Some(node.id)
    );
}

#[test]
fn test_deleted_ancestor_shadows_live_child() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node_a, doc_a) = seed_page(&store, site.id, "a");
    store
        .create_page(node_a.id, "b", DocumentInput::default(), RevisionInput::new("B", ""))
        .unwrap();

    let current = store.current_revision(doc_a).unwrap().unwrap();
    let mut input = RevisionInput::inheriting(&current);
    input.deleted = true;
    store.add_revision(doc_a, input).unwrap();

    let resolved = store.resolve(site.id, "a/b").unwrap();
    assert!(store.is_deleted(&resolved).unwrap());
}

// =============================================================================
// Bindings and propagation
// =============================================================================

#[test]
fn test_binding_reconciliation_fills_node_pointer() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node, document_id) = seed_page(&store, site.id, "page");

    // create_page binds and reconciles in the same transaction
    assert_eq!(node.document_id, Some(document_id));

    let found = store
        .document_for_target(BindingTarget::tree_node(node.id))
        .unwrap();
    assert_eq!(found.id, document_id);
}

#[test]
fn test_target_bound_to_exactly_one_document() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node, document_id) = seed_page(&store, site.id, "page");

    // Re-binding the same pair is a no-op get-or-create
    let binding = store
        .add_object_binding(document_id, BindingTarget::tree_node(node.id))
        .unwrap();
    assert_eq!(binding.document_id, document_id);

    // Binding the node to a different document is refused
    let other = store.create_document(DocumentInput::default()).unwrap();
    let err = store
        .add_object_binding(other.id, BindingTarget::tree_node(node.id))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn test_non_hierarchical_binding_skips_reconciliation() {
    let (_dir, _db, store) = open_store();
    let document = store.create_document(DocumentInput::default()).unwrap();
    let binding = store
        .add_object_binding(document.id, BindingTarget::attachment(42))
        .unwrap();
    assert!(!binding.is_hierarchical);

    let found = store
        .document_for_target(BindingTarget::attachment(42))
        .unwrap();
    assert_eq!(found.id, document.id);
}

#[test]
fn test_permission_propagation_covers_full_subtree() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    let a = store
        .create_page(
            root.id,
            "a",
            DocumentInput {
                owner_id: Some(3),
                group_id: Some(5),
                group_read: false,
                other_read: false,
                ..DocumentInput::default()
            },
            RevisionInput::new("A", ""),
        )
        .unwrap();
    let b = store
        .create_page(a.id, "b", DocumentInput::default(), RevisionInput::new("B", ""))
        .unwrap();
    let c = store
        .create_page(b.id, "c", DocumentInput::default(), RevisionInput::new("C", ""))
        .unwrap();
    let doc_a = a.document_id.unwrap();
    let doc_b = b.document_id.unwrap();
    let doc_c = c.document_id.unwrap();

    // Full subtree, not just direct children
    let descendants = store.descendant_documents(doc_a).unwrap();
    let ids: Vec<i32> = descendants.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![doc_b, doc_c]);

    assert_eq!(store.set_permissions_recursive(doc_a).unwrap(), 2);
    assert_eq!(store.set_group_recursive(doc_a).unwrap(), 2);
    assert_eq!(store.set_owner_recursive(doc_a).unwrap(), 2);

    for document_id in [doc_b, doc_c] {
        let document = store.get_document(document_id).unwrap();
        assert!(!document.other_read);
        assert!(!document.group_read);
        assert_eq!(document.group_id, Some(5));
        assert_eq!(document.owner_id, Some(3));
    }
}

#[test]
fn test_create_document_with_revision_is_two_phase() {
    let (_dir, _db, store) = open_store();
    let (document, revision) = store
        .create_document_with_revision(
            DocumentInput::owned_by(3),
            RevisionInput::new("Standalone", "body"),
        )
        .unwrap();
    assert_eq!(document.current_revision_id, Some(revision.id));
    assert_eq!(document.owner_id, Some(3));
    assert_eq!(revision.revision_number, 0);
    assert_eq!(revision.previous_revision_id, None);
}

#[test]
fn test_delete_document_cascades_to_node_and_bindings() {
    let (_dir, _db, store) = open_store();
    let site = store.ensure_site("default").unwrap();
    let (_root, node, document_id) = seed_page(&store, site.id, "page");

    store.delete_document(document_id).unwrap();

    assert!(store.get_document(document_id).is_err());
    assert!(store.get_node(node.id).is_err());
    assert!(store.revisions(document_id).unwrap().is_empty());
    assert!(store
        .document_for_target(BindingTarget::tree_node(node.id))
        .is_err());
}

// =============================================================================
// Notification fan-out
// =============================================================================

struct RecordingNotifier(Arc<Mutex<Vec<(i32, ChangeKind)>>>);

impl Notifier for RecordingNotifier {
    fn document_changed(&self, event: &ChangeEvent) {
        self.0
            .lock()
            .unwrap()
            .push((event.document_id, event.kind));
    }
}

#[test]
fn test_notifier_fires_on_create_edit_delete() {
    let dir = TempDir::new().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let store = Store::open_at(dir.path().join("test.db"))
        .unwrap()
        .with_notifier(Box::new(RecordingNotifier(events.clone())));

    let site = store.ensure_site("default").unwrap();
    let root = store
        .ensure_root(site.id, RevisionInput::new("Root", ""))
        .unwrap();
    let root_doc = root.document_id.unwrap();
    let node = store
        .create_page(root.id, "page", DocumentInput::default(), RevisionInput::new("P", ""))
        .unwrap();
    let document_id = node.document_id.unwrap();
    store
        .add_revision(document_id, RevisionInput::new("P", "edited"))
        .unwrap();
    store.delete_subtree(node.id).unwrap();

    let trace = events.lock().unwrap().clone();
    assert_eq!(
        trace,
        vec![
            (root_doc, ChangeKind::Created),
            (document_id, ChangeKind::Created),
            (document_id, ChangeKind::Edited),
            (document_id, ChangeKind::Deleted),
        ]
    );
}
