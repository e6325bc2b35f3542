//! SQLite page store with Diesel ORM
//!
//! Stores the per-site page tree, documents, and their revision chains.
//! All multi-step mutations run inside `BEGIN IMMEDIATE` transactions so
//! concurrent writers are serialized and readers never observe a half-applied
//! state (a revision row without the matching current pointer, a binding
//! without its denormalized node pointer).

use crate::config::Settings;
use crate::notify::{ChangeEvent, Notifier, NullNotifier};
use crate::policy::{DefaultPolicy, PermissionPolicy};
use crate::sanitize::Sanitizer;
use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::path::Path;

/// Current timestamp in the storage format (RFC 3339 text)
pub(crate) fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Walk up directory tree to find .espalier folder (like git finds .git)
/// Can be overridden with ESPALIER_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("ESPALIER_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    // Walk up directory tree to find .espalier folder
    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let espalier_dir = dir.join(".espalier");
            if espalier_dir.exists() && espalier_dir.is_dir() {
                return espalier_dir.join("espalier.db");
            }
            // Move to parent directory
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break, // Reached filesystem root
            }
        }
    }

    // No .espalier found - default to current directory
    // (espalier init will create it here)
    std::path::PathBuf::from(".espalier/espalier.db")
}

/// Current schema version for espalier
pub const CURRENT_SCHEMA: PageStoreSchema = PageStoreSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "page-tree",
    features: &[
        "sites",
        "documents",
        "revisions",
        "tree_nodes",
        "object_bindings",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct PageStoreSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl PageStoreSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn is_compatible_with(&self, other: &PageStoreSchema) -> bool {
        self.major == other.major
    }

    pub fn is_newer_than(&self, other: &PageStoreSchema) -> bool {
        (self.major, self.minor, self.patch) > (other.major, other.minor, other.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for PageStoreSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

/// Insertable site
#[derive(Insertable)]
#[diesel(table_name = sites)]
pub struct NewSite<'a> {
    pub name: &'a str,
    pub created_at: &'a str,
}

/// Queryable site - one independent page tree per row
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = sites)]
pub struct Site {
    pub id: i32,
    pub name: String,
    pub created_at: String,
}

/// Insertable document shell
#[derive(Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument<'a> {
    pub current_revision_id: Option<i32>,
    pub owner_id: Option<i32>,
    pub group_id: Option<i32>,
    pub group_read: bool,
    pub group_write: bool,
    pub other_read: bool,
    pub other_write: bool,
    pub created_at: &'a str,
    pub modified_at: &'a str,
}

/// Queryable document
///
/// The permission-bearing entity. Content lives in its revision chain;
/// `current_revision_id` is null only before the first revision is saved.
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: i32,
    pub current_revision_id: Option<i32>,
    pub owner_id: Option<i32>,
    pub group_id: Option<i32>,
    pub group_read: bool,
    pub group_write: bool,
    pub other_read: bool,
    pub other_write: bool,
    pub created_at: String,
    pub modified_at: String,
}

/// Insertable revision
#[derive(Insertable)]
#[diesel(table_name = revisions)]
pub struct NewRevision<'a> {
    pub document_id: i32,
    pub revision_number: i32,
    pub title: &'a str,
    pub content: &'a str,
    pub user_message: &'a str,
    pub automatic_log: &'a str,
    pub deleted: bool,
    pub locked: bool,
    pub previous_revision_id: Option<i32>,
    pub user_id: Option<i32>,
    pub ip_address: Option<&'a str>,
    pub created_at: &'a str,
    pub modified_at: &'a str,
}

/// Queryable revision - one immutable content snapshot
///
/// `deleted` and `locked` describe the owning document's state as of this
/// revision, not the revision row itself. The flags on the latest revision
/// govern whether the document currently counts as deleted or locked.
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = revisions)]
pub struct Revision {
    pub id: i32,
    pub document_id: i32,
    pub revision_number: i32,
    pub title: String,
    pub content: String,
    pub user_message: String,
    pub automatic_log: String,
    pub deleted: bool,
    pub locked: bool,
    pub previous_revision_id: Option<i32>,
    pub user_id: Option<i32>,
    pub ip_address: Option<String>,
    pub created_at: String,
    pub modified_at: String,
}

/// Insertable tree node
#[derive(Insertable)]
#[diesel(table_name = tree_nodes)]
pub struct NewTreeNode<'a> {
    pub site_id: i32,
    pub parent_id: Option<i32>,
    pub slug: Option<&'a str>,
    pub document_id: Option<i32>,
    pub created_at: &'a str,
}

/// Queryable tree node - a named position in a site's path hierarchy
///
/// `slug` is null only on the root. `document_id` is a denormalized pointer
/// written exclusively by object-binding reconciliation; do not update it
/// anywhere else.
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = tree_nodes)]
pub struct TreeNode {
    pub id: i32,
    pub site_id: i32,
    pub parent_id: Option<i32>,
    pub slug: Option<String>,
    pub document_id: Option<i32>,
    pub created_at: String,
}

/// Insertable object binding
#[derive(Insertable)]
#[diesel(table_name = object_bindings)]
pub struct NewObjectBinding<'a> {
    pub document_id: i32,
    pub target_kind: &'a str,
    pub target_id: i32,
    pub is_hierarchical: bool,
    pub created_at: &'a str,
}

/// Queryable object binding - links a document to one external target
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = object_bindings)]
pub struct ObjectBinding {
    pub id: i32,
    pub document_id: i32,
    pub target_kind: String,
    pub target_id: i32,
    pub is_hierarchical: bool,
    pub created_at: String,
}

// ============================================================================
// Store Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Page store handle with connection pool and injected collaborators
pub struct Store {
    pool: DbPool,
    settings: Settings,
    sanitizer: Sanitizer,
    policy: Box<dyn PermissionPolicy>,
    notifier: Box<dyn Notifier>,
}

/// Error type for store operations
#[derive(Debug)]
pub enum StoreError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    /// Invariant violation caught before persistence
    Validation(String),
    /// Path or entity lookup failure
    NotFound(String),
    /// More than one match where the uniqueness invariant promises one
    Ambiguous(String),
    /// Site has no root node - configuration integrity failure
    NoRoot(String),
    /// Site has several root nodes - configuration integrity failure
    MultipleRoots(String),
    /// Operation refused before any mutation took place
    Precondition(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "Connection error: {}", msg),
            StoreError::Query(e) => write!(f, "Query error: {}", e),
            StoreError::Pool(e) => write!(f, "Pool error: {}", e),
            StoreError::Validation(msg) => write!(f, "{}", msg),
            StoreError::NotFound(msg) => write!(f, "Not found: {}", msg),
            StoreError::Ambiguous(msg) => write!(f, "Ambiguous lookup: {}", msg),
            StoreError::NoRoot(msg) => write!(f, "No root: {}", msg),
            StoreError::MultipleRoots(msg) => write!(f, "Multiple roots: {}", msg),
            StoreError::Precondition(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        StoreError::Query(e)
    }
}

impl From<diesel::r2d2::Error> for StoreError {
    fn from(e: diesel::r2d2::Error) -> Self {
        StoreError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl Store {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Create a new store at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open store at default path (respects ESPALIER_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::open_at(&path)
    }

    /// Open store at specified path with settings loaded from config
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            settings: Settings::load(),
            sanitizer: Sanitizer::new(),
            policy: Box::new(DefaultPolicy::default()),
            notifier: Box::new(NullNotifier),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Replace the runtime settings (case sensitivity, anonymous access, ...)
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the delete/moderate/assign policy collaborator
    pub fn with_policy(mut self, policy: Box<dyn PermissionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the mutation notifier collaborator
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub(crate) fn policy(&self) -> &dyn PermissionPolicy {
        &*self.policy
    }

    /// Fan a committed mutation out to the notifier. Fire-and-forget: the
    /// notifier runs after commit and cannot fail the mutation.
    pub(crate) fn notify(&self, event: &ChangeEvent) {
        self.notifier.document_changed(event);
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        // Run raw SQL to create tables if they don't exist
        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                current_revision_id INTEGER,
                owner_id INTEGER,
                group_id INTEGER,
                group_read BOOLEAN NOT NULL DEFAULT 1,
                group_write BOOLEAN NOT NULL DEFAULT 1,
                other_read BOOLEAN NOT NULL DEFAULT 1,
                other_write BOOLEAN NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                FOREIGN KEY (current_revision_id) REFERENCES revisions(id)
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                document_id INTEGER NOT NULL,
                revision_number INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                user_message TEXT NOT NULL DEFAULT '',
                automatic_log TEXT NOT NULL DEFAULT '',
                deleted BOOLEAN NOT NULL DEFAULT 0,
                locked BOOLEAN NOT NULL DEFAULT 0,
                previous_revision_id INTEGER,
                user_id INTEGER,
                ip_address TEXT,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
                FOREIGN KEY (previous_revision_id) REFERENCES revisions(id),
                UNIQUE(document_id, revision_number)
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS tree_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                site_id INTEGER NOT NULL,
                parent_id INTEGER,
                slug TEXT,
                document_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES tree_nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
                UNIQUE(site_id, parent_id, slug)
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS object_bindings (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                document_id INTEGER NOT NULL,
                target_kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                is_hierarchical BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
                UNIQUE(target_kind, target_id)
            )
        "#,
        )
        .execute(&mut conn)?;

        // Create indexes
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_revisions_document ON revisions(document_id)",
        )
        .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_tree_nodes_parent ON tree_nodes(parent_id)",
        )
        .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_tree_nodes_site ON tree_nodes(site_id)",
        )
        .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_bindings_document ON object_bindings(document_id)",
        )
        .execute(&mut conn)?;

        // Register current schema
        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &PageStoreSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Site Operations
    // ========================================================================

    /// Get or create a site by name
    pub fn ensure_site(&self, name: &str) -> Result<Site> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction::<_, StoreError, _>(|conn| {
            if let Some(site) = sites::table
                .filter(sites::name.eq(name))
                .first::<Site>(conn)
                .optional()?
            {
                return Ok(site);
            }
            let created = now();
            diesel::insert_into(sites::table)
                .values(&NewSite {
                    name,
                    created_at: &created,
                })
                .execute(conn)?;
            let id = last_insert_rowid(conn)?;
            Ok(sites::table.filter(sites::id.eq(id)).first::<Site>(conn)?)
        })
    }

    /// Look up a site by name
    pub fn find_site(&self, name: &str) -> Result<Site> {
        let mut conn = self.get_conn()?;
        sites::table
            .filter(sites::name.eq(name))
            .first::<Site>(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("site '{}'", name)))
    }

    // ========================================================================
    // Entity Lookups
    // ========================================================================

    /// Load a document by id
    pub fn get_document(&self, document_id: i32) -> Result<Document> {
        let mut conn = self.get_conn()?;
        load_document(&mut conn, document_id)
    }

    /// Load a revision by id
    pub fn get_revision(&self, revision_id: i32) -> Result<Revision> {
        let mut conn = self.get_conn()?;
        revisions::table
            .filter(revisions::id.eq(revision_id))
            .first::<Revision>(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("revision {}", revision_id)))
    }

    /// The revision a document currently presents as authoritative
    pub fn current_revision(&self, document_id: i32) -> Result<Option<Revision>> {
        let mut conn = self.get_conn()?;
        let document = load_document(&mut conn, document_id)?;
        load_current_revision(&mut conn, &document)
    }

    /// Full revision chain of a document, oldest first
    pub fn revisions(&self, document_id: i32) -> Result<Vec<Revision>> {
        let mut conn = self.get_conn()?;
        Ok(revisions::table
            .filter(revisions::document_id.eq(document_id))
            .order(revisions::revision_number.asc())
            .load::<Revision>(&mut conn)?)
    }

    /// Load a tree node by id
    pub fn get_node(&self, node_id: i32) -> Result<TreeNode> {
        let mut conn = self.get_conn()?;
        load_node(&mut conn, node_id)
    }

    /// Direct children of a node, ordered by slug
    pub fn children(&self, node_id: i32) -> Result<Vec<TreeNode>> {
        let mut conn = self.get_conn()?;
        node_children(&mut conn, node_id)
    }
}

// ============================================================================
// Connection-level helpers (shared with in-transaction code paths)
// ============================================================================

pub(crate) fn last_insert_rowid(conn: &mut SqliteConnection) -> Result<i32> {
    let id: i32 =
        diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(conn)?;
    Ok(id)
}

pub(crate) fn load_document(conn: &mut SqliteConnection, document_id: i32) -> Result<Document> {
    documents::table
        .filter(documents::id.eq(document_id))
        .first::<Document>(conn)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("document {}", document_id)))
}

pub(crate) fn load_current_revision(
    conn: &mut SqliteConnection,
    document: &Document,
) -> Result<Option<Revision>> {
    match document.current_revision_id {
        Some(rev_id) => Ok(revisions::table
            .filter(revisions::id.eq(rev_id))
            .first::<Revision>(conn)
            .optional()?),
        None => Ok(None),
    }
}

pub(crate) fn load_node(conn: &mut SqliteConnection, node_id: i32) -> Result<TreeNode> {
    tree_nodes::table
        .filter(tree_nodes::id.eq(node_id))
        .first::<TreeNode>(conn)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("tree node {}", node_id)))
}

pub(crate) fn node_children(
    conn: &mut SqliteConnection,
    parent_id: i32,
) -> Result<Vec<TreeNode>> {
    Ok(tree_nodes::table
        .filter(tree_nodes::parent_id.eq(parent_id))
        .order(tree_nodes::slug.asc())
        .load::<TreeNode>(conn)?)
}

pub(crate) fn site_roots(conn: &mut SqliteConnection, site_id: i32) -> Result<Vec<TreeNode>> {
    Ok(tree_nodes::table
        .filter(tree_nodes::site_id.eq(site_id))
        .filter(tree_nodes::parent_id.is_null())
        .load::<TreeNode>(conn)?)
}
