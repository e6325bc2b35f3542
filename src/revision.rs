//! Revision chain operations
//!
//! Every content mutation appends an immutable revision behind the
//! document's current pointer. Two creation paths exist: `add_revision` is
//! the normal chain mutation, `save_revision` is the direct path used by
//! administrative tooling. Both derive the same gap-free sequence (first
//! revision is number 0) and both leave the document with a non-null
//! current pointer after the first save.

use crate::config::Settings;
use crate::db::{
    last_insert_rowid, load_document, now, NewRevision, Result, Revision, Store, StoreError,
};
use crate::notify::{ChangeEvent, ChangeKind};
use crate::policy::Actor;
use crate::sanitize::Sanitizer;
use crate::schema::{documents, revisions};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Fields for a revision about to be created
#[derive(Debug, Clone, Default)]
pub struct RevisionInput {
    pub title: String,
    pub content: String,
    pub user_message: String,
    pub automatic_log: String,
    pub deleted: bool,
    pub locked: bool,
    pub user_id: Option<i32>,
    pub ip_address: Option<String>,
}

impl RevisionInput {
    pub fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
            ..Self::default()
        }
    }

    /// Copy forward content, title, and the state flags from the predecessor.
    /// Use this as the base for a partial edit, then override what changed.
    pub fn inheriting(predecessor: &Revision) -> Self {
        Self {
            title: predecessor.title.clone(),
            content: predecessor.content.clone(),
            deleted: predecessor.deleted,
            locked: predecessor.locked,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, user_message: &str) -> Self {
        self.user_message = user_message.to_string();
        self
    }

    /// Record authorship. The IP address is only captured when the audit
    /// settings ask for it for this class of actor.
    pub fn attribute_actor(mut self, actor: &Actor, settings: &Settings) -> Self {
        if let Some(user_id) = actor.user_id {
            self.user_id = Some(user_id);
            if settings.audit.log_ips_users {
                self.ip_address = actor.ip_address.clone();
            }
        } else if settings.audit.log_ips_anonymous {
            self.ip_address = actor.ip_address.clone();
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(StoreError::Validation(
                "revision title must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Store {
    /// Append a revision to a document's chain and advance the current
    /// pointer. Runs in one immediate transaction; the previous-revision
    /// link captures what was current at the moment of the call.
    pub fn add_revision(&self, document_id: i32, input: RevisionInput) -> Result<Revision> {
        let mut conn = self.get_conn()?;
        let revision = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            add_revision_in(conn, self.sanitizer(), document_id, &input)
        })?;
        self.notify(&ChangeEvent {
            document_id,
            kind: ChangeKind::Edited,
            title: revision.title.clone(),
        });
        Ok(revision)
    }

    /// Direct revision save, bypassing `add_revision`. Derives the sequence
    /// number when `revision_number` is not given, back-fills the
    /// previous-revision link from the current pointer, and promotes itself
    /// to current when the document has none yet.
    pub fn save_revision(
        &self,
        document_id: i32,
        input: RevisionInput,
        revision_number: Option<i32>,
    ) -> Result<Revision> {
        let mut conn = self.get_conn()?;
        let revision = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            input.validate()?;
            let document = load_document(conn, document_id)?;
            let number = match revision_number {
                Some(n) => n,
                None => next_revision_number(conn, document_id)?,
            };
            let cleaned = self.sanitizer().clean(&input.content);
            let stamp = now();
            let new_revision = NewRevision {
                document_id,
                revision_number: number,
                title: &input.title,
                content: &cleaned,
                user_message: &input.user_message,
                automatic_log: &input.automatic_log,
                deleted: input.deleted,
                locked: input.locked,
                previous_revision_id: document.current_revision_id,
                user_id: input.user_id,
                ip_address: input.ip_address.as_deref(),
                created_at: &stamp,
                modified_at: &stamp,
            };
            diesel::insert_into(revisions::table)
                .values(&new_revision)
                .execute(conn)?;
            let revision_id = last_insert_rowid(conn)?;

            // Saved without a current revision in place: this one is it
            if document.current_revision_id.is_none() {
                diesel::update(documents::table.filter(documents::id.eq(document_id)))
                    .set((
                        documents::current_revision_id.eq(revision_id),
                        documents::modified_at.eq(&stamp),
                    ))
                    .execute(conn)?;
            }

            Ok(revisions::table
                .filter(revisions::id.eq(revision_id))
                .first::<Revision>(conn)?)
        })?;
        self.notify(&ChangeEvent {
            document_id,
            kind: ChangeKind::Edited,
            title: revision.title.clone(),
        });
        Ok(revision)
    }
}

/// In-transaction revision append shared by `add_revision` and the page
/// creation paths. Content passes through the sanitizer unconditionally.
pub(crate) fn add_revision_in(
    conn: &mut SqliteConnection,
    sanitizer: &Sanitizer,
    document_id: i32,
    input: &RevisionInput,
) -> Result<Revision> {
    input.validate()?;
    let document = load_document(conn, document_id)?;
    let number = next_revision_number(conn, document_id)?;
    let cleaned = sanitizer.clean(&input.content);
    let stamp = now();

    let new_revision = NewRevision {
        document_id,
        revision_number: number,
        title: &input.title,
        content: &cleaned,
        user_message: &input.user_message,
        automatic_log: &input.automatic_log,
        deleted: input.deleted,
        locked: input.locked,
        // Captured before the pointer moves
        previous_revision_id: document.current_revision_id,
        user_id: input.user_id,
        ip_address: input.ip_address.as_deref(),
        created_at: &stamp,
        modified_at: &stamp,
    };
    diesel::insert_into(revisions::table)
        .values(&new_revision)
        .execute(conn)?;
    let revision_id = last_insert_rowid(conn)?;

    diesel::update(documents::table.filter(documents::id.eq(document_id)))
        .set((
            documents::current_revision_id.eq(revision_id),
            documents::modified_at.eq(&stamp),
        ))
        .execute(conn)?;

    Ok(revisions::table
        .filter(revisions::id.eq(revision_id))
        .first::<Revision>(conn)?)
}

/// Next sequence number for a document: max(existing) + 1, or 0 for an
/// empty chain
pub(crate) fn next_revision_number(
    conn: &mut SqliteConnection,
    document_id: i32,
) -> Result<i32> {
    use diesel::dsl::max;
    let latest: Option<i32> = revisions::table
        .filter(revisions::document_id.eq(document_id))
        .select(max(revisions::revision_number))
        .first(conn)?;
    Ok(latest.map(|n| n + 1).unwrap_or(0))
}
