//! Access evaluation for documents
//!
//! Read and write checks are pure predicates over a loaded document, its
//! current revision, and an acting identity. Delete, moderate, and assign
//! are policy decisions and live behind the `PermissionPolicy` trait so the
//! host application can swap its own rules in.

use crate::config::Settings;
use crate::db::{Document, Revision};

/// The acting identity a permission check runs against.
///
/// An actor with no user id is anonymous. Group membership and the IP
/// address come from the calling layer; the store never infers them.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub user_id: Option<i32>,
    pub group_ids: Vec<i32>,
    pub ip_address: Option<String>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: i32) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, group_ids: Vec<i32>) -> Self {
        self.group_ids = group_ids;
        self
    }

    pub fn with_ip(mut self, ip_address: &str) -> Self {
        self.ip_address = Some(ip_address.to_string());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Membership test against a document's (nullable) group
    pub fn in_group(&self, group_id: Option<i32>) -> bool {
        matches!(group_id, Some(g) if self.group_ids.contains(&g))
    }
}

/// Replaceable policy collaborator for delete/moderate/assign decisions
pub trait PermissionPolicy: Send + Sync {
    fn can_delete(&self, document: &Document, actor: &Actor) -> bool;
    fn can_moderate(&self, document: &Document, actor: &Actor) -> bool;
    fn can_assign(&self, document: &Document, actor: &Actor) -> bool;
}

/// Default policy: owners and configured moderators may delete; only
/// configured moderators may moderate or reassign ownership.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    pub moderators: Vec<i32>,
}

impl DefaultPolicy {
    pub fn with_moderators(moderators: Vec<i32>) -> Self {
        Self { moderators }
    }

    fn is_moderator(&self, actor: &Actor) -> bool {
        matches!(actor.user_id, Some(id) if self.moderators.contains(&id))
    }
}

impl PermissionPolicy for DefaultPolicy {
    fn can_delete(&self, document: &Document, actor: &Actor) -> bool {
        let is_owner =
            document.owner_id.is_some() && actor.user_id == document.owner_id;
        is_owner || self.is_moderator(actor)
    }

    fn can_moderate(&self, _document: &Document, actor: &Actor) -> bool {
        self.is_moderator(actor)
    }

    fn can_assign(&self, _document: &Document, actor: &Actor) -> bool {
        self.is_moderator(actor)
    }
}

/// Read evaluation. The tie-break order is load-bearing: anonymous toggle,
/// then the other-flag, then ownership, then group membership, then
/// moderation, then deny.
pub fn evaluate_read(
    document: &Document,
    current: Option<&Revision>,
    actor: &Actor,
    settings: &Settings,
    policy: &dyn PermissionPolicy,
) -> bool {
    // Deny reading access to deleted documents if actor has no delete access
    if let Some(revision) = current {
        if revision.deleted && !policy.can_delete(document, actor) {
            return false;
        }
    }

    if actor.is_anonymous() && !settings.access.anonymous_read {
        return false;
    }
    if document.other_read {
        return true;
    }
    if actor.is_anonymous() {
        return false;
    }
    if document.owner_id.is_some() && actor.user_id == document.owner_id {
        return true;
    }
    if document.group_read && actor.in_group(document.group_id) {
        return true;
    }
    if policy.can_moderate(document, actor) {
        return true;
    }
    false
}

/// Write evaluation. Same shape as read, substituting the write flags and
/// the anonymous-write toggle. No logical-deletion short-circuit.
pub fn evaluate_write(
    document: &Document,
    actor: &Actor,
    settings: &Settings,
    policy: &dyn PermissionPolicy,
) -> bool {
    if actor.is_anonymous() && !settings.access.anonymous_write {
        return false;
    }
    if document.other_write {
        return true;
    }
    if actor.is_anonymous() {
        return false;
    }
    if document.owner_id.is_some() && actor.user_id == document.owner_id {
        return true;
    }
    if document.group_write && actor.in_group(document.group_id) {
        return true;
    }
    if policy.can_moderate(document, actor) {
        return true;
    }
    false
}
