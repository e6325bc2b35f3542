//! Mutation notification fan-out
//!
//! The store informs a notifier after document mutations commit. Delivery is
//! fire-and-forget: implementations must return promptly and must never fail
//! the mutation that triggered them - there is nothing left to fail, the
//! transaction already committed.

/// What happened to the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ChangeKind {
    Created,
    Edited,
    Deleted,
}

/// A committed document mutation
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangeEvent {
    pub document_id: i32,
    pub kind: ChangeKind,
    pub title: String,
}

/// Notification collaborator interface
pub trait Notifier: Send + Sync {
    /// Called once per committed mutation, after the transaction.
    fn document_changed(&self, event: &ChangeEvent);
}

/// Default notifier: logs at debug level and drops the event
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn document_changed(&self, event: &ChangeEvent) {
        tracing::debug!(
            document_id = event.document_id,
            kind = ?event.kind,
            "document changed"
        );
    }
}
