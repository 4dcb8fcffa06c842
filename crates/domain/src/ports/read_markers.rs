use crate::DomainResult;
use crate::conversation::{ConversationRef, ReadMarkerRow};
use crate::ports::BoxFuture;

/// Row-level persistence for one read-marker family. One of the backing
/// stores rejects native upsert semantics inconsistently, so callers build
/// upsert out of these primitives (see `read_marker::ReadMarkerStore`).
pub trait ReadMarkerRows: Send + Sync {
    fn select(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
    ) -> BoxFuture<'_, DomainResult<Option<ReadMarkerRow>>>;

    /// Sets `last_read_at_ms` to `max(existing, read_at_ms)` and returns the
    /// number of rows matched (0 when no row exists for the key).
    fn update(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>>;

    /// Fails with `DomainError::Conflict` when a row already exists for
    /// `(user_id, conversation)`.
    fn insert(&self, row: &ReadMarkerRow) -> BoxFuture<'_, DomainResult<ReadMarkerRow>>;
}
