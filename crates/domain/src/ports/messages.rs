use crate::DomainResult;
use crate::conversation::{ConversationRef, Message};
use crate::ports::BoxFuture;

/// Query surface of one message storage family. Read-only; timestamps are
/// compared strictly, so `since_exclusive_ms` itself is already read.
pub trait MessageStore: Send + Sync {
    /// Messages in `conversation` authored by someone other than
    /// `exclude_sender` with `created_at_ms > since_exclusive_ms`, ordered
    /// ascending by `(created_at_ms, message_id)`.
    fn list_messages_after(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>>;

    fn count_messages_after(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>>;
}
