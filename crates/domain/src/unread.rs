use std::sync::Arc;

use crate::DomainResult;
use crate::conversation::{ConversationRef, Message};
use crate::ports::messages::MessageStore;

/// Derived unread arithmetic over one message family. Stateless and
/// read-only, so concurrent calls across many conversations are safe.
#[derive(Clone)]
pub struct UnreadCounter {
    messages: Arc<dyn MessageStore>,
}

impl UnreadCounter {
    pub fn new(messages: Arc<dyn MessageStore>) -> Self {
        Self { messages }
    }

    /// Messages from other senders strictly after the watermark.
    pub async fn count(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> DomainResult<usize> {
        self.messages
            .count_messages_after(conversation, exclude_sender, since_exclusive_ms)
            .await
    }

    /// Most recent other-party message after the watermark; ties on
    /// `created_at_ms` resolve to the larger message id, matching the
    /// store's insertion order.
    pub async fn latest(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> DomainResult<Option<Message>> {
        let messages = self
            .messages
            .list_messages_after(conversation, exclude_sender, since_exclusive_ms)
            .await?;
        Ok(messages
            .into_iter()
            .max_by(|a, b| {
                a.created_at_ms
                    .cmp(&b.created_at_ms)
                    .then_with(|| a.message_id.cmp(&b.message_id))
            }))
    }
}
