use std::sync::Arc;

use tracing::debug;

use crate::DomainResult;
use crate::conversation::ConversationRef;
use crate::inbox::InboxRefresher;
use crate::read_marker::FamilyReadMarkers;
use crate::util::now_ms;

/// Acknowledges a conversation as read: routes the watermark upsert to the
/// conversation's family and kicks off a background inbox rebuild. The
/// caller may treat the conversation as read immediately; the refresh is
/// fire-and-forget.
pub struct MarkReadOrchestrator {
    markers: FamilyReadMarkers,
    refresher: Arc<InboxRefresher>,
}

impl MarkReadOrchestrator {
    pub fn new(markers: FamilyReadMarkers, refresher: Arc<InboxRefresher>) -> Self {
        Self { markers, refresher }
    }

    /// Returns the effective watermark, which may exceed `now` when a
    /// concurrent mark-read already stored a newer one.
    pub async fn mark_read(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
    ) -> DomainResult<i64> {
        let store = self.markers.for_kind(conversation.kind());
        let watermark = store.upsert(user_id, conversation, now_ms()).await?;
        debug!(
            kind = conversation.kind().as_str(),
            conversation_id = conversation.conversation_id(),
            watermark,
            "conversation acknowledged as read"
        );
        self.refresher.spawn_refresh(user_id);
        Ok(watermark)
    }
}
