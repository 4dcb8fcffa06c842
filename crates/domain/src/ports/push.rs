use tokio::sync::mpsc;

use crate::DomainResult;
use crate::conversation::ConversationRef;
use crate::ports::BoxFuture;

/// Change notifications from the external push channel. Delivery is
/// at-least-once; duplicates are expected and must stay harmless.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    MessageInserted {
        conversation: ConversationRef,
        sender_id: String,
        created_at_ms: i64,
    },
    ReadMarkerChanged {
        user_id: String,
        conversation: ConversationRef,
    },
}

pub trait PushChannel: Send + Sync {
    /// Subscribes to message inserts on all three families plus read-marker
    /// changes for `user_id`. The channel closes when the session ends.
    fn subscribe(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<mpsc::Receiver<ChangeEvent>>>;
}
