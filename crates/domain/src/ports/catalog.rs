use crate::DomainResult;
use crate::conversation::{DirectConversationRecord, GroupConversation};
use crate::ports::BoxFuture;

pub trait MembershipResolver: Send + Sync {
    /// Group ids where the user's membership status is approved. Pending and
    /// rejected memberships yield nothing.
    fn approved_group_ids_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>>;
}

pub trait GroupCatalog: Send + Sync {
    fn get_group(&self, group_id: &str) -> BoxFuture<'_, DomainResult<Option<GroupConversation>>>;
}

/// Conversation listing for one direct-message family. The legacy and direct
/// families each get their own instance.
pub trait DirectCatalog: Send + Sync {
    fn list_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<DirectConversationRecord>>>;
}
