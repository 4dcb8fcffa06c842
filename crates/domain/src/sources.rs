use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use metrics::counter;
use tracing::warn;

use crate::DomainResult;
use crate::conversation::{
    ConversationKind, ConversationRef, DirectConversationRecord, EPOCH_MS,
    FALLBACK_DISPLAY_NAME, InboxEntry, message_preview,
};
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::catalog::{DirectCatalog, GroupCatalog, MembershipResolver};
use crate::ports::profile::ProfileResolver;
use crate::read_marker::ReadMarkerStore;
use crate::unread::UnreadCounter;

const ENTRY_FAILURES_TOTAL: &str = "rukun_inbox_entry_failures_total";

/// Which read model an adapter pass serves: the unread dropdown preview
/// omits fully-read conversations, the full listing keeps them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListingMode {
    UnreadOnly,
    Full,
}

/// One conversation family behind the aggregator. Both read models return
/// unsorted entries; ordering is the aggregator's job.
pub trait ConversationSource: Send + Sync {
    fn kind(&self) -> ConversationKind;

    fn unread_preview(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>>;

    fn full_listing(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>>;
}

#[derive(Clone)]
pub struct GroupSource {
    membership: Arc<dyn MembershipResolver>,
    groups: Arc<dyn GroupCatalog>,
    profiles: Arc<dyn ProfileResolver>,
    counter: UnreadCounter,
    markers: ReadMarkerStore,
}

impl GroupSource {
    pub fn new(
        membership: Arc<dyn MembershipResolver>,
        groups: Arc<dyn GroupCatalog>,
        profiles: Arc<dyn ProfileResolver>,
        counter: UnreadCounter,
        markers: ReadMarkerStore,
    ) -> Self {
        Self {
            membership,
            groups,
            profiles,
            counter,
            markers,
        }
    }

    async fn list(&self, user_id: String, mode: ListingMode) -> DomainResult<Vec<InboxEntry>> {
        let group_ids = self.membership.approved_group_ids_for_user(&user_id).await?;
        let tasks = group_ids
            .iter()
            .map(|group_id| self.group_entry(&user_id, group_id, mode));
        let results = join_all(tasks).await;

        let mut entries = Vec::with_capacity(group_ids.len());
        for (group_id, result) in group_ids.iter().zip(results) {
            match result {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) => {
                    warn!(group_id = %group_id, error = %err, "skipping group inbox entry");
                    counter!(ENTRY_FAILURES_TOTAL, "kind" => ConversationKind::Group.as_str())
                        .increment(1);
                }
            }
        }
        Ok(entries)
    }

    async fn group_entry(
        &self,
        user_id: &str,
        group_id: &str,
        mode: ListingMode,
    ) -> DomainResult<Option<InboxEntry>> {
        let conversation = ConversationRef::Group(group_id.to_string());
        let watermark = self.markers.watermark(user_id, &conversation).await?;
        let unread_count = self.counter.count(&conversation, user_id, watermark).await?;
        if mode == ListingMode::UnreadOnly && unread_count == 0 {
            return Ok(None);
        }

        let since = match mode {
            ListingMode::UnreadOnly => watermark,
            ListingMode::Full => EPOCH_MS,
        };
        let latest = self.counter.latest(&conversation, user_id, since).await?;
        let group = self
            .groups
            .get_group(group_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        let (counterpart_name, preview, last_message_at_ms) = match latest {
            Some(message) => {
                let sender_name = self
                    .profiles
                    .display_name_for(&message.sender_id)
                    .await?
                    .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
                (
                    Some(sender_name),
                    message_preview(&message.body),
                    Some(message.created_at_ms),
                )
            }
            None => (None, String::new(), None),
        };

        Ok(Some(InboxEntry {
            conversation,
            title: group.display_name,
            counterpart_name,
            preview,
            last_message_at_ms,
            unread_count,
        }))
    }
}

impl ConversationSource for GroupSource {
    fn kind(&self) -> ConversationKind {
        ConversationKind::Group
    }

    fn unread_preview(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.list(user_id, ListingMode::UnreadOnly).await })
    }

    fn full_listing(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.list(user_id, ListingMode::Full).await })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DirectFamily {
    Legacy,
    Current,
}

impl DirectFamily {
    fn kind(self) -> ConversationKind {
        match self {
            Self::Legacy => ConversationKind::LegacyDirect,
            Self::Current => ConversationKind::Direct,
        }
    }

    fn conversation_ref(self, conversation_id: &str) -> ConversationRef {
        match self {
            Self::Legacy => ConversationRef::LegacyDirect(conversation_id.to_string()),
            Self::Current => ConversationRef::Direct(conversation_id.to_string()),
        }
    }
}

/// Adapter for one of the two direct-message families. The legacy and
/// current schemas share a row shape but live in separate storage, so each
/// family gets its own catalog, message store, and marker store.
#[derive(Clone)]
pub struct DirectSource {
    family: DirectFamily,
    catalog: Arc<dyn DirectCatalog>,
    profiles: Arc<dyn ProfileResolver>,
    counter: UnreadCounter,
    markers: ReadMarkerStore,
}

impl DirectSource {
    pub fn legacy(
        catalog: Arc<dyn DirectCatalog>,
        profiles: Arc<dyn ProfileResolver>,
        counter: UnreadCounter,
        markers: ReadMarkerStore,
    ) -> Self {
        Self {
            family: DirectFamily::Legacy,
            catalog,
            profiles,
            counter,
            markers,
        }
    }

    pub fn direct(
        catalog: Arc<dyn DirectCatalog>,
        profiles: Arc<dyn ProfileResolver>,
        counter: UnreadCounter,
        markers: ReadMarkerStore,
    ) -> Self {
        Self {
            family: DirectFamily::Current,
            catalog,
            profiles,
            counter,
            markers,
        }
    }

    async fn list(&self, user_id: String, mode: ListingMode) -> DomainResult<Vec<InboxEntry>> {
        let records = self.catalog.list_for_user(&user_id).await?;

        let counterpart_ids: Vec<String> = records
            .iter()
            .filter_map(|record| record.counterpart_of(&user_id))
            .map(str::to_string)
            .collect();
        let names = match self.profiles.display_names_for(&counterpart_ids).await {
            Ok(names) => names,
            Err(err) => {
                warn!(
                    kind = self.family.kind().as_str(),
                    error = %err,
                    "profile batch lookup failed, using fallback names"
                );
                HashMap::new()
            }
        };

        let tasks = records
            .iter()
            .map(|record| self.direct_entry(&user_id, record, &names, mode));
        let results = join_all(tasks).await;

        let mut entries = Vec::with_capacity(records.len());
        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        kind = self.family.kind().as_str(),
                        conversation_id = %record.conversation_id,
                        error = %err,
                        "skipping direct inbox entry"
                    );
                    counter!(ENTRY_FAILURES_TOTAL, "kind" => self.family.kind().as_str())
                        .increment(1);
                }
            }
        }
        Ok(entries)
    }

    async fn direct_entry(
        &self,
        user_id: &str,
        record: &DirectConversationRecord,
        names: &HashMap<String, String>,
        mode: ListingMode,
    ) -> DomainResult<Option<InboxEntry>> {
        let counterpart = record.counterpart_of(user_id).ok_or_else(|| {
            DomainError::Validation("conversation does not include the user".to_string())
        })?;

        let conversation = self.family.conversation_ref(&record.conversation_id);
        let watermark = self.markers.watermark(user_id, &conversation).await?;
        let unread_count = self.counter.count(&conversation, user_id, watermark).await?;
        if mode == ListingMode::UnreadOnly && unread_count == 0 {
            return Ok(None);
        }

        let since = match mode {
            ListingMode::UnreadOnly => watermark,
            ListingMode::Full => EPOCH_MS,
        };
        let latest = self.counter.latest(&conversation, user_id, since).await?;
        let name = names
            .get(counterpart)
            .cloned()
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());

        let (preview, last_message_at_ms) = match latest {
            Some(message) => (message_preview(&message.body), Some(message.created_at_ms)),
            None => (String::new(), None),
        };

        Ok(Some(InboxEntry {
            conversation,
            title: name.clone(),
            counterpart_name: Some(name),
            preview,
            last_message_at_ms,
            unread_count,
        }))
    }
}

impl ConversationSource for DirectSource {
    fn kind(&self) -> ConversationKind {
        self.family.kind()
    }

    fn unread_preview(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.list(user_id, ListingMode::UnreadOnly).await })
    }

    fn full_listing(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.list(user_id, ListingMode::Full).await })
    }
}
