//! In-memory implementations of the collaborator ports, used by the dev
//! worker and the integration tests. Writes are mirrored onto the push hub
//! the way the managed backend's replication feed would be.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use rukun_domain::DomainResult;
use rukun_domain::conversation::{
    ConversationKind, ConversationRef, DirectConversationRecord, GroupConversation,
    MembershipStatus, Message, ReadMarkerRow,
};
use rukun_domain::error::DomainError;
use rukun_domain::inbox::{InboxAggregator, InboxRefresher};
use rukun_domain::mark_read::MarkReadOrchestrator;
use rukun_domain::notifier::ChangeNotifier;
use rukun_domain::ports::BoxFuture;
use rukun_domain::ports::catalog::{DirectCatalog, GroupCatalog, MembershipResolver};
use rukun_domain::ports::messages::MessageStore;
use rukun_domain::ports::profile::ProfileResolver;
use rukun_domain::ports::push::{ChangeEvent, PushChannel};
use rukun_domain::ports::read_markers::ReadMarkerRows;
use rukun_domain::read_marker::{FamilyReadMarkers, ReadMarkerStore};
use rukun_domain::sources::{ConversationSource, DirectSource, GroupSource};
use rukun_domain::unread::UnreadCounter;

fn new_message_id() -> String {
    Uuid::now_v7().simple().to_string()
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub async fn append(
        &self,
        conversation: ConversationRef,
        sender_id: &str,
        body: &str,
        created_at_ms: i64,
    ) -> Message {
        let message = Message {
            message_id: new_message_id(),
            conversation,
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            created_at_ms,
        };
        self.messages.write().await.push(message.clone());
        message
    }

    async fn matching(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> Vec<Message> {
        let mut matched: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| {
                message.conversation == *conversation
                    && message.sender_id != exclude_sender
                    && message.created_at_ms > since_exclusive_ms
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        matched
    }
}

impl MessageStore for InMemoryMessageStore {
    fn list_messages_after(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>> {
        let conversation = conversation.clone();
        let exclude_sender = exclude_sender.to_string();
        Box::pin(async move {
            Ok(self
                .matching(&conversation, &exclude_sender, since_exclusive_ms)
                .await)
        })
    }

    fn count_messages_after(
        &self,
        conversation: &ConversationRef,
        exclude_sender: &str,
        since_exclusive_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let conversation = conversation.clone();
        let exclude_sender = exclude_sender.to_string();
        Box::pin(async move {
            Ok(self
                .matching(&conversation, &exclude_sender, since_exclusive_ms)
                .await
                .len())
        })
    }
}

type MarkerKey = (String, ConversationRef);

/// Marker rows that mirror successful writes onto the push hub, matching
/// the backend's row-change feed.
#[derive(Default)]
pub struct InMemoryReadMarkerRows {
    rows: Arc<RwLock<HashMap<MarkerKey, i64>>>,
    hub: Option<Arc<InMemoryPushHub>>,
}

impl InMemoryReadMarkerRows {
    pub fn with_hub(hub: Arc<InMemoryPushHub>) -> Self {
        Self {
            rows: Arc::default(),
            hub: Some(hub),
        }
    }

    async fn announce(&self, user_id: &str, conversation: &ConversationRef) {
        if let Some(hub) = &self.hub {
            hub.publish(ChangeEvent::ReadMarkerChanged {
                user_id: user_id.to_string(),
                conversation: conversation.clone(),
            })
            .await;
        }
    }
}

impl ReadMarkerRows for InMemoryReadMarkerRows {
    fn select(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
    ) -> BoxFuture<'_, DomainResult<Option<ReadMarkerRow>>> {
        let key = (user_id.to_string(), conversation.clone());
        Box::pin(async move {
            let rows = self.rows.read().await;
            Ok(rows.get(&key).map(|read_at| ReadMarkerRow {
                user_id: key.0.clone(),
                conversation: key.1.clone(),
                last_read_at_ms: *read_at,
            }))
        })
    }

    fn update(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let key = (user_id.to_string(), conversation.clone());
        Box::pin(async move {
            let matched = {
                let mut rows = self.rows.write().await;
                match rows.get_mut(&key) {
                    Some(existing) => {
                        *existing = (*existing).max(read_at_ms);
                        1
                    }
                    None => 0,
                }
            };
            if matched > 0 {
                self.announce(&key.0, &key.1).await;
            }
            Ok(matched)
        })
    }

    fn insert(&self, row: &ReadMarkerRow) -> BoxFuture<'_, DomainResult<ReadMarkerRow>> {
        let row = row.clone();
        Box::pin(async move {
            {
                let mut rows = self.rows.write().await;
                let key = (row.user_id.clone(), row.conversation.clone());
                if rows.contains_key(&key) {
                    return Err(DomainError::Conflict);
                }
                rows.insert(key, row.last_read_at_ms);
            }
            self.announce(&row.user_id, &row.conversation).await;
            Ok(row)
        })
    }
}

#[derive(Default)]
pub struct InMemoryGroupDirectory {
    groups: Arc<RwLock<HashMap<String, GroupConversation>>>,
    memberships: Arc<RwLock<HashMap<(String, String), MembershipStatus>>>,
}

impl InMemoryGroupDirectory {
    pub async fn upsert_group(&self, group: GroupConversation) {
        self.groups
            .write()
            .await
            .insert(group.group_id.clone(), group);
    }

    pub async fn set_membership(&self, group_id: &str, user_id: &str, status: MembershipStatus) {
        self.memberships
            .write()
            .await
            .insert((group_id.to_string(), user_id.to_string()), status);
    }
}

impl MembershipResolver for InMemoryGroupDirectory {
    fn approved_group_ids_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let memberships = self.memberships.read().await;
            let mut ids: Vec<String> = memberships
                .iter()
                .filter(|((_, member), status)| {
                    *member == user_id && **status == MembershipStatus::Approved
                })
                .map(|((group_id, _), _)| group_id.clone())
                .collect();
            ids.sort();
            Ok(ids)
        })
    }
}

impl GroupCatalog for InMemoryGroupDirectory {
    fn get_group(&self, group_id: &str) -> BoxFuture<'_, DomainResult<Option<GroupConversation>>> {
        let group_id = group_id.to_string();
        Box::pin(async move { Ok(self.groups.read().await.get(&group_id).cloned()) })
    }
}

#[derive(Default)]
pub struct InMemoryDirectCatalog {
    records: Arc<RwLock<Vec<DirectConversationRecord>>>,
}

impl InMemoryDirectCatalog {
    pub async fn add_conversation(&self, record: DirectConversationRecord) {
        self.records.write().await.push(record);
    }
}

impl DirectCatalog for InMemoryDirectCatalog {
    fn list_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<DirectConversationRecord>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(records
                .iter()
                .filter(|record| record.counterpart_of(&user_id).is_some())
                .cloned()
                .collect())
        })
    }
}

#[derive(Default)]
pub struct InMemoryProfileDirectory {
    names: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryProfileDirectory {
    pub async fn set_name(&self, user_id: &str, display_name: &str) {
        self.names
            .write()
            .await
            .insert(user_id.to_string(), display_name.to_string());
    }
}

impl ProfileResolver for InMemoryProfileDirectory {
    fn display_name_for(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<String>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { Ok(self.names.read().await.get(&user_id).cloned()) })
    }

    fn display_names_for(
        &self,
        user_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<HashMap<String, String>>> {
        let user_ids = user_ids.to_vec();
        Box::pin(async move {
            let names = self.names.read().await;
            Ok(user_ids
                .iter()
                .filter_map(|id| names.get(id).map(|name| (id.clone(), name.clone())))
                .collect())
        })
    }
}

struct Subscriber {
    user_id: String,
    sender: mpsc::Sender<ChangeEvent>,
}

/// Fan-out hub standing in for the backend's push channel. Message inserts
/// go to every subscriber; read-marker changes only to the affected user.
pub struct InMemoryPushHub {
    buffer: usize,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl InMemoryPushHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub async fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|subscriber| {
            let relevant = match &event {
                ChangeEvent::MessageInserted { .. } => true,
                ChangeEvent::ReadMarkerChanged { user_id, .. } => *user_id == subscriber.user_id,
            };
            if !relevant {
                return true;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // At-least-once channel; a full buffer drops the event
                    // and the next one re-triggers the refresh.
                    warn!(user_id = %subscriber.user_id, "push buffer full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl PushChannel for InMemoryPushHub {
    fn subscribe(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<mpsc::Receiver<ChangeEvent>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let (sender, receiver) = mpsc::channel(self.buffer);
            self.subscribers
                .write()
                .await
                .push(Subscriber { user_id, sender });
            Ok(receiver)
        })
    }
}

/// The whole collaborator surface wired up in memory: three message
/// families, three marker families, catalogs, profiles, and the push hub.
pub struct MemoryBackend {
    pub group_messages: Arc<InMemoryMessageStore>,
    pub legacy_messages: Arc<InMemoryMessageStore>,
    pub direct_messages: Arc<InMemoryMessageStore>,
    pub group_markers: Arc<InMemoryReadMarkerRows>,
    pub legacy_markers: Arc<InMemoryReadMarkerRows>,
    pub direct_markers: Arc<InMemoryReadMarkerRows>,
    pub groups: Arc<InMemoryGroupDirectory>,
    pub legacy_catalog: Arc<InMemoryDirectCatalog>,
    pub direct_catalog: Arc<InMemoryDirectCatalog>,
    pub profiles: Arc<InMemoryProfileDirectory>,
    pub push: Arc<InMemoryPushHub>,
}

impl MemoryBackend {
    pub fn new(push_buffer: usize) -> Self {
        let push = Arc::new(InMemoryPushHub::new(push_buffer));
        Self {
            group_messages: Arc::default(),
            legacy_messages: Arc::default(),
            direct_messages: Arc::default(),
            group_markers: Arc::new(InMemoryReadMarkerRows::with_hub(push.clone())),
            legacy_markers: Arc::new(InMemoryReadMarkerRows::with_hub(push.clone())),
            direct_markers: Arc::new(InMemoryReadMarkerRows::with_hub(push.clone())),
            groups: Arc::default(),
            legacy_catalog: Arc::default(),
            direct_catalog: Arc::default(),
            profiles: Arc::default(),
            push,
        }
    }

    pub fn message_store_for(&self, kind: ConversationKind) -> &Arc<InMemoryMessageStore> {
        match kind {
            ConversationKind::Group => &self.group_messages,
            ConversationKind::LegacyDirect => &self.legacy_messages,
            ConversationKind::Direct => &self.direct_messages,
        }
    }

    /// Stores the message in its family and mirrors the insert onto the
    /// push hub.
    pub async fn deliver_message(
        &self,
        conversation: ConversationRef,
        sender_id: &str,
        body: &str,
        created_at_ms: i64,
    ) -> Message {
        let store = self.message_store_for(conversation.kind());
        let message = store
            .append(conversation.clone(), sender_id, body, created_at_ms)
            .await;
        self.push
            .publish(ChangeEvent::MessageInserted {
                conversation,
                sender_id: sender_id.to_string(),
                created_at_ms,
            })
            .await;
        message
    }

    pub fn family_read_markers(&self) -> FamilyReadMarkers {
        FamilyReadMarkers {
            group: ReadMarkerStore::new(self.group_markers.clone()),
            legacy_direct: ReadMarkerStore::new(self.legacy_markers.clone()),
            direct: ReadMarkerStore::new(self.direct_markers.clone()),
        }
    }
}

/// Engine wired over a backend, ready for a session.
pub struct InboxEngine {
    pub aggregator: Arc<InboxAggregator>,
    pub refresher: Arc<InboxRefresher>,
    pub mark_read: Arc<MarkReadOrchestrator>,
    pub notifier: Arc<ChangeNotifier>,
}

pub fn build_engine(backend: &MemoryBackend, debounce: Duration) -> InboxEngine {
    let markers = backend.family_read_markers();

    let group_source = GroupSource::new(
        backend.groups.clone(),
        backend.groups.clone(),
        backend.profiles.clone(),
        UnreadCounter::new(backend.group_messages.clone()),
        markers.group.clone(),
    );
    let legacy_source = DirectSource::legacy(
        backend.legacy_catalog.clone(),
        backend.profiles.clone(),
        UnreadCounter::new(backend.legacy_messages.clone()),
        markers.legacy_direct.clone(),
    );
    let direct_source = DirectSource::direct(
        backend.direct_catalog.clone(),
        backend.profiles.clone(),
        UnreadCounter::new(backend.direct_messages.clone()),
        markers.direct.clone(),
    );

    let sources: Vec<Arc<dyn ConversationSource>> = vec![
        Arc::new(group_source),
        Arc::new(legacy_source),
        Arc::new(direct_source),
    ];
    let aggregator = Arc::new(InboxAggregator::new(sources));
    let refresher = Arc::new(InboxRefresher::new(aggregator.clone()));
    let mark_read = Arc::new(MarkReadOrchestrator::new(markers, refresher.clone()));
    let notifier = Arc::new(ChangeNotifier::new(
        backend.push.clone(),
        refresher.clone(),
        debounce,
    ));

    InboxEngine {
        aggregator,
        refresher,
        mark_read,
        notifier,
    }
}
